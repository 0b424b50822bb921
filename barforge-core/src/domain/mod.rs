//! Domain types for barforge: bar tables, timeframes, windows, artifact roles.

pub mod role;
pub mod table;
pub mod timeframe;
pub mod window;

pub use role::Role;
pub use table::{Bar, BarTable, BarView, ColumnWidths, Width};
pub use timeframe::Timeframe;
pub use window::WindowName;
