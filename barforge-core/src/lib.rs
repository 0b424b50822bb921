//! Barforge Core: bar tables, format codec, and the data transforms.
//!
//! This crate holds everything that operates on a single table:
//! - Domain types (bar tables and views, timeframes, windows, artifact roles)
//! - Format codec with compression negotiation and atomic writes
//! - Type optimizer (optional 32-bit narrowing)
//! - Time-range filter and window resolution
//! - OHLCV resampler with gapless chaining
//! - Base-frequency inference
//! - Sidecar metadata contract
//!
//! Writing artifact families, scanning output directories and staging runs
//! live in `barforge-runner`.

pub mod capabilities;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod filter;
pub mod frequency;
pub mod notes;
pub mod optimize;
pub mod resample;
pub mod sidecar;

pub use capabilities::{Capabilities, RuntimeOptions};
pub use codec::{Codec, Compression, CompressionPolicy, FormatDescriptor};
pub use config::{PipelineConfig, Stage, TimeframeMode};
pub use domain::{Bar, BarTable, BarView, Role, Timeframe, WindowName};
pub use error::{EngineError, Result};
pub use frequency::{Confidence, FrequencyEstimate, FrequencyInferencer};
pub use notes::Note;
pub use optimize::TypeMode;
pub use sidecar::Sidecar;
