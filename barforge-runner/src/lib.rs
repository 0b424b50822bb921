//! Barforge Runner: artifact families on disk and the staged engine.
//!
//! This crate builds on `barforge-core` to provide:
//! - Artifact writer (role files, clash-suffixed stems, consolidated sidecar)
//! - Artifact scanner with sidecar validation and retention
//! - Stage-1 / Stage-2 engine with a bounded worker pool and cancellation
//! - Stage-3 inspection
//! - Driver-script generation

pub mod cancel;
pub mod engine;
pub mod inspect;
pub mod scanner;
pub mod script;
pub mod stem;
pub mod writer;

pub use cancel::CancelToken;
pub use engine::{Engine, Prepared, Progress, RunReport, StageError};
pub use inspect::Inspection;
pub use scanner::{ArtifactDescriptor, OutputInventory, RetentionPolicy, Scanner};
pub use script::{render_driver, write_driver, DriverScript};
pub use writer::{ArtifactIdentity, ArtifactWriter, EmitContext, Emitted};
