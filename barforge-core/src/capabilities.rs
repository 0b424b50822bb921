//! Runtime options and the capability probe.
//!
//! Capabilities are probed once when an engine is constructed and handed to
//! every component that needs them. There are no process-wide toggles.

use crate::codec::Compression;
use chrono::Duration;

/// Options injected by the caller at engine construction.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Run Stage-2 timeframes on the worker pool instead of serially.
    pub parallel_timeframes: bool,
    /// Worker pool size; defaults to `min(cpus, 8)`.
    pub max_workers: Option<usize>,
    /// Frequency returned when inference is not confident.
    pub frequency_fallback: Duration,
    /// Codecs treated as unavailable even if compiled in.
    pub disabled_codecs: Vec<Compression>,
    /// Write object artifacts as a plain JSON dump instead of Arrow IPC.
    pub plain_object_dump: bool,
    /// Directories with more files than this validate in parallel.
    pub scan_parallel_threshold: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            parallel_timeframes: false,
            max_workers: None,
            frequency_fallback: Duration::minutes(1),
            disabled_codecs: Vec::new(),
            plain_object_dump: false,
            scan_parallel_threshold: 20,
        }
    }
}

impl RuntimeOptions {
    pub const MAX_POOL_SIZE: usize = 8;

    /// Size of the bounded worker pool.
    pub fn worker_count(&self) -> usize {
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        self.max_workers
            .unwrap_or_else(|| cpus.min(Self::MAX_POOL_SIZE))
            .max(1)
    }
}

/// What the running build can actually encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub has_object_wrapper: bool,
    pub has_lz4: bool,
    pub has_zstd: bool,
    /// Always false: no blosc encoder is linked. Blosc requests are written
    /// as the uncompressed object format and noted as `blosc->object`.
    pub has_blosc: bool,
}

impl Capabilities {
    pub fn probe(options: &RuntimeOptions) -> Self {
        let enabled = |c: Compression| !options.disabled_codecs.contains(&c);
        let caps = Self {
            has_object_wrapper: !options.plain_object_dump,
            has_lz4: enabled(Compression::Lz4),
            has_zstd: enabled(Compression::Zstd),
            has_blosc: false,
        };
        log::debug!("capability probe: {caps:?}");
        caps
    }

    pub fn supports(&self, compression: Compression) -> bool {
        match compression {
            Compression::None => true,
            Compression::Lz4 => self.has_lz4,
            Compression::Zstd => self.has_zstd,
            Compression::Blosc => self.has_blosc,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::probe(&RuntimeOptions::default())
    }
}
