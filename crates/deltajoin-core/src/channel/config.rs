//! Row channel configuration.

use std::path::{Path, PathBuf};

/// Default data region size (10 MiB).
pub const DEFAULT_CAPACITY: usize = 10 * 1024 * 1024;

/// Minimum data region size.
pub const MIN_CAPACITY: usize = 64;

/// Maximum data region size (frame lengths are 32-bit).
pub const MAX_CAPACITY: usize = 1 << 30;

/// Configuration for a row channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Size of the data region in bytes.
    pub capacity: usize,

    /// Directory holding segment files. Producer and consumer must agree.
    pub segment_dir: PathBuf,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            segment_dir: default_segment_dir(),
        }
    }
}

impl ChannelConfig {
    /// Creates a configuration with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.clamp(MIN_CAPACITY, MAX_CAPACITY),
            ..Default::default()
        }
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> ChannelConfigBuilder {
        ChannelConfigBuilder::default()
    }

    /// Returns the capacity clamped to `[MIN_CAPACITY, MAX_CAPACITY]`.
    #[must_use]
    pub fn effective_capacity(&self) -> usize {
        self.capacity.clamp(MIN_CAPACITY, MAX_CAPACITY)
    }
}

/// Builder for `ChannelConfig`.
#[derive(Debug, Default)]
pub struct ChannelConfigBuilder {
    capacity: Option<usize>,
    segment_dir: Option<PathBuf>,
}

impl ChannelConfigBuilder {
    /// Sets the data region size.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Sets the segment directory.
    #[must_use]
    pub fn segment_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.segment_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ChannelConfig {
        ChannelConfig {
            capacity: self
                .capacity
                .unwrap_or(DEFAULT_CAPACITY)
                .clamp(MIN_CAPACITY, MAX_CAPACITY),
            segment_dir: self.segment_dir.unwrap_or_else(default_segment_dir),
        }
    }
}

/// `/dev/shm` when present (tmpfs-backed on Linux), else the OS temp dir.
fn default_segment_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}
