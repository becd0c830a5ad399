//! Runtime settings shared by the host and the netplay layer.

use crate::core::{audio::DEFAULT_SAMPLE_RATE, wasm4::MAX_CART_SIZE};

/// Number of frames kept for rollback.
pub const DEFAULT_HISTORY_LENGTH: usize = 20;

/// Number of audio commands that may be queued before new ones are dropped.
pub const DEFAULT_AUDIO_QUEUE_CAPACITY: usize = 256;

/// Settings for a runtime instance.
///
/// Built once and handed to [`WasmiBackend`](crate::WasmiBackend) and
/// [`RollbackManager`](crate::netplay::RollbackManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Carts larger than this are rejected when `enforce_size_limit` is set.
    pub max_cart_size: usize,
    /// Reject oversized carts instead of only warning about them.
    pub enforce_size_limit: bool,
    /// Export every global of a cart before instantiating it, so state
    /// snapshots capture all of them.
    pub export_globals: bool,
    /// Number of frames the rollback manager can rewind.
    pub history_length: usize,
    /// Sample rate of the synthesizer.
    pub sample_rate: u32,
    /// Capacity of the audio command queue.
    pub audio_queue_capacity: usize,
    /// Name used by persistent disk managers.
    pub disk_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_cart_size: MAX_CART_SIZE,
            enforce_size_limit: true,
            export_globals: true,
            history_length: DEFAULT_HISTORY_LENGTH,
            sample_rate: DEFAULT_SAMPLE_RATE,
            audio_queue_capacity: DEFAULT_AUDIO_QUEUE_CAPACITY,
            disk_name: "cart".to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn with_max_cart_size(mut self, max_cart_size: usize) -> Self {
        self.max_cart_size = max_cart_size;
        self
    }

    pub fn with_enforce_size_limit(mut self, enforce_size_limit: bool) -> Self {
        self.enforce_size_limit = enforce_size_limit;
        self
    }

    pub fn with_export_globals(mut self, export_globals: bool) -> Self {
        self.export_globals = export_globals;
        self
    }

    /// The history is never shorter than one frame.
    pub fn with_history_length(mut self, history_length: usize) -> Self {
        self.history_length = history_length.max(1);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_audio_queue_capacity(mut self, audio_queue_capacity: usize) -> Self {
        self.audio_queue_capacity = audio_queue_capacity;
        self
    }

    pub fn with_disk_name(mut self, disk_name: impl Into<String>) -> Self {
        self.disk_name = disk_name.into();
        self
    }
}
