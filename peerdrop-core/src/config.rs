//! Engine configuration: chunk size, message limit, backpressure water marks.

use serde::Deserialize;

use crate::wire;

/// Default chunk payload size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024; // 16 KiB

/// Largest encoded message the channel is assumed to carry intact.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 256 * 1024; // 256 KiB

/// Buffered bytes above which chunk emission pauses.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1024 * 1024; // 1 MiB

/// Buffered bytes at or below which paused emission resumes.
pub const DEFAULT_LOW_WATER_MARK: usize = 256 * 1024; // 256 KiB

/// Largest file a receiver agrees to assemble in memory.
pub const DEFAULT_MAX_RECEIVE_SIZE: u64 = 1024 * 1024 * 1024; // 1 GiB

/// Length of a hyphenated UUID, the transfer id format this crate generates.
const TRANSFER_ID_LEN: usize = 36;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,
    #[serde(default = "default_max_receive_size")]
    pub max_receive_size: u64,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_max_message_len() -> usize {
    DEFAULT_MAX_MESSAGE_LEN
}
fn default_high_water_mark() -> usize {
    DEFAULT_HIGH_WATER_MARK
}
fn default_low_water_mark() -> usize {
    DEFAULT_LOW_WATER_MARK
}
fn default_max_receive_size() -> u64 {
    DEFAULT_MAX_RECEIVE_SIZE
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_message_len: default_max_message_len(),
            high_water_mark: default_high_water_mark(),
            low_water_mark: default_low_water_mark(),
            max_receive_size: default_max_receive_size(),
        }
    }
}

impl EngineConfig {
    /// Check that the limits are mutually consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.max_message_len > wire::MAX_FRAME_LEN as usize {
            return Err(ConfigError::MessageLimitTooLarge(self.max_message_len));
        }
        let needed = self.chunk_size + wire::chunk_overhead(TRANSFER_ID_LEN);
        if needed > self.max_message_len {
            return Err(ConfigError::ChunkExceedsMessageLimit {
                needed,
                max: self.max_message_len,
            });
        }
        if self.low_water_mark > self.high_water_mark {
            return Err(ConfigError::WaterMarksInverted {
                low: self.low_water_mark,
                high: self.high_water_mark,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("chunk size must be non-zero")]
    ZeroChunkSize,
    #[error("max message length {0} exceeds the frame limit")]
    MessageLimitTooLarge(usize),
    #[error("encoded chunk needs {needed} bytes but messages are limited to {max}")]
    ChunkExceedsMessageLimit { needed: usize, max: usize },
    #[error("low water mark {low} is above high water mark {high}")]
    WaterMarksInverted { low: usize, high: usize },
}
