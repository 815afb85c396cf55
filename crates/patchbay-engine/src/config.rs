use serde::{Deserialize, Serialize};

/// Engine-wide configuration fixed at construction time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Frames per block; also the capacity of every audio buffer.
    pub block_length: u32,
    /// Capacity of each event queue stage, in events.
    pub event_queue_size: usize,
    /// Stamps per event buffer.
    pub event_buffer_size: usize,
    /// Byte capacity of atom buffers.
    pub atom_buffer_size: usize,
    /// Buffers pre-allocated per pool class at startup.
    pub pre_allocated_buffers: usize,
}

impl EngineConfig {
    pub fn new(sample_rate: u32, block_length: u32) -> Self {
        Self {
            sample_rate,
            block_length,
            ..Self::default()
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_length: 1024,
            event_queue_size: 1024,
            event_buffer_size: 64,
            atom_buffer_size: 1024,
            pre_allocated_buffers: 16,
        }
    }
}
