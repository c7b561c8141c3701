//! Allocation tuning for the decode buffer, so generated codecs that know
//! their message shapes (e.g. protobuf's length-delimited submessages) can
//! avoid repeated reallocation without the core needing to know anything
//! about the wire format above the frame header.

/// Buffer growth hints a [`super::Codec`] may supply.
#[derive(Debug, Clone, Copy)]
pub struct BufferSettings {
    /// Bytes to reserve up front for each incoming message buffer.
    pub buffer_size: usize,
    /// Threshold below which the buffer is grown rather than left to the
    /// default `BytesMut` growth strategy.
    pub yield_threshold: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        BufferSettings {
            buffer_size: 8 * 1024,
            yield_threshold: 32 * 1024,
        }
    }
}

impl BufferSettings {
    /// Builds explicit settings.
    pub fn new(buffer_size: usize, yield_threshold: usize) -> Self {
        BufferSettings {
            buffer_size,
            yield_threshold,
        }
    }
}
