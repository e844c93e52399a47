use crate::packet::PACKET_RING_SIZE;

pub const DEFAULT_OUTPUT_BUFFERS: usize = 2;
pub const MIN_OUTPUT_BUFFERS: usize = 2;
/// Audio the render queue should cover at minimum.
pub const MIN_PREFILL_MS: u32 = 4;

/// Number of render buffers kept queued ahead of playback.
pub fn output_buffer_depth(buffer_ms: u32, configured: Option<usize>) -> usize {
    let mut depth = configured.unwrap_or(DEFAULT_OUTPUT_BUFFERS);
    let buffer_ms = buffer_ms.max(1) as usize;
    while depth * buffer_ms < MIN_PREFILL_MS as usize && depth < PACKET_RING_SIZE {
        depth += 1;
    }
    depth.clamp(MIN_OUTPUT_BUFFERS, PACKET_RING_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_depth_for_long_buffers() {
        assert_eq!(output_buffer_depth(10, None), 2);
    }

    #[test]
    fn short_buffers_queue_more() {
        assert_eq!(output_buffer_depth(1, None), 4);
        assert_eq!(output_buffer_depth(1, Some(2)), 4);
        assert_eq!(output_buffer_depth(2, None), 2);
    }

    #[test]
    fn configured_depth_is_clamped() {
        assert_eq!(output_buffer_depth(10, Some(0)), 2);
        assert_eq!(output_buffer_depth(10, Some(3)), 3);
        assert_eq!(output_buffer_depth(10, Some(9)), PACKET_RING_SIZE);
    }
}
