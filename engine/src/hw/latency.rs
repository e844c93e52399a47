#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latencies {
    pub input: u32,
    pub output: u32,
}

/// Latencies reported to the host. Capture data is one buffer late; render
/// data waits behind the `output_depth - 1` buffers already queued.
pub fn stream_latencies(
    buffer_frames: u32,
    output_depth: usize,
    input_hw_frames: u32,
    output_hw_frames: u32,
) -> Latencies {
    let queued = output_depth.saturating_sub(1) as u32;
    Latencies {
        input: buffer_frames + input_hw_frames,
        output: buffer_frames.saturating_mul(queued) + output_hw_frames,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_buffers_at_512() {
        let l = stream_latencies(512, 2, 24, 32);
        assert_eq!(l.input, 512 + 24);
        assert_eq!(l.output, 512 + 32);
    }

    #[test]
    fn deeper_queue_adds_buffers() {
        let l = stream_latencies(128, 4, 0, 10);
        assert_eq!(l.output, 3 * 128 + 10);
    }
}
