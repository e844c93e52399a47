use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Integer PCM formats carried by the USB pins. Samples are little-endian,
/// 24-bit samples are packed into three bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    Int16,
    Int24,
    Int32,
}

/// Host-side sample type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SampleType {
    Int16Lsb = 16,
    Int24Lsb = 17,
    Int32Lsb = 18,
}

impl SampleFormat {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            16 => Some(Self::Int16),
            24 => Some(Self::Int24),
            32 => Some(Self::Int32),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Int16 => 16,
            Self::Int24 => 24,
            Self::Int32 => 32,
        }
    }

    pub fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    pub fn sample_type(self) -> SampleType {
        match self {
            Self::Int16 => SampleType::Int16Lsb,
            Self::Int24 => SampleType::Int24Lsb,
            Self::Int32 => SampleType::Int32Lsb,
        }
    }

    pub fn read_f32(self, src: &[u8]) -> f32 {
        match self {
            Self::Int16 => LittleEndian::read_i16(src) as f32 / 32_768.0,
            Self::Int24 => LittleEndian::read_i24(src) as f32 / 8_388_608.0,
            Self::Int32 => LittleEndian::read_i32(src) as f32 / 2_147_483_648.0,
        }
    }

    pub fn write_f32(self, dst: &mut [u8], value: f32) {
        let v = value.clamp(-1.0, 1.0) as f64;
        match self {
            Self::Int16 => LittleEndian::write_i16(dst, (v * 32_767.0) as i16),
            Self::Int24 => LittleEndian::write_i24(dst, (v * 8_388_607.0) as i32),
            Self::Int32 => LittleEndian::write_i32(dst, (v * 2_147_483_647.0) as i32),
        }
    }
}

/// Copies one channel out of an interleaved packet into a channel buffer.
/// `offset` is the channel's byte offset inside a frame, `stride` the frame
/// size in bytes.
pub fn deinterleave(src: &[u8], offset: usize, stride: usize, dst: &mut [u8], bytes: usize) {
    if bytes == 0 || stride == 0 {
        return;
    }
    for (frame, out) in dst.chunks_exact_mut(bytes).enumerate() {
        let o = frame * stride + offset;
        match src.get(o..o + bytes) {
            Some(sample) => out.copy_from_slice(sample),
            None => break,
        }
    }
}

/// Copies a channel buffer into its slot of an interleaved packet.
pub fn interleave(src: &[u8], offset: usize, stride: usize, dst: &mut [u8], bytes: usize) {
    if bytes == 0 || stride == 0 {
        return;
    }
    for (frame, sample) in src.chunks_exact(bytes).enumerate() {
        let o = frame * stride + offset;
        match dst.get_mut(o..o + bytes) {
            Some(out) => out.copy_from_slice(sample),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_depths_map_to_formats() {
        assert_eq!(SampleFormat::from_bits(24), Some(SampleFormat::Int24));
        assert_eq!(SampleFormat::from_bits(20), None);
        assert_eq!(SampleFormat::Int24.bytes(), 3);
        assert_eq!(SampleFormat::Int32.sample_type() as i32, 18);
    }

    #[test]
    fn interleave_places_channel_at_offset() {
        // two frames of a three-channel 16-bit packet, channel 1
        let channel = [1_u8, 2, 3, 4];
        let mut packet = [0_u8; 12];
        interleave(&channel, 2, 6, &mut packet, 2);
        assert_eq!(packet, [0, 0, 1, 2, 0, 0, 0, 0, 3, 4, 0, 0]);

        let mut back = [0_u8; 4];
        deinterleave(&packet, 2, 6, &mut back, 2);
        assert_eq!(back, channel);
    }

    #[test]
    fn short_packets_stop_copying() {
        let channel = [9_u8; 6];
        let mut packet = [0_u8; 4];
        interleave(&channel, 0, 2, &mut packet, 2);
        assert_eq!(packet, [9, 9, 9, 9]);
    }

    #[test]
    fn float_codec_is_symmetric_enough() {
        for format in [SampleFormat::Int16, SampleFormat::Int24, SampleFormat::Int32] {
            let mut buf = [0_u8; 4];
            format.write_f32(&mut buf, 0.5);
            let v = format.read_f32(&buf);
            assert!((v - 0.5).abs() < 1.0e-3, "{format:?} -> {v}");
        }
    }
}
