//! PCM demux and gain
//!
//! Pulls one channel's planar block out of a datagram, scales it by the
//! channel volume and lays it out as interleaved stereo (the same sample on
//! both speakers).

use crate::constants::{BYTES_PER_SAMPLE, MAX_VOLUME};
use crate::protocol::ByteOrder;

/// Location of one channel inside every datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSlice {
    /// Byte offset of the channel's block
    pub offset: usize,
    /// Samples in the block
    pub chunk_size: usize,
    pub byte_order: ByteOrder,
}

impl ChannelSlice {
    /// Bytes a datagram must have for this channel's block to be complete
    pub fn required_len(&self) -> usize {
        self.offset + self.chunk_size * BYTES_PER_SAMPLE
    }

    /// Copy this channel's samples out of a datagram, converting to host order.
    ///
    /// Returns `false` without touching `out` when the datagram is too short.
    pub fn demux(&self, datagram: &[u8], out: &mut [i16]) -> bool {
        if datagram.len() < self.required_len() || out.len() < self.chunk_size {
            return false;
        }

        let block = &datagram[self.offset..self.required_len()];
        for (sample, bytes) in out.iter_mut().zip(block.chunks_exact(BYTES_PER_SAMPLE)) {
            *sample = self.byte_order.read_i16([bytes[0], bytes[1]]);
        }
        true
    }
}

/// Scale a sample by `volume / 100`, clamped to the 16-bit range
#[inline]
pub fn apply_gain(sample: i16, volume: u8) -> i16 {
    let volume = volume.min(MAX_VOLUME) as i32;
    let scaled = sample as i32 * volume / MAX_VOLUME as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Scale mono samples and write them as interleaved L/R frames into `out`.
///
/// `out` is cleared first; it ends up `samples.len() * 2` samples long.
pub fn scale_to_stereo(samples: &[i16], volume: u8, out: &mut Vec<i16>) {
    out.clear();
    out.reserve(samples.len() * 2);

    for &sample in samples {
        let scaled = apply_gain(sample, volume);
        out.push(scaled);
        out.push(scaled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn planar_frame(blocks: &[Vec<i16>], order: ByteOrder) -> Vec<u8> {
        blocks
            .iter()
            .flat_map(|block| block.iter().flat_map(move |&s| order.write_i16(s)))
            .collect()
    }

    #[test]
    fn test_demux_selects_block() {
        let blocks = vec![vec![1i16, 2, 3, 4], vec![-5, 6, -7, 8], vec![9, 10, 11, 12]];
        let frame = planar_frame(&blocks, ByteOrder::Big);
        let slice = ChannelSlice {
            offset: 8,
            chunk_size: 4,
            byte_order: ByteOrder::Big,
        };

        let mut out = vec![0i16; 4];
        assert!(slice.demux(&frame, &mut out));
        assert_eq!(out, blocks[1]);
    }

    #[test]
    fn test_demux_short_datagram() {
        let slice = ChannelSlice {
            offset: 8,
            chunk_size: 4,
            byte_order: ByteOrder::Little,
        };
        let mut out = vec![7i16; 4];
        assert!(!slice.demux(&[0u8; 15], &mut out));
        assert_eq!(out, vec![7; 4]);
    }

    #[test]
    fn test_gain() {
        assert_eq!(apply_gain(1000, 100), 1000);
        assert_eq!(apply_gain(1000, 50), 500);
        assert_eq!(apply_gain(-1000, 0), 0);
        assert_eq!(apply_gain(i16::MIN, 100), i16::MIN);
        assert_eq!(apply_gain(i16::MAX, 200), i16::MAX);
    }

    #[test]
    fn test_stereo_duplicates_to_both_speakers() {
        let mut out = vec![9i16; 3];
        scale_to_stereo(&[0x0102, -1000], 50, &mut out);
        assert_eq!(out, vec![0x0081, 0x0081, -500, -500]);
    }

    #[test]
    fn test_demux_then_stereo_full_volume() {
        let samples: Vec<i16> = (0..64).map(|i| (i * 517 - 16000) as i16).collect();
        let blocks = vec![vec![0i16; 64], samples.clone(), vec![0i16; 64]];
        let frame = planar_frame(&blocks, ByteOrder::Big);
        let slice = ChannelSlice {
            offset: 128,
            chunk_size: 64,
            byte_order: ByteOrder::Big,
        };

        let mut mono = vec![0i16; 64];
        assert!(slice.demux(&frame, &mut mono));
        let mut out = Vec::new();
        scale_to_stereo(&mono, 100, &mut out);

        let left: Vec<i16> = out.iter().step_by(2).copied().collect();
        let right: Vec<i16> = out.iter().skip(1).step_by(2).copied().collect();
        assert_eq!(left, samples);
        assert_eq!(right, samples);
    }

    proptest! {
        #[test]
        fn prop_gain_never_exceeds_input(sample in any::<i16>(), volume in 0u8..=100) {
            let scaled = apply_gain(sample, volume);
            prop_assert!((scaled as i32).abs() <= (sample as i32).abs());
            let expected = sample as i32 * volume as i32 / 100;
            prop_assert_eq!(scaled as i32, expected);
        }
    }
}
