//! # Frame Slicing Module
//!
//! Turns capture blocks of arbitrary size into the overlapping analysis frames
//! the onset extractor expects. Capture callbacks rarely deliver exactly one
//! hop at a time, so samples are accumulated and a full frame is emitted every
//! `hop_size` samples.
//!
//! ## Features
//! - 2048-sample frames advanced by 512 samples (75% overlap)
//! - Interleaved multi-channel input mixed down to mono
//! - No allocation once the internal buffer has grown to one frame

/// Number of samples in one analysis frame.
pub const FRAME_SIZE: usize = 2048;

/// Number of samples the analysis window advances between frames.
pub const HOP_SIZE: usize = 512;

/// Sliding-window frame producer.
#[derive(Debug, Clone)]
pub struct FrameSlicer {
    frame_size: usize,
    hop_size: usize,
    channels: usize,
    buffer: Vec<f32>,
}

impl FrameSlicer {
    /// Creates a slicer with the standard frame and hop sizes.
    ///
    /// # Arguments
    /// * `channels` - Number of interleaved channels in the incoming blocks
    pub fn new(channels: u16) -> Self {
        Self::with_sizes(FRAME_SIZE, HOP_SIZE, channels)
    }

    /// Creates a slicer with custom sizes. The hop is kept within
    /// `1..=frame_size` so that every sample is seen at least once.
    pub fn with_sizes(frame_size: usize, hop_size: usize, channels: u16) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            hop_size: hop_size.clamp(1, frame_size),
            channels: usize::from(channels.max(1)),
            buffer: Vec::with_capacity(frame_size + hop_size),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Number of mono samples waiting for the next frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Appends a block of interleaved samples and calls `emit` once for every
    /// frame that became complete, oldest first.
    ///
    /// A trailing partial group of channels is ignored.
    pub fn push<F>(&mut self, interleaved: &[f32], mut emit: F)
    where
        F: FnMut(&[f32]),
    {
        if self.channels == 1 {
            self.buffer.extend_from_slice(interleaved);
        } else {
            let scale = 1.0 / self.channels as f32;
            self.buffer.extend(
                interleaved
                    .chunks_exact(self.channels)
                    .map(|group| group.iter().sum::<f32>() * scale),
            );
        }

        while self.buffer.len() >= self.frame_size {
            emit(&self.buffer[..self.frame_size]);
            self.buffer.drain(..self.hop_size);
        }
    }

    /// Drops any buffered samples.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn emits_overlapping_frames_one_hop_apart() {
        let mut slicer = FrameSlicer::new(1);
        let mut starts = Vec::new();
        slicer.push(&ramp(FRAME_SIZE + 3 * HOP_SIZE), |frame| {
            assert_eq!(frame.len(), FRAME_SIZE);
            starts.push(frame[0] as usize);
        });

        assert_eq!(starts, vec![0, HOP_SIZE, 2 * HOP_SIZE, 3 * HOP_SIZE]);
        assert_eq!(slicer.buffered(), FRAME_SIZE - HOP_SIZE);
    }

    #[test]
    fn block_size_does_not_change_the_frames() {
        let signal = ramp(FRAME_SIZE * 3);

        let mut whole = Vec::new();
        FrameSlicer::new(1).push(&signal, |frame| whole.push(frame.to_vec()));

        let mut pieces = Vec::new();
        let mut slicer = FrameSlicer::new(1);
        for block in signal.chunks(300) {
            slicer.push(block, |frame| pieces.push(frame.to_vec()));
        }

        assert_eq!(whole, pieces);
    }

    #[test]
    fn stereo_input_is_mixed_to_mono() {
        let mut slicer = FrameSlicer::with_sizes(4, 2, 2);
        let mut frames = Vec::new();
        slicer.push(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0, 0.2, 0.4], |frame| {
            frames.push(frame.to_vec())
        });

        assert_eq!(frames.len(), 1);
        let expected = [0.5, 0.5, 0.0, 0.3];
        for (got, want) in frames[0].iter().zip(expected) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn reset_discards_partial_frame() {
        let mut slicer = FrameSlicer::new(1);
        slicer.push(&ramp(1000), |_| panic!("no frame expected"));
        assert_eq!(slicer.buffered(), 1000);
        slicer.reset();
        assert_eq!(slicer.buffered(), 0);
    }
}
