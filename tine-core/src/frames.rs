//! # Frame Accumulation
//!
//! Capture callbacks deliver audio in whatever chunk size the device likes.
//! The accumulator collects those chunks into fixed analysis windows and
//! advances by a hop, so consecutive windows overlap (50 % by default).
//! The window buffer is allocated once; pushing never allocates.

#[derive(Debug, Clone)]
pub struct FrameAccumulator {
    window: Vec<f32>,
    filled: usize,
    hop: usize,
}

impl FrameAccumulator {
    /// `frame_size` samples per window, advancing `hop` samples per window.
    /// The hop is clamped into `1..=frame_size`.
    pub fn new(frame_size: usize, hop: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            window: vec![0.0; frame_size],
            filled: 0,
            hop: hop.clamp(1, frame_size),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.window.len()
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Samples currently buffered toward the next window.
    pub fn buffered(&self) -> usize {
        self.filled
    }

    /// Appends `input` and calls `on_frame` for every completed window, in
    /// order. Returns the number of windows emitted.
    pub fn push<F>(&mut self, mut input: &[f32], mut on_frame: F) -> usize
    where
        F: FnMut(&[f32]),
    {
        let frame_size = self.window.len();
        let mut emitted = 0;

        while !input.is_empty() {
            let space = frame_size - self.filled;
            let take = space.min(input.len());
            self.window[self.filled..self.filled + take].copy_from_slice(&input[..take]);
            self.filled += take;
            input = &input[take..];

            if self.filled < frame_size {
                break;
            }

            on_frame(&self.window);
            emitted += 1;

            // Keep the overlap for the next window.
            let keep = frame_size - self.hop;
            self.window.copy_within(self.hop.., 0);
            self.filled = keep;
        }

        emitted
    }

    /// Drops any partially accumulated window.
    pub fn reset(&mut self) {
        self.filled = 0;
    }
}
