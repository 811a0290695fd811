//! Sample-format conversion used on both sides of the pipeline
//!
//! Capture devices rarely run at 16 kHz mono, and output devices rarely run
//! at the 24 kHz the live service speaks, so audio is down-mixed and
//! resampled here before framing or scheduling.

/// Convert interleaved multi-channel audio to mono by averaging channels.
pub fn downmix_to_mono(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    let channels = channels as usize;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// One-shot linear resampling of a complete buffer.
///
/// Output length is `ceil(len * to / from)` so the buffer duration is
/// preserved to within one output sample.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }

    let len = input.len();
    let out_len =
        ((len as u64 * to_rate as u64) + from_rate as u64 - 1) / from_rate as u64;
    let step = from_rate as f64 / to_rate as f64;

    (0..out_len as usize)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = input[idx.min(len - 1)];
            let b = input[(idx + 1).min(len - 1)];
            a + (b - a) * frac
        })
        .collect()
}

/// Streaming linear resampler
///
/// Keeps the fractional read position and the last input sample between
/// calls so consecutive device callbacks resample without seams.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    step: f64,
    pos: f64,
    prev: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let step = if to_rate == 0 {
            1.0
        } else {
            from_rate as f64 / to_rate as f64
        };

        Self {
            from_rate,
            to_rate,
            step,
            pos: 0.0,
            prev: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate || self.from_rate == 0 || self.to_rate == 0
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }
        if input.is_empty() {
            return Vec::new();
        }

        let buf: Vec<f32> = self.prev.into_iter().chain(input.iter().copied()).collect();
        let last = buf.len() - 1;
        let mut out = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);

        while self.pos < last as f64 {
            let idx = self.pos.floor() as usize;
            let frac = (self.pos - idx as f64) as f32;
            out.push(buf[idx] + (buf[idx + 1] - buf[idx]) * frac);
            self.pos += self.step;
        }

        // Carry the last sample into the next call, re-basing the position on it
        self.pos -= last as f64;
        self.prev = Some(buf[last]);

        out
    }
}

/// Slices a continuous sample stream into fixed-size blocks.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    block_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Append samples and return every block that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut blocks = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let take = (self.block_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.block_size {
                let block = std::mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.block_size),
                );
                blocks.push(block);
            }
        }

        blocks
    }

    /// Samples waiting for a complete block.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
