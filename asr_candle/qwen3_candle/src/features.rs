//! Log-mel feature extraction. Whisper-compatible:
//! reflection-padded framing, a Hann window, a real FFT via `rustfft`, a
//! slaney-normalized mel filterbank, and a clipped-log affine scaling that
//! lands the result in `[-1, 1]`.

use std::sync::{Arc, OnceLock};

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::error::{Qwen3AsrError, Result};

pub const N_FFT: usize = 400;
pub const HOP_LENGTH: usize = 160;
pub const N_MELS: usize = 128;
pub const SAMPLE_RATE: usize = 16_000;
pub const CHUNK_SECONDS: usize = 30;
pub const PADDED_FFT: usize = 512;
pub const MAX_FRAMES: usize = CHUNK_SECONDS * SAMPLE_RATE / HOP_LENGTH;

fn hann_window() -> &'static [f32; N_FFT] {
    static WINDOW: OnceLock<[f32; N_FFT]> = OnceLock::new();
    WINDOW.get_or_init(|| {
        let mut w = [0f32; N_FFT];
        for (i, slot) in w.iter_mut().enumerate() {
            *slot = 0.5
                - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (N_FFT - 1) as f32).cos();
        }
        w
    })
}

fn fft_plan() -> Arc<dyn Fft<f32>> {
    static PLAN: OnceLock<Arc<dyn Fft<f32>>> = OnceLock::new();
    PLAN.get_or_init(|| FftPlanner::new().plan_fft_forward(PADDED_FFT))
        .clone()
}

/// Slaney-normalized triangular mel filterbank, `[N_MELS, PADDED_FFT/2 + 1]`.
pub struct MelFilterbank {
    weights: Vec<Vec<f32>>,
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

impl MelFilterbank {
    pub fn build() -> Result<Self> {
        let n_freqs = PADDED_FFT / 2 + 1;
        let fmin = 0.0f32;
        let fmax = SAMPLE_RATE as f32 / 2.0;
        let mel_min = hz_to_mel(fmin);
        let mel_max = hz_to_mel(fmax);

        let mut mel_points = vec![0f32; N_MELS + 2];
        for (i, p) in mel_points.iter_mut().enumerate() {
            *p = mel_min + (mel_max - mel_min) * i as f32 / (N_MELS + 1) as f32;
        }
        let hz_points: Vec<f32> = mel_points.iter().map(|&m| mel_to_hz(m)).collect();
        let bin_points: Vec<f32> = hz_points
            .iter()
            .map(|&hz| hz * PADDED_FFT as f32 / SAMPLE_RATE as f32)
            .collect();

        if bin_points.iter().any(|b| b.is_nan()) {
            return Err(Qwen3AsrError::MelNotInitialized);
        }

        let mut weights = vec![vec![0f32; n_freqs]; N_MELS];
        for m in 0..N_MELS {
            let left = bin_points[m];
            let center = bin_points[m + 1];
            let right = bin_points[m + 2];
            // Slaney normalization: each filter is scaled by 2/(f_{m+2}-f_m)
            // in Hz terms so equal-energy signals produce comparable output
            // regardless of filter width.
            let norm = 2.0 / (hz_points[m + 2] - hz_points[m]).max(1e-10);
            for k in 0..n_freqs {
                let kf = k as f32;
                let w = if kf >= left && kf <= center && center > left {
                    (kf - left) / (center - left)
                } else if kf > center && kf <= right && right > center {
                    (right - kf) / (right - center)
                } else {
                    0.0
                };
                weights[m][k] = w * norm;
            }
        }
        Ok(Self { weights })
    }

    pub fn n_mels(&self) -> usize {
        self.weights.len()
    }
}

/// Reflection-pads `samples` by `N_FFT/2` at each end, matching
/// `torch.nn.functional.pad(..., mode="reflect")` semantics used by the
/// reference STFT framing.
fn reflect_pad(samples: &[f32]) -> Vec<f32> {
    let pad = N_FFT / 2;
    let n = samples.len();
    let mut out = Vec::with_capacity(n + 2 * pad);
    for i in (1..=pad).rev() {
        out.push(samples[i.min(n.saturating_sub(1))]);
    }
    out.extend_from_slice(samples);
    for i in 0..pad {
        let idx = n.saturating_sub(2).saturating_sub(i);
        out.push(samples[idx.min(n.saturating_sub(1))]);
    }
    out
}

/// Computes the `[N_MELS, T]` log-mel spectrogram for 16 kHz mono PCM,
/// truncated (or left short) at `MAX_FRAMES` columns.
pub fn log_mel_spectrogram(samples: &[f32], filterbank: &MelFilterbank) -> Result<Vec<Vec<f32>>> {
    if samples.is_empty() {
        return Err(Qwen3AsrError::InvalidAudio("empty audio buffer".into()));
    }

    let padded = reflect_pad(samples);
    let window = hann_window();
    let fft = fft_plan();
    let n_freqs = PADDED_FFT / 2 + 1;

    let num_frames = if padded.len() >= N_FFT {
        (padded.len() - N_FFT) / HOP_LENGTH + 1
    } else {
        0
    };

    let mut power_frames: Vec<Vec<f32>> = Vec::with_capacity(num_frames);
    let mut buf = vec![Complex32::new(0.0, 0.0); PADDED_FFT];
    for frame_idx in 0..num_frames {
        let start = frame_idx * HOP_LENGTH;
        for slot in buf.iter_mut() {
            *slot = Complex32::new(0.0, 0.0);
        }
        for i in 0..N_FFT {
            buf[i] = Complex32::new(padded[start + i] * window[i], 0.0);
        }
        fft.process(&mut buf);

        let mut power = vec![0f32; n_freqs];
        for (k, slot) in power.iter_mut().enumerate() {
            *slot = buf[k].norm_sqr();
        }
        power_frames.push(power);
    }

    if power_frames.is_empty() {
        return Err(Qwen3AsrError::InvalidAudio(
            "audio buffer too short to produce any STFT frame".into(),
        ));
    }

    // Drop the last frame (matches the reference's off-by-one trim) and
    // truncate to the 30 s chunk budget.
    power_frames.pop();
    power_frames.truncate(MAX_FRAMES);

    let n_mels = filterbank.n_mels();
    let mut mel = vec![vec![0f32; power_frames.len()]; n_mels];
    for (t, frame) in power_frames.iter().enumerate() {
        for m in 0..n_mels {
            let mut acc = 0f32;
            for (k, &p) in frame.iter().enumerate() {
                acc += filterbank.weights[m][k] * p;
            }
            mel[m][t] = acc;
        }
    }

    let mut log_mel = vec![0f32; n_mels * power_frames.len()];
    let mut max_val = f32::MIN;
    for m in 0..n_mels {
        for t in 0..power_frames.len() {
            let v = mel[m][t].max(1e-10).log10();
            log_mel[m * power_frames.len() + t] = v;
            if v > max_val {
                max_val = v;
            }
        }
    }

    let floor = max_val - 8.0;
    let t_len = power_frames.len();
    let mut out = vec![vec![0f32; t_len]; n_mels];
    for m in 0..n_mels {
        for t in 0..t_len {
            let clipped = log_mel[m * t_len + t].max(floor);
            out[m][t] = 0.25 * clipped + 1.0;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filterbank_has_expected_shape() {
        let fb = MelFilterbank::build().unwrap();
        assert_eq!(fb.n_mels(), N_MELS);
        assert_eq!(fb.weights[0].len(), PADDED_FFT / 2 + 1);
    }

    #[test]
    fn rejects_empty_audio() {
        let fb = MelFilterbank::build().unwrap();
        let err = log_mel_spectrogram(&[], &fb).unwrap_err();
        assert!(matches!(err, Qwen3AsrError::InvalidAudio(_)));
    }

    #[test]
    fn output_is_clipped_into_expected_range() {
        let fb = MelFilterbank::build().unwrap();
        let samples: Vec<f32> = (0..16_000)
            .map(|i| (i as f32 * 0.01).sin() * 0.5)
            .collect();
        let mel = log_mel_spectrogram(&samples, &fb).unwrap();
        assert_eq!(mel.len(), N_MELS);
        for row in &mel {
            for &v in row {
                assert!(v <= 1.0 + 1e-4, "value {v} exceeds affine max");
                assert!(v >= 1.0 - 2.0 - 1e-4, "value {v} below floor");
            }
        }
    }

    #[test]
    fn truncates_to_max_frames() {
        let fb = MelFilterbank::build().unwrap();
        let samples: Vec<f32> = vec![0.1; SAMPLE_RATE * CHUNK_SECONDS + HOP_LENGTH * 10];
        let mel = log_mel_spectrogram(&samples, &fb).unwrap();
        assert!(mel[0].len() <= MAX_FRAMES);
    }
}
