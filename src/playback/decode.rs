//! Sound file decoding into playable resources
//!
//! MP3 and WAV sources are decoded to mono f32, resampled to the output rate
//! and scaled by the item's volume.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Sample rate of every resource handed to a sink (voice transports run at 48kHz)
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;

/// Decoded, resampled and gain-adjusted audio ready for a sink
#[derive(Debug, Clone)]
pub struct AudioResource {
    /// Mono samples at [`OUTPUT_SAMPLE_RATE`]
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
    /// Volume the samples were scaled by
    pub volume: f64,
    /// File the resource was built from
    pub source: PathBuf,
}

impl AudioResource {
    /// Build a resource from raw mono samples
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_samples(samples: Vec<f32>, volume: f64, source: impl Into<PathBuf>) -> Self {
        let volume = super::clamp_volume(volume);
        let gain = volume as f32;
        let samples = samples
            .into_iter()
            .map(|s| (s * gain).clamp(-1.0, 1.0))
            .collect();

        Self {
            samples,
            sample_rate: OUTPUT_SAMPLE_RATE,
            volume,
            source: source.into(),
        }
    }

    /// Decode `path` at `volume`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded
    pub fn load(path: &Path, volume: f64) -> Result<Self> {
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));

        let (samples, sample_rate) = if is_wav {
            decode_wav(path)?
        } else {
            let data = std::fs::read(path)?;
            decode_mp3(&data)?
        };

        if samples.is_empty() {
            return Err(Error::Audio(format!("{} contains no audio", path.display())));
        }

        let samples = if sample_rate == OUTPUT_SAMPLE_RATE {
            samples
        } else {
            resample_audio(&samples, sample_rate, OUTPUT_SAMPLE_RATE)?
        };

        Ok(Self::from_samples(samples, volume, path))
    }

    /// Playing time
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let samples = u64::try_from(self.samples.len()).unwrap_or(u64::MAX);
        Duration::from_micros(samples.saturating_mul(1_000_000) / u64::from(self.sample_rate))
    }
}

/// Decode a WAV file to mono f32
#[allow(clippy::cast_precision_loss)]
fn decode_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?
        }
    };

    Ok((downmix(&interleaved, channels), spec.sample_rate))
}

/// Decode MP3 bytes to mono f32
#[allow(clippy::cast_sign_loss)]
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                let frame_samples: Vec<f32> =
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&frame_samples, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("MP3 has no frames".to_string()));
    }

    Ok((samples, sample_rate))
}

/// Average interleaved channels down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample audio using rubato
#[allow(clippy::cast_possible_truncation)]
fn resample_audio(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::new();

    // The resampler may round the chunk size; ask it instead of assuming
    let frames = resampler.input_frames_next();

    // Pad the tail so short cues are not truncated to nothing
    for chunk in input.chunks(frames) {
        let mut block = chunk.to_vec();
        block.resize(frames, 0.0);
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output.iter().map(|&s| s as f32).collect())
}
