use std::{fmt::Display, io::Cursor, time::Duration};

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use sha2::{Digest, Sha256};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{DecoderOptions, CODEC_TYPE_NULL},
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use crate::app_state::AppError;

const RESAMPLE_CHUNK: usize = 1024;

#[derive(Debug)]
pub enum DecodeError {
    Unsupported(String),
    NoAudioTrack,
    MissingSampleRate,
    NoSamples,
    Resample(String),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Unsupported(reason) => write!(f, "unsupported audio file: {reason}"),
            DecodeError::NoAudioTrack => write!(f, "file does not contain an audio track"),
            DecodeError::MissingSampleRate => write!(f, "audio track has unknown sample rate"),
            DecodeError::NoSamples => write!(f, "audio track does not contain any samples"),
            DecodeError::Resample(reason) => write!(f, "failed to resample audio: {reason}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<DecodeError> for AppError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Resample(_) => AppError::internal_error(err.to_string()),
            rest => AppError::bad_request(rest.to_string()),
        }
    }
}

/// Mono clip at the requested sample rate
#[derive(Debug, Clone)]
pub struct DecodedClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub source_rate: u32,
    pub channels: usize,
    /// Source was longer than the allowed clip duration
    pub truncated: bool,
}

impl DecodedClip {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Sha256 of the file contents, lowercase hex
pub fn file_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Decode any container/codec symphonia knows about into mono samples at `target_rate`,
/// keeping at most `max_duration` of audio.
pub fn decode_clip(
    bytes: &[u8],
    target_rate: u32,
    max_duration: Duration,
) -> Result<DecodedClip, DecodeError> {
    let (interleaved, source_rate, channels, truncated) = decode_interleaved(bytes, max_duration)?;
    let mono = to_mono(&interleaved, channels);
    if mono.is_empty() {
        return Err(DecodeError::NoSamples);
    }
    let mut samples = resample(&mono, source_rate, target_rate)?;
    let max_samples = (max_duration.as_secs_f64() * target_rate as f64) as usize;
    samples.truncate(max_samples);
    tracing::debug!(
        source_rate,
        channels,
        samples = samples.len(),
        "Decoded audio clip"
    );
    Ok(DecodedClip {
        samples,
        sample_rate: target_rate,
        source_rate,
        channels,
        truncated,
    })
}

fn decode_interleaved(
    bytes: &[u8],
    max_duration: Duration,
) -> Result<(Vec<f32>, u32, usize, bool), DecodeError> {
    let cursor = Cursor::new(bytes.to_vec());
    let media_source_stream = MediaSourceStream::new(Box::new(cursor), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            media_source_stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(DecodeError::MissingSampleRate)?;
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

    let max_frames = (max_duration.as_secs_f64() * sample_rate as f64) as usize;
    let mut samples = Vec::new();
    let mut truncated = false;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Unsupported(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::trace!("Skipping malformed packet: {e}");
                continue;
            }
            Err(e) => return Err(DecodeError::Unsupported(e.to_string())),
        };
        let spec = *decoded.spec();
        channels = spec.channels.count();
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());

        if samples.len() / channels.max(1) >= max_frames {
            truncated =
                samples.len() / channels.max(1) > max_frames || format.next_packet().is_ok();
            samples.truncate(max_frames * channels);
            break;
        }
    }

    Ok((samples, sample_rate, channels.max(1), truncated))
}

fn to_mono(input: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return input.to_vec();
    }
    input
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>, DecodeError> {
    if input_rate == output_rate {
        return Ok(input.to_vec());
    }
    let ratio = output_rate as f64 / input_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 64,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();
    let expected = (input.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut position = 0;
    let mut chunk = vec![0.0; RESAMPLE_CHUNK];

    // zero padded tail keeps feeding the filter until the delayed output is complete
    while output.len() < expected + delay {
        chunk.fill(0.0);
        if position < input.len() {
            let end = (position + RESAMPLE_CHUNK).min(input.len());
            chunk[..end - position].copy_from_slice(&input[position..end]);
            position = end;
        }
        let result = resampler
            .process(&[chunk.as_slice()], None)
            .map_err(|e| DecodeError::Resample(e.to_string()))?;
        output.extend_from_slice(&result[0]);
    }

    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use fingerprint::testing::sine;

    use super::{decode_clip, file_hash, resample, to_mono, DecodeError};

    /// 16 bit PCM wav
    pub fn wav(channels: &[Vec<f32>], sample_rate: u32) -> Vec<u8> {
        let frames = channels[0].len();
        let channel_count = channels.len() as u16;
        let data_len = (frames * channels.len() * 2) as u32;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&channel_count.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * channel_count as u32 * 2).to_le_bytes());
        out.extend_from_slice(&(channel_count * 2).to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for frame in 0..frames {
            for channel in channels {
                let value = (channel[frame].clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        out
    }

    #[test]
    fn mono_downmix_averages_channels() {
        assert_eq!(to_mono(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(to_mono(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    #[test]
    fn resample_halves_length() {
        let input = sine(440.0, 1.0, 44100);
        let output = resample(&input, 44100, 22050).unwrap();
        assert_eq!(output.len(), 22050);
        let peak = output.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        assert!(peak > 0.4 && peak < 0.6, "unexpected resampled amplitude: {peak}");
    }

    #[test_log::test]
    fn decodes_stereo_wav_into_mono_clip() {
        let left = sine(440.0, 2.0, 44100);
        let right = sine(880.0, 2.0, 44100);
        let bytes = wav(&[left, right], 44100);
        let clip = decode_clip(&bytes, 22050, Duration::from_secs(60)).unwrap();
        assert_eq!(clip.source_rate, 44100);
        assert_eq!(clip.channels, 2);
        assert_eq!(clip.sample_rate, 22050);
        assert!(!clip.truncated);
        assert!((clip.samples.len() as i64 - 44100).abs() <= 1);
    }

    #[test]
    fn long_files_are_trimmed() {
        let bytes = wav(&[sine(440.0, 3.0, 22050)], 22050);
        let clip = decode_clip(&bytes, 22050, Duration::from_secs(1)).unwrap();
        assert!(clip.truncated);
        assert_eq!(clip.samples.len(), 22050);
        assert_eq!(clip.duration(), Duration::from_secs(1));
    }

    #[test]
    fn garbage_is_rejected() {
        let result = decode_clip(b"definitely not audio", 22050, Duration::from_secs(60));
        assert!(matches!(result, Err(DecodeError::Unsupported(_))));
    }

    #[test]
    fn file_hash_is_sha256_hex() {
        assert_eq!(
            file_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
