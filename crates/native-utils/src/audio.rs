use anyhow::Context;
use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::io::Cursor;

/// Number of input frames the resampler consumes per call.
pub const RESAMPLE_CHUNK_SIZE: usize = 1024;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits a slice of audio samples into a vector of vectors, where each inner vector has a fixed chunk size.
/// If a chunk is smaller than the `chunk_size`, it is padded with zeros.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Creates a new ring buffer on the heap for shared audio data.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// Mono PCM decoded from a WAV file.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decodes a 16-bit PCM WAV into mono f32 samples.
///
/// Synthesisers writing to a pipe cannot know the final length and leave a
/// placeholder size in the header, so decoding stops quietly at the first
/// unreadable sample instead of failing.
pub fn decode_wav(bytes: &[u8]) -> anyhow::Result<DecodedAudio> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).context("Invalid WAV header")?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(anyhow::anyhow!(
            "Unsupported WAV format: {:?} {} bits",
            spec.sample_format,
            spec.bits_per_sample
        ));
    }

    let channels = spec.channels.max(1) as usize;
    let pcm16: Vec<i16> = reader.into_samples::<i16>().map_while(Result::ok).collect();
    let interleaved = convert_i16_to_f32(&pcm16);

    let samples = if channels > 1 {
        interleaved
            .chunks(channels)
            .map(|c| c.iter().sum::<f32>() / channels as f32)
            .collect()
    } else {
        interleaved
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Scales samples by `volume`, clipping to [-1.0, 1.0]. Negative volumes mute.
pub fn apply_gain(samples: &mut [f32], volume: f32) {
    let gain = volume.max(0.0);
    for sample in samples.iter_mut() {
        *sample = (*sample * gain).clamp(-1.0, 1.0);
    }
}

/// Resamples a whole mono clip from `in_rate` to `out_rate`.
pub fn resample(samples: &[f32], in_rate: u32, out_rate: u32) -> anyhow::Result<Vec<f32>> {
    if in_rate == out_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = create_resampler(in_rate as f64, out_rate as f64, RESAMPLE_CHUNK_SIZE)?;
    let mut out = Vec::with_capacity(samples.len() * out_rate as usize / in_rate as usize + 1);
    for chunk in split_for_chunks(samples, resampler.input_frames_next()) {
        let resampled = resampler
            .process(&[chunk.as_slice()], None)
            .context("Resampling failed")?;
        if let Some(channel) = resampled.first() {
            out.extend_from_slice(channel);
        }
    }

    // Drop the tail produced by the zero padding of the last chunk.
    let expected = (samples.len() as u64 * out_rate as u64 / in_rate as u64) as usize;
    out.truncate(expected);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_mono_wav() {
        let bytes = wav_bytes(&[0, 16384, -16384], 22050, 1);

        let decoded = decode_wav(&bytes).unwrap();

        assert_eq!(decoded.sample_rate, 22050);
        assert_eq!(decoded.samples, vec![0.0, 0.5, -0.5]);
    }

    #[test]
    fn downmixes_stereo_wav() {
        let bytes = wav_bytes(&[16384, 0, -16384, -16384], 16000, 2);

        let decoded = decode_wav(&bytes).unwrap();

        assert_eq!(decoded.samples, vec![0.25, -0.5]);
    }

    #[test]
    fn truncated_stream_keeps_readable_samples() {
        let mut bytes = wav_bytes(&[100, 200, 300, 400], 22050, 1);
        bytes.truncate(bytes.len() - 3);

        let decoded = decode_wav(&bytes).unwrap();

        assert_eq!(decoded.samples.len(), 2);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode_wav(b"not a wav file").is_err());
    }

    #[test]
    fn gain_scales_and_clips() {
        let mut samples = vec![0.25, -0.5, 0.9];
        apply_gain(&mut samples, 2.0);
        assert_eq!(samples, vec![0.5, -1.0, 1.0]);

        apply_gain(&mut samples, -3.0);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 48000, 48000).unwrap(), samples);
    }

    #[test]
    fn resample_doubles_length_when_rate_doubles() {
        let samples: Vec<f32> = (0..4410).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();

        let out = resample(&samples, 22050, 44100).unwrap();

        assert_eq!(out.len(), 8820);
    }

    #[test]
    fn split_pads_last_chunk() {
        let chunks = split_for_chunks(&[1.0, 2.0, 3.0], 2);
        assert_eq!(chunks, vec![vec![1.0, 2.0], vec![3.0, 0.0]]);
    }
}
