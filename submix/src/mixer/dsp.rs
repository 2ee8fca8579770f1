//! Mixing routines: normalisation, summing, gain and channel extension
//!
//! The mix buffer always holds interleaved stereo in the output sample type.
//! Order is fixed: normalise (port volume) → sum → sink gain → extend.

use super::policy::SampleFormatPolicy;
use submix_common::{PcmConfig, SampleFormat};

/// Normalise `frames` frames of a port's staged PCM into the stereo mix buffer
///
/// With `accumulate` the samples are added to what `mix` already holds using
/// saturating addition; otherwise they overwrite it. Port volume is applied
/// here; a mono port is duplicated onto both channels.
pub fn normalize_into<P: SampleFormatPolicy>(
    src: &[u8],
    src_config: &PcmConfig,
    volume: f32,
    mix: &mut [P::Sample],
    accumulate: bool,
) {
    let frame_size = src_config.frame_size();
    let sample_bytes = src_config.format.bytes_per_sample();
    let mono = src_config.channels == 1;
    let gain = volume as f64;

    for (frame, out) in src.chunks_exact(frame_size).zip(mix.chunks_exact_mut(2)) {
        let left = read_port_sample::<P>(&frame[..sample_bytes], src_config.format);
        let right = if mono {
            left
        } else {
            read_port_sample::<P>(&frame[sample_bytes..2 * sample_bytes], src_config.format)
        };

        let (left, right) = if volume != 1.0 {
            (P::scale(left, gain), P::scale(right, gain))
        } else {
            (left, right)
        };

        if accumulate {
            out[0] = P::saturating_add(out[0], left);
            out[1] = P::saturating_add(out[1], right);
        } else {
            out[0] = left;
            out[1] = right;
        }
    }
}

fn read_port_sample<P: SampleFormatPolicy>(bytes: &[u8], format: SampleFormat) -> P::Sample {
    match format {
        SampleFormat::S32 => P::from_s32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        // ports are validated to S16 or S32 at creation
        _ => P::from_s16(i16::from_le_bytes([bytes[0], bytes[1]])),
    }
}

/// Apply the sink gain to the mixed signal
pub fn apply_gain<P: SampleFormatPolicy>(mix: &mut [P::Sample], gain: f32) {
    if gain == 1.0 {
        return;
    }
    let gain = gain as f64;
    for sample in mix.iter_mut() {
        *sample = P::scale(*sample, gain);
    }
}

/// Default 2→N layout: channels 0/1 carry L/R, further channels are silent
///
/// A mono output carries the left channel only. Writes `frames` output frames
/// into `out` as little-endian bytes.
pub fn extend_channels<P: SampleFormatPolicy>(
    mix: &[P::Sample],
    frames: usize,
    out_channels: usize,
    out: &mut [u8],
) {
    let sample_bytes = P::FORMAT.bytes_per_sample();
    let frame_bytes = sample_bytes * out_channels;

    for (stereo, frame) in mix
        .chunks_exact(2)
        .zip(out.chunks_exact_mut(frame_bytes))
        .take(frames)
    {
        for (ch, sample) in frame.chunks_exact_mut(sample_bytes).enumerate() {
            let value = match ch {
                0 | 1 => stereo[ch],
                _ => P::Sample::default(),
            };
            P::write_le(value, sample);
        }
    }
}

/// Widen the stereo mix into the mapper domain
pub fn widen<P: SampleFormatPolicy>(mix: &[P::Sample], wide: &mut [i32]) {
    for (w, s) in wide.iter_mut().zip(mix) {
        *w = P::to_wide(*s);
    }
}

/// Encode mapper output back into the output sample type
pub fn encode_wide<P: SampleFormatPolicy>(wide: &[i32], out: &mut [u8]) {
    let sample_bytes = P::FORMAT.bytes_per_sample();
    for (w, sample) in wide.iter().zip(out.chunks_exact_mut(sample_bytes)) {
        P::write_le(P::from_wide(*w), sample);
    }
}
