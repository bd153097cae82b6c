// Sample format conversion from device-native input to the chunk format
//
// Devices usually deliver f32 at 44.1/48kHz, often stereo. Speech chunks are
// 16-bit PCM at the configured rate and channel count.

/// Convert normalized f32 samples to i16 PCM
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Remap interleaved channels. Mono output averages all inputs; other layouts
/// copy the nearest input channel.
pub fn remap_channels(samples: &[i16], from: u16, to: u16) -> Vec<i16> {
    if from == to || from == 0 || to == 0 {
        return samples.to_vec();
    }

    let from = from as usize;
    let to = to as usize;
    let mut out = Vec::with_capacity(samples.len() / from * to);

    for frame in samples.chunks_exact(from) {
        if to == 1 {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            out.push((sum / from as i32) as i16);
        } else {
            for c in 0..to {
                out.push(frame[c.min(from - 1)]);
            }
        }
    }

    out
}

/// Nearest-neighbour rate conversion over interleaved frames
pub fn resample(samples: &[i16], channels: u16, from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let channels = channels.max(1) as usize;
    let in_frames = samples.len() / channels;
    let out_frames = (in_frames as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut out = Vec::with_capacity(out_frames * channels);

    for i in 0..out_frames {
        let src = (i as u64 * from_rate as u64 / to_rate as u64) as usize;
        let src = src.min(in_frames.saturating_sub(1));
        out.extend_from_slice(&samples[src * channels..(src + 1) * channels]);
    }

    out
}

/// Full device → chunk format conversion
pub fn to_target(
    input: &[f32],
    in_channels: u16,
    in_rate: u32,
    out_channels: u16,
    out_rate: u32,
) -> Vec<i16> {
    let pcm = f32_to_i16(input);
    let remapped = remap_channels(&pcm, in_channels, out_channels);
    resample(&remapped, out_channels, in_rate, out_rate)
}
