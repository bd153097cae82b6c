use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::AudioError;

/// Wire encoding of one audio chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkEncoding {
    /// Raw little-endian 16-bit PCM
    #[default]
    Pcm16,
    /// Self-contained WAV file per chunk
    Wav,
}

impl ChunkEncoding {
    pub fn encode(
        &self,
        samples: &[i16],
        sample_rate: u32,
        channels: u16,
    ) -> Result<Vec<u8>, AudioError> {
        match self {
            ChunkEncoding::Pcm16 => Ok(samples.iter().flat_map(|s| s.to_le_bytes()).collect()),
            ChunkEncoding::Wav => encode_wav(samples, sample_rate, channels),
        }
    }
}

fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Result<Vec<u8>, AudioError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| AudioError::Encode(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| AudioError::Encode(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| AudioError::Encode(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
