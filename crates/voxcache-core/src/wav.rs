//! WAV encoding for cached clips and PCM conversion helpers.
//!
//! Cached phrases are stored as mono 32-bit IEEE float WAV so a cache entry
//! round-trips bit-exactly and can still be opened by any audio tool.
//! Pure functions: no I/O, no async runtime.

/// Default engine sample rate (Kokoro output, 24 kHz mono).
pub const SAMPLE_RATE: u32 = 24_000;

/// `WAVE_FORMAT_IEEE_FLOAT`
const FORMAT_FLOAT: u16 = 3;
const HEADER_LEN: usize = 44;

/// Encode mono f32 samples as a float WAV file.
pub fn encode_f32_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 4) as u32;
    let file_len = 36 + data_len;
    let mut buf = Vec::with_capacity(HEADER_LEN + data_len as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_len.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&FORMAT_FLOAT.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 4).to_le_bytes()); // byte rate
    buf.extend_from_slice(&4u16.to_le_bytes()); // block align
    buf.extend_from_slice(&32u16.to_le_bytes()); // bits per sample

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

/// Parsed WAV header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Byte offset in the buffer where sample data begins.
    pub data_offset: usize,
    /// Declared data length, `None` for the `0xFFFFFFFF` streaming sentinel.
    pub data_len: Option<usize>,
}

/// Parse a WAV header from a byte buffer.
pub fn parse_wav_header(buf: &[u8]) -> Result<WavHeader, &'static str> {
    if buf.len() < 12 {
        return Err("too short for RIFF header");
    }
    if &buf[0..4] != b"RIFF" {
        return Err("missing RIFF tag");
    }
    if &buf[8..12] != b"WAVE" {
        return Err("missing WAVE tag");
    }

    let mut pos = 12;
    let mut fmt: Option<(u16, u16, u32, u16)> = None;

    while pos + 8 <= buf.len() {
        let chunk_id = &buf[pos..pos + 4];
        let chunk_size =
            u32::from_le_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]);

        if chunk_id == b"fmt " {
            if pos + 24 > buf.len() {
                return Err("fmt chunk truncated");
            }
            let format = u16::from_le_bytes([buf[pos + 8], buf[pos + 9]]);
            let channels = u16::from_le_bytes([buf[pos + 10], buf[pos + 11]]);
            let sample_rate = u32::from_le_bytes([
                buf[pos + 12],
                buf[pos + 13],
                buf[pos + 14],
                buf[pos + 15],
            ]);
            let bits = u16::from_le_bytes([buf[pos + 22], buf[pos + 23]]);
            fmt = Some((format, channels, sample_rate, bits));
            pos += 8 + chunk_size as usize;
            continue;
        }

        if chunk_id == b"data" {
            let (format, channels, sample_rate, bits_per_sample) =
                fmt.ok_or("data chunk before fmt chunk")?;
            return Ok(WavHeader {
                format,
                channels,
                sample_rate,
                bits_per_sample,
                data_offset: pos + 8,
                data_len: (chunk_size != 0xFFFF_FFFF).then_some(chunk_size as usize),
            });
        }

        // Skip unknown chunks (LIST, fact, ...)
        pos += 8 + chunk_size as usize;
    }

    Err("data chunk not found")
}

/// Decode a mono float WAV produced by [`encode_f32_wav`].
///
/// Returns the sample rate and samples. A truncated data chunk yields the
/// complete samples that are present.
pub fn decode_f32_wav(buf: &[u8]) -> Result<(u32, Vec<f32>), &'static str> {
    let header = parse_wav_header(buf)?;
    if header.format != FORMAT_FLOAT || header.bits_per_sample != 32 {
        return Err("not 32-bit float format");
    }
    if header.channels != 1 {
        return Err("not mono");
    }

    let available = buf.len() - header.data_offset;
    let len = header.data_len.map_or(available, |l| l.min(available));
    let data = &buf[header.data_offset..header.data_offset + len];

    let samples = data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((header.sample_rate, samples))
}

/// Convert little-endian i16 PCM bytes to f32 samples in `[-1.0, 1.0)`.
///
/// Streamed responses can split a sample across chunks: an odd trailing byte
/// is returned as leftover and must be passed back with the next chunk.
pub fn pcm16_le_to_f32(bytes: &[u8], leftover: Option<u8>) -> (Vec<f32>, Option<u8>) {
    let mut data: Vec<u8>;
    let slice = if let Some(lo) = leftover {
        data = Vec::with_capacity(1 + bytes.len());
        data.push(lo);
        data.extend_from_slice(bytes);
        &data[..]
    } else {
        bytes
    };

    let samples = slice
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    let remainder = if slice.len() % 2 == 1 {
        Some(slice[slice.len() - 1])
    } else {
        None
    };

    (samples, remainder)
}

/// Playback length of `sample_count` mono samples, in seconds.
pub fn duration_secs(sample_count: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f64 / sample_rate as f64
}
