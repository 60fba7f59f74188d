//! Binary frame envelope
//!
//! | Offset | Size | Description                                  |
//! |--------|------|----------------------------------------------|
//! | 0      | 1    | Kind (0x00 = video, 0x01 = audio)            |
//! | 1      | 8    | Timestamp, microseconds (u64 BE)             |
//! | 9      | N    | Video: encoded image payload                 |
//! | 9      | 4    | Audio: payload length (u32 BE)               |
//! | 13     | N    | Audio: interleaved i16 PCM, L R L R ...      |
//!
//! PCM samples are little-endian, as produced by common capture APIs.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::WireError;

/// Header length of a video envelope
pub const VIDEO_HEADER_LEN: usize = 9;
/// Header length of an audio envelope
pub const AUDIO_HEADER_LEN: usize = 13;

const TAG_VIDEO: u8 = 0x00;
const TAG_AUDIO: u8 = 0x01;

/// Frame kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Video,
    Audio,
}

impl FrameKind {
    pub fn tag(self) -> u8 {
        match self {
            FrameKind::Video => TAG_VIDEO,
            FrameKind::Audio => TAG_AUDIO,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_VIDEO => Some(FrameKind::Video),
            TAG_AUDIO => Some(FrameKind::Audio),
            _ => None,
        }
    }

    pub fn header_len(self) -> usize {
        match self {
            FrameKind::Video => VIDEO_HEADER_LEN,
            FrameKind::Audio => AUDIO_HEADER_LEN,
        }
    }
}

/// One captured video or audio frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEnvelope {
    pub kind: FrameKind,
    pub timestamp_micros: u64,
    pub payload: Bytes,
}

impl FrameEnvelope {
    pub fn video(timestamp_micros: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Video,
            timestamp_micros,
            payload: payload.into(),
        }
    }

    pub fn audio(timestamp_micros: u64, pcm: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Audio,
            timestamp_micros,
            payload: pcm.into(),
        }
    }

    /// Build an audio envelope from interleaved samples
    pub fn audio_from_samples(timestamp_micros: u64, samples: &[i16]) -> Self {
        let mut pcm = BytesMut::with_capacity(samples.len() * 2);
        for sample in samples {
            pcm.put_i16_le(*sample);
        }
        Self::audio(timestamp_micros, pcm.freeze())
    }

    /// Declared payload length; present for audio only
    pub fn payload_length(&self) -> Option<u32> {
        match self.kind {
            FrameKind::Audio => u32::try_from(self.payload.len()).ok(),
            FrameKind::Video => None,
        }
    }

    /// Interleaved PCM samples of an audio envelope. A trailing odd byte is
    /// ignored.
    pub fn pcm_samples(&self) -> Option<Vec<i16>> {
        if self.kind != FrameKind::Audio {
            return None;
        }
        Some(
            self.payload
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect(),
        )
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        self.kind.header_len() + self.payload.len()
    }

    /// Encode to the wire format
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.kind.tag());
        buf.put_u64(self.timestamp_micros);
        if self.kind == FrameKind::Audio {
            let len = u32::try_from(self.payload.len())
                .map_err(|_| WireError::PayloadTooLarge(self.payload.len()))?;
            buf.put_u32(len);
        }
        buf.extend_from_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode a wire buffer. The payload shares `data`'s allocation.
    pub fn decode(data: &Bytes) -> Result<Self, WireError> {
        let Some(&tag) = data.first() else {
            return Err(WireError::Truncated {
                needed: VIDEO_HEADER_LEN,
                actual: 0,
            });
        };
        let kind = FrameKind::from_tag(tag).ok_or(WireError::UnknownKind(tag))?;

        let needed = kind.header_len();
        if data.len() < needed {
            return Err(WireError::Truncated {
                needed,
                actual: data.len(),
            });
        }

        let mut header = &data[1..needed];
        let timestamp_micros = header.get_u64();

        let payload = match kind {
            FrameKind::Video => data.slice(VIDEO_HEADER_LEN..),
            FrameKind::Audio => {
                let declared = header.get_u32();
                let remaining = data.len() - AUDIO_HEADER_LEN;
                if declared as usize > remaining {
                    return Err(WireError::LengthOverflow {
                        declared,
                        remaining,
                    });
                }
                if (declared as usize) < remaining {
                    return Err(WireError::TrailingBytes(remaining - declared as usize));
                }
                data.slice(AUDIO_HEADER_LEN..)
            }
        };

        Ok(Self {
            kind,
            timestamp_micros,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_layout() {
        let frame = FrameEnvelope::video(0x0102030405060708, vec![0xFF, 0xD8, 0xFF]);
        let encoded = frame.encode().unwrap();

        assert_eq!(
            &encoded[..],
            &[0x00, 1, 2, 3, 4, 5, 6, 7, 8, 0xFF, 0xD8, 0xFF]
        );
        assert_eq!(frame.payload_length(), None);
    }

    #[test]
    fn test_audio_layout() {
        let frame = FrameEnvelope::audio_from_samples(1_000_000, &[1, -1]);
        let encoded = frame.encode().unwrap();

        assert_eq!(encoded[0], 0x01);
        assert_eq!(&encoded[1..9], &1_000_000u64.to_be_bytes());
        assert_eq!(&encoded[9..13], &[0, 0, 0, 4]);
        assert_eq!(&encoded[13..], &[0x01, 0x00, 0xFF, 0xFF]);
        assert_eq!(frame.payload_length(), Some(4));
    }

    #[test]
    fn test_roundtrip_preserves_bytes() {
        let wires = [
            FrameEnvelope::video(42, vec![9u8; 1024]).encode().unwrap(),
            FrameEnvelope::video(0, Vec::<u8>::new()).encode().unwrap(),
            FrameEnvelope::audio_from_samples(u64::MAX, &[i16::MIN, i16::MAX, 0, 7])
                .encode()
                .unwrap(),
        ];
        for wire in wires {
            let decoded = FrameEnvelope::decode(&wire).unwrap();
            assert_eq!(decoded.encode().unwrap(), wire);
        }
    }

    #[test]
    fn test_short_buffers_rejected() {
        assert_eq!(
            FrameEnvelope::decode(&Bytes::new()),
            Err(WireError::Truncated {
                needed: VIDEO_HEADER_LEN,
                actual: 0
            })
        );
        assert_eq!(
            FrameEnvelope::decode(&Bytes::from_static(&[0x00, 1, 2, 3])),
            Err(WireError::Truncated {
                needed: VIDEO_HEADER_LEN,
                actual: 4
            })
        );
        // A complete video header is still too short for audio
        assert_eq!(
            FrameEnvelope::decode(&Bytes::from_static(&[0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0])),
            Err(WireError::Truncated {
                needed: AUDIO_HEADER_LEN,
                actual: 10
            })
        );
    }

    #[test]
    fn test_audio_length_overflow_rejected() {
        let mut wire = BytesMut::new();
        wire.put_u8(0x01);
        wire.put_u64(5);
        wire.put_u32(100);
        wire.extend_from_slice(&[0u8; 10]);

        assert_eq!(
            FrameEnvelope::decode(&wire.freeze()),
            Err(WireError::LengthOverflow {
                declared: 100,
                remaining: 10
            })
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let wire = Bytes::from_static(&[0x07, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(FrameEnvelope::decode(&wire), Err(WireError::UnknownKind(0x07)));
    }

    #[test]
    fn test_pcm_samples() {
        let frame = FrameEnvelope::audio_from_samples(0, &[100, -200, 300, -400]);
        assert_eq!(frame.pcm_samples().unwrap(), vec![100, -200, 300, -400]);
        assert!(FrameEnvelope::video(0, vec![1u8]).pcm_samples().is_none());
    }
}
