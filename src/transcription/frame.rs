use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::messages::{
    AudioPayload, IatParameter, OutboundFrame, Parameter, RequestHeader, RequestPayload,
    ResultFormat,
};
use crate::error::{VoiceError, VoiceResult};

/// Position of a frame within the session's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Sent once after connect; declares parameters, carries no audio
    First,
    /// One captured block of audio
    Continuation,
    /// End of input; carries no audio
    Last,
}

impl FrameKind {
    /// Wire status value
    pub fn status(self) -> u8 {
        match self {
            Self::First => 0,
            Self::Continuation => 1,
            Self::Last => 2,
        }
    }

    pub fn from_status(status: u8) -> Option<Self> {
        match status {
            0 => Some(Self::First),
            1 => Some(Self::Continuation),
            2 => Some(Self::Last),
            _ => None,
        }
    }
}

/// Recognition parameters declared in the first frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionParams {
    pub domain: String,
    pub language: String,
    pub accent: String,
    /// Trailing silence in milliseconds that ends recognition
    pub eos: u32,
    pub vinfo: u8,
    pub dwa: String,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self {
            domain: "slm".to_string(),
            language: "zh_cn".to_string(),
            accent: "mandarin".to_string(),
            eos: 6000,
            vinfo: 1,
            dwa: "wpgs".to_string(),
        }
    }
}

/// One unit of transmitted audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub kind: FrameKind,
    pub seq: u32,
    /// 16-bit little-endian PCM
    pub pcm: Vec<u8>,
    /// Base64 of `pcm`
    pub payload: String,
}

impl AudioFrame {
    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}

/// Quantize one sample to signed 16-bit
///
/// Clamped before scaling so gain above unity cannot wrap; rounded rather
/// than truncated. NaN maps to silence.
pub fn quantize(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Quantize a block to little-endian PCM bytes
pub fn encode_pcm(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| quantize(s).to_le_bytes())
        .collect()
}

/// Turns sample blocks into wire frames
///
/// Pure: holds the static parts of every frame (app id, declared audio
/// format, recognition parameters) and performs no I/O.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    app_id: String,
    sample_rate: u32,
    params: RecognitionParams,
}

impl FrameEncoder {
    pub fn new(app_id: impl Into<String>, sample_rate: u32, params: RecognitionParams) -> Self {
        Self {
            app_id: app_id.into(),
            sample_rate,
            params,
        }
    }

    /// Encode a frame of the given kind
    ///
    /// First and last frames never carry audio, whatever `samples` holds.
    pub fn encode(&self, kind: FrameKind, samples: &[f32], seq: u32) -> AudioFrame {
        let pcm = match kind {
            FrameKind::Continuation => encode_pcm(samples),
            FrameKind::First | FrameKind::Last => Vec::new(),
        };
        let payload = STANDARD.encode(&pcm);

        AudioFrame {
            kind,
            seq,
            pcm,
            payload,
        }
    }

    pub fn first(&self, seq: u32) -> AudioFrame {
        self.encode(FrameKind::First, &[], seq)
    }

    /// Continuation frame for a captured block; `None` for an empty block
    pub fn continuation(&self, samples: &[f32], seq: u32) -> Option<AudioFrame> {
        if samples.is_empty() {
            return None;
        }
        Some(self.encode(FrameKind::Continuation, samples, seq))
    }

    pub fn last(&self, seq: u32) -> AudioFrame {
        self.encode(FrameKind::Last, &[], seq)
    }

    /// Wire message for a frame
    pub fn message(&self, frame: &AudioFrame) -> OutboundFrame {
        let status = frame.kind.status();

        let parameter = (frame.kind == FrameKind::First).then(|| Parameter {
            iat: IatParameter {
                domain: self.params.domain.clone(),
                language: self.params.language.clone(),
                accent: self.params.accent.clone(),
                eos: self.params.eos,
                vinfo: self.params.vinfo,
                dwa: self.params.dwa.clone(),
                result: ResultFormat::default(),
            },
        });

        OutboundFrame {
            header: RequestHeader {
                app_id: self.app_id.clone(),
                status,
            },
            parameter,
            payload: RequestPayload {
                audio: AudioPayload {
                    encoding: "raw".to_string(),
                    sample_rate: self.sample_rate,
                    channels: 1,
                    bit_depth: 16,
                    seq: frame.seq,
                    status,
                    audio: frame.payload.clone(),
                },
            },
        }
    }

    /// Serialized wire message for a frame
    pub fn to_json(&self, frame: &AudioFrame) -> VoiceResult<String> {
        serde_json::to_string(&self.message(frame))
            .map_err(|e| VoiceError::ConnectionFailed(format!("failed to serialize frame: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> FrameEncoder {
        FrameEncoder::new("app-1", 16000, RecognitionParams::default())
    }

    #[test]
    fn test_quantize_rounds_and_clamps() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(1.0), 32767);
        assert_eq!(quantize(-1.0), -32767);
        assert_eq!(quantize(0.5), 16384); // 16383.5 rounds away from zero
        assert_eq!(quantize(1.5), 32767);
        assert_eq!(quantize(-2.0), -32767);
        assert_eq!(quantize(f32::INFINITY), 32767);
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn test_out_of_range_block_stays_in_i16() {
        let pcm = encode_pcm(&[1.5, -2.0, 10.0, -10.0, 0.25]);
        let values: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();

        assert_eq!(values, vec![32767, -32767, 32767, -32767, 8192]);
    }

    #[test]
    fn test_pcm_is_little_endian_base64() {
        let frame = encoder().encode(FrameKind::Continuation, &[1.0, -1.0, 0.0], 1);
        assert_eq!(frame.pcm, vec![0xff, 0x7f, 0x01, 0x80, 0x00, 0x00]);
        assert_eq!(frame.payload, STANDARD.encode(&frame.pcm));
    }

    #[test]
    fn test_first_and_last_carry_no_audio() {
        let enc = encoder();
        assert!(enc.encode(FrameKind::First, &[0.5; 10], 1).is_empty());
        assert!(enc.last(7).payload.is_empty());
        assert!(enc.continuation(&[], 3).is_none());
    }

    #[test]
    fn test_first_frame_declares_parameters() {
        let enc = encoder();
        let json: serde_json::Value =
            serde_json::from_str(&enc.to_json(&enc.first(1)).unwrap()).unwrap();

        assert_eq!(json["header"]["app_id"], "app-1");
        assert_eq!(json["header"]["status"], 0);
        assert_eq!(json["parameter"]["iat"]["language"], "zh_cn");
        assert_eq!(json["parameter"]["iat"]["eos"], 6000);
        assert_eq!(json["parameter"]["iat"]["result"]["format"], "json");
        assert_eq!(json["payload"]["audio"]["sample_rate"], 16000);
        assert_eq!(json["payload"]["audio"]["bit_depth"], 16);
        assert_eq!(json["payload"]["audio"]["audio"], "");
    }

    #[test]
    fn test_continuation_omits_parameters() {
        let enc = encoder();
        let frame = enc.continuation(&[0.1; 4], 5).unwrap();
        let json: serde_json::Value = serde_json::from_str(&enc.to_json(&frame).unwrap()).unwrap();

        assert!(json.get("parameter").is_none());
        assert_eq!(json["header"]["status"], 1);
        assert_eq!(json["payload"]["audio"]["status"], 1);
        assert_eq!(json["payload"]["audio"]["seq"], 5);
    }

    #[test]
    fn test_status_roundtrip() {
        for kind in [FrameKind::First, FrameKind::Continuation, FrameKind::Last] {
            assert_eq!(FrameKind::from_status(kind.status()), Some(kind));
        }
        assert_eq!(FrameKind::from_status(9), None);
    }
}
