use serde::{Deserialize, Serialize};

/// Frame sent to the dictation service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub header: RequestHeader,
    /// Present on the first frame only
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parameter: Option<Parameter>,
    pub payload: RequestPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestHeader {
    pub app_id: String,
    pub status: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub iat: IatParameter,
}

/// Recognition parameters declared by the first frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IatParameter {
    pub domain: String,
    pub language: String,
    pub accent: String,
    /// Trailing silence (ms) after which the service ends the utterance
    pub eos: u32,
    pub vinfo: u8,
    /// Dynamic correction mode
    pub dwa: String,
    pub result: ResultFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFormat {
    pub encoding: String,
    pub compress: String,
    pub format: String,
}

impl Default for ResultFormat {
    fn default() -> Self {
        Self {
            encoding: "utf8".to_string(),
            compress: "raw".to_string(),
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub audio: AudioPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub seq: u32,
    pub status: u8,
    /// Base64 PCM; empty on the first and last frame
    pub audio: String,
}

/// Message received from the dictation service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub header: Option<ResponseHeader>,
    #[serde(default)]
    pub payload: Option<ResponsePayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseHeader {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default)]
    pub status: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsePayload {
    #[serde(default)]
    pub result: Option<ResultBlock>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultBlock {
    /// Base64 of the inner recognition JSON
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub status: Option<u8>,
    #[serde(default)]
    pub seq: Option<u32>,
}

/// Inner recognition result (the decoded `result.text` block)
///
/// Two layouts exist: the current flat `ws` word array and the legacy
/// `cn.st.rt[].ws` sentence tree.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecognitionResult {
    #[serde(default)]
    pub ws: Option<Vec<WordEntry>>,
    #[serde(default)]
    pub cn: Option<LegacyResult>,
    /// Sentence number
    #[serde(default)]
    pub sn: Option<u32>,
    /// Whether this is the last sentence
    #[serde(default)]
    pub ls: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WordEntry {
    #[serde(default)]
    pub cw: Vec<Candidate>,
}

impl WordEntry {
    /// First candidate's text, if non-empty
    pub fn best(&self) -> Option<&str> {
        self.cw
            .first()
            .map(|c| c.w.as_str())
            .filter(|w| !w.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub w: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyResult {
    #[serde(default)]
    pub st: Option<LegacySentenceTree>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacySentenceTree {
    #[serde(default)]
    pub rt: Option<Vec<LegacySentence>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacySentence {
    #[serde(default)]
    pub ws: Vec<WordEntry>,
}
