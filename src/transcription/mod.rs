//! Streaming dictation protocol
//!
//! - `auth` - per-connection HMAC signing and URL derivation
//! - `frame` - sample blocks to wire frames (first / continuation / last)
//! - `messages` - serde types for both directions
//! - `decoder` - inbound messages to `TranscriptionEvent`s
//! - `transport` - connection abstraction and the WebSocket implementation

pub mod auth;
pub mod decoder;
pub mod frame;
pub mod messages;
pub mod transport;

pub use auth::{AuthorizationContext, Credentials};
pub use decoder::{decode, TranscriptionEvent};
pub use frame::{AudioFrame, FrameEncoder, FrameKind, RecognitionParams};
pub use transport::{SpeechConnector, SpeechTransport, WsConnector, WsTransport};
