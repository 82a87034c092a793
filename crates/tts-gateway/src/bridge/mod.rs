//! Wire bridge between the gateway and the TTS backend.
//!
//! # Architecture
//!
//! - **protocol**: The backend request record and its content type
//! - **codec**: Byte-exact MessagePack encoder for that record

pub mod codec;
pub mod protocol;

pub use codec::{CodecError, TtsRequestCodec, encode_request};
pub use protocol::{CONTENT_TYPE_MSGPACK, TtsRequest};
