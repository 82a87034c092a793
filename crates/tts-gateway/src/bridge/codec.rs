//! MessagePack encoder for backend requests.
//!
//! The output must be byte-identical to what the backend's reference MessagePack
//! library produces for the same record, so every value uses its smallest tag.
//! Tag selection is left to `rmp`; this module fixes entry order and limits.

use std::io;

use rmp::encode::{self, ValueWriteError};
use tokio_util::bytes::buf::Writer;
use tokio_util::bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Encoder;

use super::protocol::TtsRequest;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    #[error("Map with {0} entries exceeds the map16 limit")]
    MapTooLarge(usize),
    #[error("String of {0} bytes exceeds the str32 limit")]
    StringTooLong(usize),
    #[error("I/O error while encoding: {0}")]
    Io(String),
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        CodecError::Io(e.to_string())
    }
}

impl From<ValueWriteError> for CodecError {
    fn from(e: ValueWriteError) -> Self {
        CodecError::Io(e.to_string())
    }
}

/// Low-level MessagePack writer appending to a `BytesMut`.
pub struct MsgpackWriter<'a> {
    out: Writer<&'a mut BytesMut>,
}

impl<'a> MsgpackWriter<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { out: buf.writer() }
    }

    /// Map headers stop at map16; the backend never receives larger maps.
    pub fn write_map_header(&mut self, size: usize) -> Result<(), CodecError> {
        let len = u16::try_from(size).map_err(|_| CodecError::MapTooLarge(size))?;
        encode::write_map_len(&mut self.out, u32::from(len))?;
        Ok(())
    }

    pub fn write_str(&mut self, value: &str) -> Result<(), CodecError> {
        if u32::try_from(value.len()).is_err() {
            return Err(CodecError::StringTooLong(value.len()));
        }
        encode::write_str(&mut self.out, value)?;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), CodecError> {
        encode::write_bool(&mut self.out, value)?;
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<(), CodecError> {
        encode::write_f64(&mut self.out, value)?;
        Ok(())
    }
}

/// Codec that writes a [`TtsRequest`] as a MessagePack map.
///
/// Entries follow the struct's declared order; absent optionals are skipped and
/// the map header counts only what is written.
#[derive(Debug, Default, Clone, Copy)]
pub struct TtsRequestCodec;

impl TtsRequestCodec {
    pub fn new() -> Self {
        Self
    }
}

impl<'r> Encoder<&'r TtsRequest> for TtsRequestCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &'r TtsRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let reference_id = item.reference_id();

        // text, streaming, format are always present
        let size = 3
            + usize::from(reference_id.is_some())
            + usize::from(item.top_p.is_some())
            + usize::from(item.temperature.is_some());

        let start = dst.len();
        let mut w = MsgpackWriter::new(dst);
        w.write_map_header(size)?;

        w.write_str("text")?;
        w.write_str(&item.text)?;

        if let Some(id) = reference_id {
            w.write_str("reference_id")?;
            w.write_str(id)?;
        }

        w.write_str("streaming")?;
        w.write_bool(item.streaming)?;

        w.write_str("format")?;
        w.write_str(&item.format)?;

        if let Some(top_p) = item.top_p {
            w.write_str("top_p")?;
            w.write_f64(top_p)?;
        }

        if let Some(temperature) = item.temperature {
            w.write_str("temperature")?;
            w.write_f64(temperature)?;
        }

        tracing::trace!(payload_bytes = dst.len() - start, "Encoded backend request");
        Ok(())
    }
}

/// Encode a request into a standalone payload.
pub fn encode_request(request: &TtsRequest) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(64 + request.text.len());
    TtsRequestCodec::new().encode(request, &mut buf)?;
    Ok(buf.freeze())
}
