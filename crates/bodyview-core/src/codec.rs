//! Length-prefixed message framing.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{CodecError, Message, ProtocolError};

/// Default maximum frame length (64 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Codec turning a byte stream into [`Message`]s.
///
/// Each frame is a 4-byte big-endian length followed by a JSON body. A frame
/// that is fully received but cannot be decoded yields `Some(Err(..))` so the
/// caller can drop just that message; framing failures (oversized or
/// truncated frames) surface as [`CodecError`] and end the stream.
#[derive(Debug)]
pub struct MessageCodec {
    frames: LengthDelimitedCodec,
}

impl MessageCodec {
    /// Create a codec with the given maximum frame length.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        let frames = LengthDelimitedCodec::builder()
            .max_frame_length(max_frame_length)
            .new_codec();
        Self { frames }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl Decoder for MessageCodec {
    type Item = Result<Message, ProtocolError>;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.frames.decode(src)? else {
            return Ok(None);
        };
        Ok(Some(Message::from_bytes(&frame)))
    }
}

impl Encoder<&Message> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.to_bytes()?;
        self.frames.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}
