//! Encoding. Message channels carry one bincode-encoded `Message` per channel message;
//! stream transports add framing: length-prefix (4 bytes LE) + bincode payload.

use crate::protocol::Message;

const LEN_SIZE: usize = 4;

/// Hard ceiling on a single encoded message, whatever the configured limit says.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Encode a message for a message-boundary-preserving channel.
/// Fails if the encoding exceeds `max_len` bytes.
pub fn encode_message(msg: &Message, max_len: usize) -> Result<Vec<u8>, EncodeError> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > max_len.min(MAX_FRAME_LEN as usize) {
        return Err(EncodeError::TooLarge {
            len: payload.len(),
            max: max_len,
        });
    }
    Ok(payload)
}

/// Decode one whole channel message.
pub fn decode_message(bytes: &[u8], max_len: usize) -> Result<Message, DecodeError> {
    if bytes.len() > max_len.min(MAX_FRAME_LEN as usize) {
        return Err(DecodeError::TooLarge);
    }
    Ok(bincode::deserialize(bytes)?)
}

/// Encoded size of a chunk envelope carrying `payload_len` bytes, without serializing the payload.
pub fn chunk_overhead(transfer_id_len: usize) -> usize {
    // variant tag + string length + id + index + payload length + is_last + hash
    4 + 8 + transfer_id_len + 8 + 8 + 1 + 32
}

/// Prefix an already-encoded message with its length, for stream transports.
pub fn encode_frame(message: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if message.len() > MAX_FRAME_LEN as usize {
        return Err(EncodeError::TooLarge {
            len: message.len(),
            max: MAX_FRAME_LEN as usize,
        });
    }
    let len = message.len() as u32;
    let mut out = Vec::with_capacity(LEN_SIZE + message.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(message);
    Ok(out)
}

/// Split one frame off the front of `bytes`. Returns the message bytes and the number of bytes consumed.
/// Call with partial buffer; returns `NeedMore` if not enough bytes (caller should try again after more data).
pub fn decode_frame(bytes: &[u8]) -> Result<(&[u8], usize), DecodeError> {
    if bytes.len() < LEN_SIZE {
        return Err(DecodeError::NeedMore);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if len > MAX_FRAME_LEN {
        return Err(DecodeError::TooLarge);
    }
    let len = len as usize;
    if bytes.len() < LEN_SIZE + len {
        return Err(DecodeError::NeedMore);
    }
    Ok((&bytes[LEN_SIZE..LEN_SIZE + len], LEN_SIZE + len))
}

/// Error encoding a message (bincode or size limit).
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("message too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },
}

/// Error decoding a message or frame (need more bytes, too large, or bincode failure).
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("message too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TransferId;

    fn sample_chunk(len: usize) -> Message {
        let payload = vec![7u8; len];
        Message::Chunk {
            transfer_id: TransferId::generate(),
            index: 3,
            hash: crate::integrity::hash_chunk(&payload),
            payload,
            is_last: false,
        }
    }

    #[test]
    fn message_roundtrip() {
        let msg = sample_chunk(100);
        let bytes = encode_message(&msg, 1024).unwrap();
        assert_eq!(decode_message(&bytes, 1024).unwrap(), msg);
    }

    #[test]
    fn chunk_overhead_matches_bincode() {
        let msg = sample_chunk(500);
        let id_len = msg.transfer_id().unwrap().as_str().len();
        let bytes = encode_message(&msg, usize::MAX).unwrap();
        assert_eq!(bytes.len(), 500 + chunk_overhead(id_len));
    }

    #[test]
    fn oversized_message_rejected() {
        let msg = sample_chunk(2048);
        assert!(matches!(
            encode_message(&msg, 1024),
            Err(EncodeError::TooLarge { .. })
        ));
        let bytes = encode_message(&msg, 4096).unwrap();
        assert!(matches!(
            decode_message(&bytes, 1024),
            Err(DecodeError::TooLarge)
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            decode_message(&[0xff, 0xff, 0xff, 0xff, 1], 1024),
            Err(DecodeError::Decode(_))
        ));
    }

    #[test]
    fn partial_read_need_more() {
        let frame = encode_frame(b"hello").unwrap();
        assert!(matches!(decode_frame(&frame[..2]), Err(DecodeError::NeedMore)));
        assert!(matches!(
            decode_frame(&frame[..LEN_SIZE]),
            Err(DecodeError::NeedMore)
        ));
    }

    #[test]
    fn multiple_frames() {
        let fa = encode_frame(b"first").unwrap();
        let fb = encode_frame(b"second!").unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(&fa);
        buf.extend_from_slice(&fb);
        let (m1, n1) = decode_frame(&buf).unwrap();
        assert_eq!(m1, b"first");
        assert_eq!(n1, fa.len());
        let (m2, n2) = decode_frame(&buf[n1..]).unwrap();
        assert_eq!(m2, b"second!");
        assert_eq!(n2, fb.len());
    }

    #[test]
    fn oversized_prefix_rejected() {
        let prefix = (MAX_FRAME_LEN + 1).to_le_bytes();
        assert!(matches!(decode_frame(&prefix), Err(DecodeError::TooLarge)));
    }
}
