//! Word and sentence framing for the router management API.
//!
//! A word is a length prefix followed by that many bytes. The prefix is 1 to 5
//! bytes long; the high bits of the first byte tell how many follow. A sentence
//! is a run of words closed by a zero-length word.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ApiError;

/// Largest word we accept from the wire. Replies are row-per-sentence, so
/// anything above this is a framing error rather than real data.
const MAX_WORD_LEN: u32 = 16 * 1024 * 1024;

pub fn encode_length(len: u32, out: &mut Vec<u8>) {
    match len {
        0..=0x7F => out.push(len as u8),
        0x80..=0x3FFF => out.extend_from_slice(&((len | 0x8000) as u16).to_be_bytes()),
        0x4000..=0x1F_FFFF => out.extend_from_slice(&(len | 0xC0_0000).to_be_bytes()[1..]),
        0x20_0000..=0x0FFF_FFFF => out.extend_from_slice(&(len | 0xE000_0000).to_be_bytes()),
        _ => {
            out.push(0xF0);
            out.extend_from_slice(&len.to_be_bytes());
        }
    }
}

pub fn encode_word(word: &str, out: &mut Vec<u8>) {
    encode_length(word.len() as u32, out);
    out.extend_from_slice(word.as_bytes());
}

/// Encodes a full sentence including the terminating empty word.
pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.iter().map(|w| w.as_ref().len() + 2).sum::<usize>() + 1);
    for word in words {
        encode_word(word.as_ref(), &mut out);
    }
    out.push(0);
    out
}

async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32, ApiError> {
    let first = reader.read_u8().await?;
    let (extra, mut value) = match first {
        b if b & 0x80 == 0x00 => (0, b as u32),
        b if b & 0xC0 == 0x80 => (1, (b & 0x3F) as u32),
        b if b & 0xE0 == 0xC0 => (2, (b & 0x1F) as u32),
        b if b & 0xF0 == 0xE0 => (3, (b & 0x0F) as u32),
        0xF0 => (4, 0),
        b => {
            return Err(ApiError::Protocol(format!(
                "reserved control byte 0x{b:02x} in length prefix"
            )))
        }
    };
    for _ in 0..extra {
        value = (value << 8) | reader.read_u8().await? as u32;
    }
    Ok(value)
}

pub async fn read_word<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, ApiError> {
    let len = read_length(reader).await?;
    if len > MAX_WORD_LEN {
        return Err(ApiError::Protocol(format!("word length {len} exceeds limit")));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|e| ApiError::Protocol(format!("non UTF-8 word: {e}")))
}

/// Reads words until the terminating empty word. An empty sentence is skipped.
pub async fn read_sentence<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<String>, ApiError> {
    loop {
        let mut words = Vec::new();
        loop {
            let word = read_word(reader).await?;
            if word.is_empty() {
                break;
            }
            words.push(word);
        }
        if !words.is_empty() {
            return Ok(words);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn length_bytes(len: u32) -> Vec<u8> {
        let mut out = Vec::new();
        encode_length(len, &mut out);
        out
    }

    #[test]
    fn test_length_prefix_boundaries() {
        assert_eq!(length_bytes(0x00), vec![0x00]);
        assert_eq!(length_bytes(0x7F), vec![0x7F]);
        assert_eq!(length_bytes(0x80), vec![0x80, 0x80]);
        assert_eq!(length_bytes(0x3FFF), vec![0xBF, 0xFF]);
        assert_eq!(length_bytes(0x4000), vec![0xC0, 0x40, 0x00]);
        assert_eq!(length_bytes(0x1F_FFFF), vec![0xDF, 0xFF, 0xFF]);
        assert_eq!(length_bytes(0x20_0000), vec![0xE0, 0x20, 0x00, 0x00]);
        assert_eq!(length_bytes(0x1000_0000), vec![0xF0, 0x10, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_read_sentence_decodes_multi_byte_lengths() {
        let long_value = "x".repeat(200);
        let words = vec!["!re".to_string(), format!("=comment={long_value}")];
        let bytes = encode_sentence(&words);
        let mut reader = bytes.as_slice();

        let decoded = read_sentence(&mut reader).await.unwrap();

        assert_eq!(decoded, words);
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_read_sentence_skips_empty_sentences() {
        let mut bytes = vec![0u8, 0u8];
        bytes.extend(encode_sentence(&["!done"]));
        let mut reader = bytes.as_slice();

        assert_eq!(read_sentence(&mut reader).await.unwrap(), vec!["!done"]);
    }

    #[tokio::test]
    async fn test_reserved_control_byte_is_protocol_error() {
        let bytes = [0xF8u8, 0x00];
        let mut reader = &bytes[..];

        let err = read_word(&mut reader).await.unwrap_err();
        assert!(matches!(err, ApiError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_truncated_word_is_transport_reset() {
        let bytes = [0x05u8, b'a', b'b'];
        let mut reader = &bytes[..];

        let err = read_word(&mut reader).await.unwrap_err();
        assert!(matches!(err, ApiError::TransportReset(_)));
    }
}
