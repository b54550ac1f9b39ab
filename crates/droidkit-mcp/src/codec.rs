//! Line-delimited JSON-RPC framing.
//!
//! Every message is exactly one line of UTF-8 JSON terminated by `\n`.
//! Compact JSON serialization escapes newlines inside strings, so an encoded
//! message never spans more than one line.

use std::io::Write;

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::protocol::{JsonRpcError, Message, RequestId};

/// A line that could not be turned into a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    /// The error to report to the peer.
    pub error: JsonRpcError,
    /// The id recovered from the line, if any. Without one no response may be sent.
    pub id: Option<RequestId>,
}

/// Whether a line carries no message at all.
pub fn is_blank(line: impl AsRef<[u8]>) -> bool {
    line.as_ref().iter().all(u8::is_ascii_whitespace)
}

/// Decode one raw line. Invalid UTF-8 is a parse error like malformed JSON.
pub fn decode_bytes(line: &[u8]) -> std::result::Result<Message, DecodeError> {
    match std::str::from_utf8(line) {
        Ok(text) => decode(text),
        Err(e) => Err(DecodeError {
            error: JsonRpcError::parse_error(e),
            id: recover_id(&String::from_utf8_lossy(line)),
        }),
    }
}

/// Decode one line into a message.
///
/// Malformed JSON yields a `-32700` error; well-formed JSON that is not a
/// valid JSON-RPC envelope yields `-32600`. In both cases the request id is
/// recovered when possible so the caller can correlate the error response.
pub fn decode(line: &str) -> std::result::Result<Message, DecodeError> {
    let line = line.trim_end_matches(['\n', '\r']);

    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return Err(DecodeError {
                error: JsonRpcError::parse_error(e),
                id: recover_id(line),
            });
        }
    };

    let id = value.get("id").and_then(RequestId::from_value);
    Message::from_value(value).map_err(|error| DecodeError { error, id })
}

/// Best-effort scan of malformed JSON text for an `"id"` member.
fn recover_id(raw: &str) -> Option<RequestId> {
    let mut rest = raw;
    while let Some(pos) = rest.find("\"id\"") {
        rest = &rest[pos + 4..];
        let Some(after_colon) = rest.trim_start().strip_prefix(':') else {
            continue;
        };
        let mut values = serde_json::Deserializer::from_str(after_colon).into_iter::<Value>();
        if let Some(Ok(value)) = values.next() {
            return RequestId::from_value(&value);
        }
    }
    None
}

/// Encode a message as a single newline-terminated line.
pub fn encode(message: &Message) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Write one message and flush immediately.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = encode(message)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Blocking counterpart of [`write_message`].
pub fn write_message_blocking<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
    let line = encode(message)?;
    writer.write_all(line.as_bytes())?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CallToolResult, JsonRpcRequest, JsonRpcResponse, ToolContent};
    use serde_json::json;

    #[test]
    fn test_decode_request() {
        let msg = decode("{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n").unwrap();
        assert_eq!(msg.method(), Some("tools/list"));
        assert_eq!(msg.id(), Some(&RequestId::Number(1)));
    }

    #[test]
    fn test_malformed_json_recovers_id() {
        let err = decode(r#"{"jsonrpc":"2.0","id":42,"method":"tools/call","params":{"#).unwrap_err();
        assert_eq!(err.error.code, JsonRpcError::PARSE_ERROR);
        assert_eq!(err.id, Some(RequestId::Number(42)));

        let err = decode(r#"{"id": "req-7", "method": oops}"#).unwrap_err();
        assert_eq!(err.id, Some(RequestId::from("req-7")));
    }

    #[test]
    fn test_malformed_json_without_id() {
        let err = decode("not json at all").unwrap_err();
        assert_eq!(err.error.code, JsonRpcError::PARSE_ERROR);
        assert!(err.id.is_none());
    }

    #[test]
    fn test_invalid_envelope_keeps_id() {
        let err = decode(r#"{"jsonrpc":"2.0","id":9,"method":17}"#).unwrap_err();
        assert_eq!(err.error.code, JsonRpcError::INVALID_REQUEST);
        assert_eq!(err.id, Some(RequestId::Number(9)));
    }

    #[test]
    fn test_invalid_utf8_is_parse_error() {
        let mut line = br#"{"jsonrpc":"2.0","id":3,"method":"x","params":{"s":""#.to_vec();
        line.extend_from_slice(&[0xff, 0xfe]);
        line.extend_from_slice(b"\"}}\n");
        let err = decode_bytes(&line).unwrap_err();
        assert_eq!(err.error.code, JsonRpcError::PARSE_ERROR);
        assert_eq!(err.id, Some(RequestId::Number(3)));
    }

    #[test]
    fn test_blank_lines() {
        assert!(is_blank(""));
        assert!(is_blank("   \r\n"));
        assert!(!is_blank("{}"));
    }

    #[test]
    fn test_encode_is_single_line() {
        let result = CallToolResult {
            content: vec![ToolContent::Text {
                text: "line one\nline two".to_string(),
            }],
            is_error: Some(false),
            ..Default::default()
        };
        let msg = Message::Response(JsonRpcResponse::success(
            RequestId::Number(5),
            serde_json::to_value(&result).unwrap(),
        ));
        let line = encode(&msg).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let back = decode(&line).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_error_response_round_trip() {
        let msg = Message::Response(JsonRpcResponse::failure(
            RequestId::from("x"),
            JsonRpcError::missing_field("apk_path"),
        ));
        let back = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[tokio::test]
    async fn test_write_message_flushes_line() {
        let mut buf: Vec<u8> = Vec::new();
        let msg = Message::Request(JsonRpcRequest::new(1i64, "ping", Some(json!({}))));
        write_message(&mut buf, &msg).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with('{'));
        assert!(text.ends_with("}\n"));
    }
}
