//! Line-delimited JSON wire format shared by server and client.
//!
//! Every message is one JSON object followed by `\n`:
//!
//! ```text
//! -> {"action":"set_balance","number":"12345","amount":1500.5}
//! <- {"status":"Balance updated"}
//! -> {"action":"get_balance","number":"12345"}
//! <- {"balance":1500.5}
//! ```
//!
//! Requests are decoded in two steps. The envelope (`action` and `number`)
//! must be present for the record to count as a request at all; failing it
//! is a [`FrameError`] and ends the connection. The typed [`Request`] is
//! checked afterwards and a problem there is a [`RequestError`], which the
//! server answers with an error response. Splitting the two lets the server
//! resolve the account first, so an unknown account is reported as such
//! whatever the rest of the record looks like.
//!
//! Records are delimited by newlines, not by the JSON value boundary. A
//! peer that streams objects back to back without `\n` gets no answer until
//! it sends one, and two objects on one line are a malformed record.

use bytes::{BufMut, BytesMut};
use serde::{de, Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest record accepted, excluding the trailing newline
pub const MAX_RECORD_LENGTH: usize = 64 * 1024;

/// Actions understood by the server
pub const ACTIONS: [&str; 4] = ["set_balance", "get_balance", "set_credit", "get_credit"];

// Largest magnitude at which every integer is exactly representable in f64
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

/// A validated request, tagged by `action`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    SetBalance { number: String, amount: f64 },
    GetBalance { number: String },
    SetCredit { number: String, credit: f64 },
    GetCredit { number: String },
}

impl Request {
    /// Target account id
    pub fn number(&self) -> &str {
        match self {
            Request::SetBalance { number, .. }
            | Request::GetBalance { number }
            | Request::SetCredit { number, .. }
            | Request::GetCredit { number } => number,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Request::SetBalance { .. } => "set_balance",
            Request::GetBalance { .. } => "get_balance",
            Request::SetCredit { .. } => "set_credit",
            Request::GetCredit { .. } => "get_credit",
        }
    }
}

/// A response record. Each variant serializes as a single-key object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Balance(#[serde(serialize_with = "serialize_number")] f64),
    Credit(#[serde(serialize_with = "serialize_number")] f64),
    Status(String),
    Error(String),
}

impl Response {
    pub fn balance_updated() -> Self {
        Response::Status("Balance updated".to_string())
    }

    pub fn credit_updated() -> Self {
        Response::Status("Credit updated".to_string())
    }

    pub fn account_not_found() -> Self {
        Response::Error("Account not found".to_string())
    }

    pub fn from_request_error(error: &RequestError) -> Self {
        Response::Error(error.to_string())
    }
}

/// Failures that leave the stream unusable. The connection is closed.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("record exceeds {limit} bytes")]
    TooLong { limit: usize },

    #[error("record truncated by end of stream")]
    Truncated,

    #[error("malformed record: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Failures confined to one request. The connection stays open.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("Unknown action")]
    UnknownAction,

    #[error("Invalid request: {0}")]
    Invalid(String),
}

/// A decoded record: the envelope plus the outcome of typed validation
#[derive(Debug)]
pub struct Frame {
    pub action: String,
    pub number: String,
    pub request: Result<Request, RequestError>,
}

#[derive(Deserialize)]
struct Envelope {
    action: String,
    number: String,
}

/// Decode one record (without its line terminator)
pub fn decode(line: &str) -> Result<Frame, FrameError> {
    let value: Value = serde_json::from_str(line).map_err(FrameError::Malformed)?;
    if !value.is_object() {
        return Err(FrameError::Malformed(de::Error::custom("expected a JSON object")));
    }
    let envelope = Envelope::deserialize(&value).map_err(FrameError::Malformed)?;

    let request = if ACTIONS.contains(&envelope.action.as_str()) {
        Request::deserialize(&value).map_err(|e| RequestError::Invalid(e.to_string()))
    } else {
        Err(RequestError::UnknownAction)
    };

    Ok(Frame {
        action: envelope.action,
        number: envelope.number,
        request,
    })
}

/// Append one record and its newline to `buf`
pub fn encode<T: Serialize>(record: &T, buf: &mut BytesMut) -> Result<(), serde_json::Error> {
    serde_json::to_writer((&mut *buf).writer(), record)?;
    buf.put_u8(b'\n');
    Ok(())
}

/// Read the next non-blank record into `line`, stripped of its terminator.
///
/// Returns `Ok(false)` on a clean end of stream. Bytes arriving after the
/// last newline are reported as [`FrameError::Truncated`] and never decoded.
pub async fn read_record<R>(reader: &mut R, line: &mut String) -> Result<bool, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        line.clear();

        // Room for the record plus a `\r\n` terminator
        let n = (&mut *reader)
            .take(MAX_RECORD_LENGTH as u64 + 2)
            .read_line(line)
            .await?;
        if n == 0 {
            return Ok(false);
        }

        if !line.ends_with('\n') {
            if n > MAX_RECORD_LENGTH {
                return Err(FrameError::TooLong {
                    limit: MAX_RECORD_LENGTH,
                });
            }
            return Err(FrameError::Truncated);
        }

        let trimmed_len = line.trim_end_matches(['\r', '\n']).len();
        if trimmed_len > MAX_RECORD_LENGTH {
            return Err(FrameError::TooLong {
                limit: MAX_RECORD_LENGTH,
            });
        }
        line.truncate(trimmed_len);

        if !line.trim().is_empty() {
            return Ok(true);
        }
    }
}

/// Write integral values without a fractional part (`750`, not `750.0`).
/// Negative zero keeps its sign.
fn serialize_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    let negative_zero = *value == 0.0 && value.is_sign_negative();
    if value.fract() == 0.0 && value.abs() < EXACT_INTEGER_LIMIT && !negative_zero {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn encoded<T: Serialize>(record: &T) -> String {
        let mut buf = BytesMut::new();
        encode(record, &mut buf).unwrap();
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn test_decode_set_balance() {
        let frame = decode(r#"{"action":"set_balance","number":"12345","amount":1500.50}"#).unwrap();
        assert_eq!(frame.action, "set_balance");
        assert_eq!(frame.number, "12345");
        assert_eq!(
            frame.request,
            Ok(Request::SetBalance {
                number: "12345".to_string(),
                amount: 1500.5
            })
        );
    }

    #[test]
    fn test_decode_integer_payload() {
        let frame = decode(r#"{"action":"set_credit","number":"12345","credit":750}"#).unwrap();
        assert_eq!(
            frame.request,
            Ok(Request::SetCredit {
                number: "12345".to_string(),
                credit: 750.0
            })
        );
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let frame = decode(r#"{"action":"get_credit","number":"67890","amount":1}"#).unwrap();
        assert_eq!(
            frame.request,
            Ok(Request::GetCredit {
                number: "67890".to_string()
            })
        );
    }

    #[test]
    fn test_decode_unknown_action() {
        let frame = decode(r#"{"action":"delete_account","number":"12345"}"#).unwrap();
        assert_eq!(frame.number, "12345");
        assert_eq!(frame.request, Err(RequestError::UnknownAction));
    }

    #[test]
    fn test_decode_missing_amount() {
        let frame = decode(r#"{"action":"set_balance","number":"12345"}"#).unwrap();
        match frame.request {
            Err(RequestError::Invalid(msg)) => assert!(msg.contains("amount"), "{msg}"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_wrong_typed_credit() {
        let frame = decode(r#"{"action":"set_credit","number":"12345","credit":"lots"}"#).unwrap();
        assert!(matches!(frame.request, Err(RequestError::Invalid(_))));
    }

    #[test]
    fn test_decode_malformed_envelope() {
        for line in [
            "not json",
            "[1,2,3]",
            r#"["get_balance","12345"]"#,
            r#"{"number":"12345"}"#,
            r#"{"action":"get_balance"}"#,
            r#"{"action":"get_balance","number":12345}"#,
        ] {
            assert!(
                matches!(decode(line), Err(FrameError::Malformed(_))),
                "accepted {line}"
            );
        }
    }

    #[test]
    fn test_encode_responses() {
        assert_eq!(encoded(&Response::balance_updated()), "{\"status\":\"Balance updated\"}\n");
        assert_eq!(encoded(&Response::Balance(1500.5)), "{\"balance\":1500.5}\n");
        assert_eq!(encoded(&Response::Credit(750.0)), "{\"credit\":750}\n");
        assert_eq!(encoded(&Response::Balance(-3.0)), "{\"balance\":-3}\n");
        assert_eq!(encoded(&Response::Balance(0.0)), "{\"balance\":0}\n");
        assert_eq!(encoded(&Response::Balance(-0.0)), "{\"balance\":-0.0}\n");
        assert_eq!(encoded(&Response::account_not_found()), "{\"error\":\"Account not found\"}\n");
        assert_eq!(
            encoded(&Response::from_request_error(&RequestError::UnknownAction)),
            "{\"error\":\"Unknown action\"}\n"
        );
    }

    #[test]
    fn test_encode_request() {
        let request = Request::SetBalance {
            number: "12345".to_string(),
            amount: 10.25,
        };
        assert_eq!(
            encoded(&request),
            "{\"action\":\"set_balance\",\"number\":\"12345\",\"amount\":10.25}\n"
        );
        assert_eq!(request.action(), "set_balance");
        assert_eq!(request.number(), "12345");
    }

    #[test]
    fn test_response_decodes_integral_numbers() {
        let response: Response = serde_json::from_str(r#"{"credit":750}"#).unwrap();
        assert_eq!(response, Response::Credit(750.0));
    }

    #[tokio::test]
    async fn test_read_record_skips_blank_lines() {
        let mut reader = BufReader::new(&b"\n  \r\n{\"a\":1}\r\n{\"b\":2}\n"[..]);
        let mut line = String::new();

        assert!(read_record(&mut reader, &mut line).await.unwrap());
        assert_eq!(line, "{\"a\":1}");
        assert!(read_record(&mut reader, &mut line).await.unwrap());
        assert_eq!(line, "{\"b\":2}");
        assert!(!read_record(&mut reader, &mut line).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_record_truncated() {
        let mut reader = BufReader::new(&b"{\"a\":1}\n{\"action\":\"set_bal"[..]);
        let mut line = String::new();

        assert!(read_record(&mut reader, &mut line).await.unwrap());
        assert!(matches!(
            read_record(&mut reader, &mut line).await,
            Err(FrameError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_read_record_too_long() {
        let mut data = vec![b'x'; MAX_RECORD_LENGTH + 10];
        data.push(b'\n');
        let mut reader = BufReader::new(&data[..]);
        let mut line = String::new();

        assert!(matches!(
            read_record(&mut reader, &mut line).await,
            Err(FrameError::TooLong { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_record_at_limit() {
        let mut data = vec![b'x'; MAX_RECORD_LENGTH];
        data.push(b'\n');
        let mut reader = BufReader::new(&data[..]);
        let mut line = String::new();

        assert!(read_record(&mut reader, &mut line).await.unwrap());
        assert_eq!(line.len(), MAX_RECORD_LENGTH);
    }

    #[tokio::test]
    async fn test_read_record_at_limit_with_crlf() {
        let mut data = vec![b'x'; MAX_RECORD_LENGTH];
        data.extend_from_slice(b"\r\n");
        data.extend_from_slice(b"{}\n");
        let mut reader = BufReader::new(&data[..]);
        let mut line = String::new();

        assert!(read_record(&mut reader, &mut line).await.unwrap());
        assert_eq!(line.len(), MAX_RECORD_LENGTH);
        assert!(read_record(&mut reader, &mut line).await.unwrap());
        assert_eq!(line, "{}");
    }

    #[tokio::test]
    async fn test_read_record_one_over_limit() {
        for terminator in [&b"\n"[..], &b"\r\n"[..]] {
            let mut data = vec![b'x'; MAX_RECORD_LENGTH + 1];
            data.extend_from_slice(terminator);
            let mut reader = BufReader::new(&data[..]);
            let mut line = String::new();

            assert!(matches!(
                read_record(&mut reader, &mut line).await,
                Err(FrameError::TooLong { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_objects_without_newline_are_not_records() {
        let two = r#"{"action":"get_balance","number":"12345"}{"action":"get_credit","number":"12345"}"#;
        let mut data = two.as_bytes().to_vec();
        data.push(b'\n');
        let mut reader = BufReader::new(&data[..]);
        let mut line = String::new();

        assert!(read_record(&mut reader, &mut line).await.unwrap());
        assert!(matches!(decode(&line), Err(FrameError::Malformed(_))));

        let mut reader = BufReader::new(&br#"{"action":"get_balance","number":"12345"}"#[..]);
        assert!(matches!(
            read_record(&mut reader, &mut line).await,
            Err(FrameError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_read_record_invalid_utf8() {
        let mut reader = BufReader::new(&b"\xff\xfe\n"[..]);
        let mut line = String::new();

        assert!(matches!(
            read_record(&mut reader, &mut line).await,
            Err(FrameError::Io(_))
        ));
    }
}
