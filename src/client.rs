//! Client side of the wire protocol.
//!
//! [`parse_command`] turns a line like `set_balance 12345 1500.50` into a
//! [`Request`], rejecting bad input locally so nothing is sent. [`Client`]
//! performs one request/response exchange per call over a persistent
//! connection.

use crate::protocol::{self, FrameError, Request, Response};
use bytes::BytesMut;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Input rejected before anything is sent
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("Invalid command")]
    InvalidCommand,
    #[error("Missing amount")]
    MissingAmount,
    #[error("Invalid amount")]
    InvalidAmount,
    #[error("Missing credit amount")]
    MissingCredit,
    #[error("Invalid credit amount")]
    InvalidCredit,
    #[error("Unknown command")]
    UnknownCommand,
}

/// Exchange failures
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to read response: {0}")]
    Frame(#[from] FrameError),

    #[error("invalid response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed by server")]
    Closed,
}

/// Parse `action id [number]` into a request
pub fn parse_command(line: &str) -> Result<Request, CommandError> {
    let mut tokens = line.split_whitespace();
    let (Some(action), Some(number)) = (tokens.next(), tokens.next()) else {
        return Err(CommandError::InvalidCommand);
    };
    let number = number.to_string();

    match action {
        "set_balance" => {
            let amount = tokens.next().ok_or(CommandError::MissingAmount)?;
            let amount = parse_number(amount).ok_or(CommandError::InvalidAmount)?;
            Ok(Request::SetBalance { number, amount })
        }
        "set_credit" => {
            let credit = tokens.next().ok_or(CommandError::MissingCredit)?;
            let credit = parse_number(credit).ok_or(CommandError::InvalidCredit)?;
            Ok(Request::SetCredit { number, credit })
        }
        "get_balance" => Ok(Request::GetBalance { number }),
        "get_credit" => Ok(Request::GetCredit { number }),
        _ => Err(CommandError::UnknownCommand),
    }
}

// JSON has no representation for NaN or infinity
fn parse_number(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// A persistent connection to the registry server
pub struct Client {
    stream: BufReader<TcpStream>,
    line: String,
    out: BytesMut,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            stream: BufReader::new(stream),
            line: String::new(),
            out: BytesMut::new(),
        })
    }

    /// Send one request and wait for its response
    pub async fn call(&mut self, request: &Request) -> Result<Response, ClientError> {
        self.out.clear();
        protocol::encode(request, &mut self.out)?;
        self.stream.write_all(&self.out).await?;
        self.stream.flush().await?;

        if !protocol::read_record(&mut self.stream, &mut self.line).await? {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(&self.line)?)
    }
}
