//! Connection handler.
//!
//! Reads one record, answers it, flushes, and only then reads the next, so
//! responses leave in request order. The loop ends when the peer closes the
//! stream, a record cannot be framed or decoded, or shutdown is signalled.

use crate::protocol::{self, Frame, FrameError, Request, Response};
use crate::registry::Registry;
use bytes::BytesMut;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, trace};

const INITIAL_LINE_CAPACITY: usize = 256;

/// Serve one client until it disconnects or the stream becomes unusable.
///
/// Domain errors (unknown account, unknown action, bad payload) are answered
/// and the loop continues. A [`FrameError`] is returned to the caller and the
/// stream is dropped without a response.
pub async fn handle_connection<S>(
    stream: S,
    registry: Arc<Registry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut stream = BufReader::new(stream);
    let mut line = String::with_capacity(INITIAL_LINE_CAPACITY);
    let mut out = BytesMut::with_capacity(INITIAL_LINE_CAPACITY);

    if *shutdown.borrow_and_update() {
        return Ok(());
    }

    loop {
        let more = tokio::select! {
            result = protocol::read_record(&mut stream, &mut line) => result?,
            _ = shutdown.changed() => {
                debug!("Closing connection for shutdown");
                return Ok(());
            }
        };

        if !more {
            trace!("Connection closed by client");
            return Ok(());
        }

        let frame = protocol::decode(&line)?;
        trace!(action = %frame.action, number = %frame.number, "Processing request");

        let response = execute(&frame, &registry);

        out.clear();
        protocol::encode(&response, &mut out).map_err(io::Error::from)?;
        stream.write_all(&out).await?;
        stream.flush().await?;
    }
}

/// Apply one decoded record to the registry and build its response.
///
/// The account is resolved before the request body is examined, so an
/// unknown id wins over an unknown action or a bad payload.
pub fn execute(frame: &Frame, registry: &Registry) -> Response {
    let Some(account) = registry.lookup(&frame.number) else {
        debug!(number = %frame.number, "Account not found");
        return Response::account_not_found();
    };

    match &frame.request {
        Ok(Request::SetBalance { amount, .. }) => {
            account.set_balance(*amount);
            Response::balance_updated()
        }
        Ok(Request::GetBalance { .. }) => Response::Balance(account.balance()),
        Ok(Request::SetCredit { credit, .. }) => {
            account.set_credit(*credit);
            Response::credit_updated()
        }
        Ok(Request::GetCredit { .. }) => Response::Credit(account.credit()),
        Err(e) => {
            debug!(action = %frame.action, error = %e, "Rejected request");
            Response::from_request_error(e)
        }
    }
}
