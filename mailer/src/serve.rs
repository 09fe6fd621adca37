//! Line-oriented submission loop.
//!
//! Every input line is one JSON [`SendRequest`]. Each gets exactly one
//! [`Reply`] line on the output, in input order. The loop ends at end of
//! input or when a lifecycle [`Signal`] arrives; it never waits for
//! delivery, only for the job to be queued.

use mailer_common::{Signal, internal, tracing};
use mailer_dispatch::{Message, Submitter};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::broadcast,
};

use crate::request::SendRequest;

/// Answer to one input line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    Accepted { id: String },
    Rejected { error: String },
}

/// What a finished [`serve`] loop handled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServeSummary {
    pub accepted: usize,
    pub rejected: usize,
}

/// Queue one request line.
pub async fn handle_line(line: &str, submitter: &Submitter) -> Reply {
    let message = match SendRequest::from_json(line).and_then(Message::try_from) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!(error = %err, "Rejected send request");
            return Reply::Rejected {
                error: err.to_string(),
            };
        }
    };

    let to = message.to().to_string();
    match submitter.submit(message).await {
        Ok(id) => {
            tracing::debug!(job_id = %id, %to, "Accepted send request");
            Reply::Accepted { id: id.to_string() }
        }
        Err(err) => {
            tracing::warn!(%to, error = %err, "Could not queue send request");
            Reply::Rejected {
                error: err.to_string(),
            }
        }
    }
}

/// Read requests from `input` until it ends or `signal` fires.
///
/// Blank lines are skipped. A request still waiting for queue capacity when
/// the signal arrives gets no reply.
pub async fn serve<R, W>(
    input: R,
    mut output: W,
    submitter: &Submitter,
    mut signal: broadcast::Receiver<Signal>,
) -> std::io::Result<ServeSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut summary = ServeSummary::default();

    loop {
        let line = tokio::select! {
            biased;
            sig = stopped(&mut signal) => {
                internal!(level = INFO, "Received {sig:?}, no longer reading requests");
                break;
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            internal!(level = INFO, "End of input");
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = tokio::select! {
            biased;
            sig = stopped(&mut signal) => {
                internal!(level = INFO, "Received {sig:?} while waiting for queue capacity");
                break;
            }
            reply = handle_line(line, submitter) => reply,
        };

        match reply {
            Reply::Accepted { .. } => summary.accepted += 1,
            Reply::Rejected { .. } => summary.rejected += 1,
        }

        let mut encoded = serde_json::to_string(&reply)?;
        encoded.push('\n');
        output.write_all(encoded.as_bytes()).await?;
        output.flush().await?;
    }

    Ok(summary)
}

/// Resolves on the first signal. A closed channel never resolves.
async fn stopped(signal: &mut broadcast::Receiver<Signal>) -> Signal {
    loop {
        match signal.recv().await {
            Ok(sig) => return sig,
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
