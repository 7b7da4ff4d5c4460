//! Readiness detection from a child's output.
//!
//! Some services only tell us they are usable by printing a line once their
//! own upstream connections succeed. The watcher consumes merged
//! stdout/stderr until a predicate matches; if the stream ends first the
//! process has exited and readiness fails.

use super::managed::{ManagedProcess, describe_status};
use crate::errors::HarnessError;
use futures::stream::{self, Stream, StreamExt};
use localnet_common::ServiceKind;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// A stream of output lines, abstracting over which pipe they came from.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, io::Error>> + Send>>;

/// Split an async reader into lines. Bytes that are not UTF-8 are replaced,
/// never reported as errors, so a reader keeps draining the pipe.
pub fn lines_of<R>(reader: R) -> LineStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let segments = BufReader::new(reader).split(b'\n');
    Box::pin(stream::unfold(segments, |mut segments| async {
        match segments.next_segment().await {
            Ok(Some(mut bytes)) => {
                if bytes.last() == Some(&b'\r') {
                    bytes.pop();
                }
                Some((Ok(String::from_utf8_lossy(&bytes).into_owned()), segments))
            }
            Ok(None) => None,
            Err(e) => Some((Err(e), segments)),
        }
    }))
}

/// What counts as "ready" in a service's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessPredicate {
    /// The first line of output, whatever it says.
    AnyLine,
    /// A line containing this literal substring.
    Contains(String),
}

impl ReadinessPredicate {
    pub fn contains(needle: impl Into<String>) -> Self {
        ReadinessPredicate::Contains(needle.into())
    }

    pub fn matches(&self, line: &str) -> bool {
        match self {
            ReadinessPredicate::AnyLine => true,
            ReadinessPredicate::Contains(needle) => line.contains(needle.as_str()),
        }
    }
}

/// Forward every remaining line to the log until the pipes close.
///
/// The stream is held until it ends on its own: dropping it early closes
/// the read side and the child's next write dies with SIGPIPE.
pub fn drain_in_background(service: ServiceKind, mut lines: LineStream) {
    tokio::spawn(async move {
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => tracing::debug!(target: "localnet::service", %service, "{}", line),
                Err(err) => {
                    tracing::debug!(target: "localnet::service", %service, error = %err, "output read failed");
                }
            }
        }
    });
}

/// Block until `predicate` matches a line of `process`'s output.
///
/// Fails with [`HarnessError::ProcessExitedEarly`] if the output ends first
/// and with [`HarnessError::ReadinessTimeout`] if `limit` elapses. Once ready,
/// the rest of the output is forwarded to the log.
pub async fn wait_until_ready(
    process: &mut ManagedProcess,
    predicate: &ReadinessPredicate,
    limit: Option<Duration>,
) -> Result<(), HarnessError> {
    let service = process.service();
    let mut lines = process.take_output().ok_or_else(|| {
        HarnessError::Other(anyhow::anyhow!("output of {service} was already consumed"))
    })?;

    let watch = async {
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => {
                    tracing::debug!(target: "localnet::service", %service, "{}", line);
                    if predicate.matches(&line) {
                        return true;
                    }
                }
                Err(err) => {
                    tracing::debug!(%service, error = %err, "unreadable output line");
                }
            }
        }
        false
    };

    let matched = match limit {
        Some(limit) => tokio::time::timeout(limit, watch)
            .await
            .map_err(|_| HarnessError::ReadinessTimeout {
                service,
                timeout: limit,
            })?,
        None => watch.await,
    };

    if !matched {
        let status = process.wait_for_exit(Duration::from_secs(1)).await;
        return Err(HarnessError::ProcessExitedEarly {
            service,
            status: describe_status(status),
        });
    }

    tracing::info!(%service, pid = process.pid(), "ready");
    drain_in_background(service, lines);
    Ok(())
}
