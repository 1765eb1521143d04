// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State and log stream ingestion.
//!
//! Both loops consume frames strictly in receive order and end cleanly on
//! client EOF, on a receive error, or when the stream's cancellation token
//! fires. A frame that fails to apply is logged and skipped; the stream
//! stays open.

use futures::{Stream, StreamExt};
use ssm_protocol::{AgentStateRequest, LogLine};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::db::agents::{Agent, AgentStatus};
use crate::db::logs::LogSource;
use crate::registry::AgentRegistry;

impl From<&AgentStateRequest> for AgentStatus {
    fn from(frame: &AgentStateRequest) -> Self {
        AgentStatus {
            online: frame.online,
            installed: frame.installed,
            running: frame.running,
            cpu: frame.cpu,
            ram: frame.ram,
            installed_sf_version: frame.installed_sf_version,
            latest_sf_version: frame.latest_sf_version,
        }
    }
}

/// Why a stream loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Client closed its side.
    Eof,
    /// Shutdown or replacement.
    Cancelled,
    /// Receiving the next frame failed.
    RecvError(String),
}

/// Counters of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// Frames applied.
    pub applied: u64,
    /// Frames skipped (apply failure, unknown source, missing log document).
    pub dropped: u64,
    /// How the stream ended.
    pub end: StreamEnd,
}

impl StreamSummary {
    fn new() -> Self {
        Self {
            applied: 0,
            dropped: 0,
            end: StreamEnd::Eof,
        }
    }
}

/// Apply state frames for `agent` until the stream ends.
pub async fn ingest_state_stream<S>(
    registry: &AgentRegistry,
    agent: &Agent,
    mut frames: S,
    cancel: &CancellationToken,
) -> StreamSummary
where
    S: Stream<Item = Result<AgentStateRequest, tonic::Status>> + Unpin,
{
    let mut summary = StreamSummary::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                summary.end = StreamEnd::Cancelled;
                break;
            }
            next = frames.next() => next,
        };

        match next {
            None => {
                summary.end = StreamEnd::Eof;
                break;
            }
            Some(Err(status)) => {
                debug!(agent_id = %agent.agent_id, error = %status, "State stream receive error");
                summary.end = StreamEnd::RecvError(status.message().to_string());
                break;
            }
            Some(Ok(frame)) => match registry.update_status(agent, &AgentStatus::from(&frame)).await {
                Ok(_) => summary.applied += 1,
                Err(e) => {
                    error!(agent_id = %agent.agent_id, error = %e, "Failed to apply state frame");
                    summary.dropped += 1;
                }
            },
        }
    }

    debug!(
        agent_id = %agent.agent_id,
        applied = summary.applied,
        dropped = summary.dropped,
        end = ?summary.end,
        "State stream closed"
    );
    summary
}

/// Apply log lines for `agent` until the stream ends.
///
/// `initial = true` clears the buffer of that source first. Lines for a
/// source with no log document are dropped.
pub async fn ingest_log_stream<S>(
    registry: &AgentRegistry,
    agent: &Agent,
    mut lines: S,
    cancel: &CancellationToken,
) -> StreamSummary
where
    S: Stream<Item = Result<LogLine, tonic::Status>> + Unpin,
{
    let mut summary = StreamSummary::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                summary.end = StreamEnd::Cancelled;
                break;
            }
            next = lines.next() => next,
        };

        let frame = match next {
            None => {
                summary.end = StreamEnd::Eof;
                break;
            }
            Some(Err(status)) => {
                debug!(agent_id = %agent.agent_id, error = %status, "Log stream receive error");
                summary.end = StreamEnd::RecvError(status.message().to_string());
                break;
            }
            Some(Ok(frame)) => frame,
        };

        let source = match frame.source.parse::<LogSource>() {
            Ok(source) => source,
            Err(e) => {
                warn!(agent_id = %agent.agent_id, error = %e, "Dropping log line");
                summary.dropped += 1;
                continue;
            }
        };

        match registry
            .append_log_line(agent, source, &frame.line, frame.initial)
            .await
        {
            Ok(true) => summary.applied += 1,
            Ok(false) => summary.dropped += 1,
            Err(e) => {
                error!(agent_id = %agent.agent_id, error = %e, "Failed to append log line");
                summary.dropped += 1;
            }
        }
    }

    debug!(
        agent_id = %agent.agent_id,
        applied = summary.applied,
        dropped = summary.dropped,
        end = ?summary.end,
        "Log stream closed"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_frame() {
        let frame = AgentStateRequest {
            online: true,
            installed: true,
            running: false,
            cpu: 12.5,
            ram: 40.0,
            installed_sf_version: 365306,
            latest_sf_version: 366202,
        };
        let status = AgentStatus::from(&frame);
        assert!(status.online && status.installed && !status.running);
        assert_eq!(status.cpu, 12.5);
        assert_eq!(status.latest_sf_version, 366202);
    }
}
