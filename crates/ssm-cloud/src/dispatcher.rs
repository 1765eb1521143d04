// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration dispatcher.
//!
//! Claims at most one outbox event per tick, POSTs its payload to the
//! integration URL and records the result. Any status below 300 counts as
//! delivered; everything else, including timeouts and connection errors,
//! goes through the outbox failure path.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::db::integrations::IntegrationEvent;
use crate::error::{Error, Result};
use crate::job_runner::PeriodicJob;
use crate::outbox::{DeliveryRecord, EventStatus, Outbox};

/// Client timeout of one webhook delivery.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one dispatcher tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing was due.
    Idle,
    /// Delivered.
    Sent {
        /// Event id.
        event_id: String,
    },
    /// Delivery failed; the event is pending again or terminally failed.
    Failed {
        /// Event id.
        event_id: String,
        /// Status after the failure.
        status: EventStatus,
    },
    /// The claim expired before the result was recorded.
    LeaseLost {
        /// Event id.
        event_id: String,
    },
}

/// Delivers outbox events over HTTP.
pub struct IntegrationDispatcher {
    outbox: Outbox,
    client: reqwest::Client,
    worker_id: String,
}

impl IntegrationDispatcher {
    /// Create a dispatcher claiming events as `worker_id`.
    pub fn new(outbox: Outbox, worker_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()?;
        Ok(Self {
            outbox,
            client,
            worker_id: worker_id.into(),
        })
    }

    /// Claim and deliver at most one event.
    pub async fn dispatch_once(&self) -> Result<DispatchOutcome> {
        let Some(event) = self.outbox.claim_one(&self.worker_id).await? else {
            debug!("No integration events due");
            return Ok(DispatchOutcome::Idle);
        };

        let event_id = event.event_id.clone();
        let (record, error) = self.deliver(&event).await;

        match error {
            None => {
                if self.outbox.mark_sent(&event, &self.worker_id, &record).await? {
                    info!(
                        event_id = %event_id,
                        event_type = %event.event_type,
                        response_code = ?record.response_code,
                        "Integration event sent"
                    );
                    Ok(DispatchOutcome::Sent { event_id })
                } else {
                    Ok(DispatchOutcome::LeaseLost { event_id })
                }
            }
            Some(error) => {
                match self
                    .outbox
                    .mark_failed(&event, &self.worker_id, &error, &record)
                    .await?
                {
                    Some(status) => Ok(DispatchOutcome::Failed { event_id, status }),
                    None => Ok(DispatchOutcome::LeaseLost { event_id }),
                }
            }
        }
    }

    /// POST the payload. Returns what was observed and the error, if any.
    async fn deliver(&self, event: &IntegrationEvent) -> (DeliveryRecord, Option<String>) {
        let response = match self.client.post(&event.url).json(&event.payload.0).send().await {
            Ok(response) => response,
            Err(e) => {
                let error = Error::Http(e).to_string();
                return (DeliveryRecord::default(), Some(error));
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                let record = DeliveryRecord {
                    response: None,
                    response_code: Some(i32::from(status.as_u16())),
                };
                return (record, Some(format!("failed to read response body: {e}")));
            }
        };

        let record = DeliveryRecord {
            response: Some(body),
            response_code: Some(i32::from(status.as_u16())),
        };

        if status.as_u16() < 300 {
            (record, None)
        } else {
            (record, Some(format!("webhook responded with status {}", status.as_u16())))
        }
    }
}

#[async_trait]
impl PeriodicJob for IntegrationDispatcher {
    fn name(&self) -> &'static str {
        "integrationEventsJob"
    }

    async fn run(&self, _cancel: CancellationToken) -> Result<()> {
        self.dispatch_once().await.map(|_| ())
    }
}
