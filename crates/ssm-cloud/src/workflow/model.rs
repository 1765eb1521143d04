// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow and action records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum "not yet" retries of a waiting action before it times out.
pub const MAX_ACTION_RETRIES: u32 = 300;

/// Status of a workflow or of one of its actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Not finished. Stored as the empty string.
    #[default]
    #[serde(rename = "")]
    Pending,
    /// Finished successfully.
    #[serde(rename = "completed")]
    Completed,
    /// Finished with an error.
    #[serde(rename = "failed")]
    Failed,
}

impl Status {
    /// Stored string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Status::Pending),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowAction {
    /// Handler tag, e.g. `wait-for-online`.
    #[serde(rename = "type")]
    pub action_type: String,
    /// Action status.
    #[serde(default)]
    pub status: Status,
    /// Failure reason when `status` is failed.
    #[serde(default)]
    pub error_message: String,
    /// Number of "not yet" outcomes so far.
    #[serde(default)]
    pub retry_count: u32,
}

impl WorkflowAction {
    /// New pending action.
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            status: Status::Pending,
            error_message: String::new(),
            retry_count: 0,
        }
    }

    /// Mark completed.
    pub fn complete(&mut self) {
        self.status = Status::Completed;
        self.error_message.clear();
    }

    /// Mark failed with a reason.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = Status::Failed;
        self.error_message = message.into();
    }

    /// Record a "not yet" outcome. Fails the action once the retry cap is hit.
    pub fn wait(&mut self) {
        self.status = Status::Pending;
        self.retry_count = self.retry_count.saturating_add(1);
        if self.retry_count >= MAX_ACTION_RETRIES {
            self.fail(format!(
                "timed out after {} retries waiting for {}",
                self.retry_count, self.action_type
            ));
        }
    }
}

/// A persisted ordered sequence of actions.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Identity.
    pub workflow_id: String,
    /// Workflow type, e.g. `create-agent`.
    #[serde(rename = "type")]
    pub workflow_type: String,
    /// Owning account.
    pub account_id: String,
    /// Aggregate status.
    pub status: Status,
    /// Ordered actions.
    pub actions: Vec<WorkflowAction>,
    /// Opaque payload shared by all actions.
    pub data: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Index of the first action still pending.
    pub fn next_action_index(&self) -> Option<usize> {
        self.actions.iter().position(|a| a.status == Status::Pending)
    }
}

/// Aggregate status of an action list.
///
/// Failed if any action failed, completed when every action completed,
/// pending otherwise.
pub fn derive_status(actions: &[WorkflowAction]) -> Status {
    if actions.iter().any(|a| a.status == Status::Failed) {
        Status::Failed
    } else if actions.iter().all(|a| a.status == Status::Completed) {
        Status::Completed
    } else {
        Status::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(status: Status) -> WorkflowAction {
        WorkflowAction {
            status,
            ..WorkflowAction::new("noop")
        }
    }

    #[test]
    fn test_derive_status() {
        use Status::*;
        assert_eq!(derive_status(&[action(Pending), action(Pending)]), Pending);
        assert_eq!(derive_status(&[action(Completed), action(Pending)]), Pending);
        assert_eq!(derive_status(&[action(Completed), action(Failed)]), Failed);
        assert_eq!(
            derive_status(&[action(Completed), action(Completed)]),
            Completed
        );
    }

    #[test]
    fn test_wait_times_out_at_cap() {
        let mut a = WorkflowAction::new("wait-for-online");
        for _ in 0..MAX_ACTION_RETRIES - 1 {
            a.wait();
        }
        assert_eq!(a.status, Status::Pending);
        assert_eq!(a.retry_count, MAX_ACTION_RETRIES - 1);

        a.wait();
        assert_eq!(a.status, Status::Failed);
        assert!(a.error_message.contains("timed out"));
    }

    #[test]
    fn test_action_json_shape() {
        let a: WorkflowAction =
            serde_json::from_value(serde_json::json!({"type": "create-agent", "status": ""}))
                .unwrap();
        assert_eq!(a.action_type, "create-agent");
        assert_eq!(a.status, Status::Pending);

        let mut a = a;
        a.fail("boom");
        let v = serde_json::to_value(&a).unwrap();
        assert_eq!(v["status"], "failed");
        assert_eq!(v["errorMessage"], "boom");
        assert_eq!(v["retryCount"], 0);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("".parse::<Status>().unwrap(), Status::Pending);
        assert_eq!("completed".parse::<Status>().unwrap(), Status::Completed);
        assert!("done".parse::<Status>().is_err());
    }
}
