// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain operations behind the frontend API.
//!
//! Route wiring and JWT verification live outside this crate; these
//! functions take already-authenticated user/account ids and enforce
//! ownership themselves. Agent provisioning goes through
//! [`crate::workflow::create_agent_workflow`].

pub mod accounts;
pub mod agents;
pub mod integrations;
pub mod mods;

use crate::error::{Error, Result};

/// Trimmed `value`, or a validation error naming `field` when blank.
pub(crate) fn required<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{field} is required")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required() {
        assert_eq!(required("name", "  atlas ").unwrap(), "atlas");
        let err = required("name", "   ").unwrap_err();
        assert!(err.to_string().contains("name is required"));
    }
}
