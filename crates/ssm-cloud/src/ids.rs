// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Identity and credential generation.

use rand::Rng;
use rand::distributions::Alphanumeric;

/// Prefix carried by every agent API key.
pub const API_KEY_PREFIX: &str = "API-AGT-";

/// Number of random characters following [`API_KEY_PREFIX`].
const API_KEY_RANDOM_LEN: usize = 24;

/// Length of account join codes.
const JOIN_CODE_LEN: usize = 8;

/// Length of the short agent id accepted by `GetByShortId`.
pub const SHORT_ID_LEN: usize = 8;

/// New opaque entity identity: 32 lowercase hex characters.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// New agent API key: `API-AGT-` followed by 24 random alphanumerics.
pub fn generate_api_key() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("{API_KEY_PREFIX}{suffix}")
}

/// Whether `key` has the shape of an agent API key.
pub fn is_valid_api_key(key: &str) -> bool {
    key.strip_prefix(API_KEY_PREFIX).is_some_and(|rest| {
        rest.len() == API_KEY_RANDOM_LEN && rest.chars().all(|c| c.is_ascii_alphanumeric())
    })
}

/// New account join code (uppercase alphanumerics).
pub fn generate_join_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(JOIN_CODE_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}

/// Whether `id` is a well-formed identity hex string.
pub fn is_valid_id(id: &str) -> bool {
    id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit())
}
