// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Distributed job lock.
//!
//! A named, time-leased advisory lock stored in the `job_locks` table. Every
//! instance of the control plane shares the table, so at most one holder
//! observes a live lease for a given job name at any instant.
//!
//! ```text
//!  try_acquire ──► INSERT ... ON CONFLICT DO UPDATE ... WHERE lease_until <= NOW()
//!                   │
//!                   ├─ row returned  → acquired (fencing token bumped)
//!                   └─ no row        → held by someone else
//! ```
//!
//! Acquisition never blocks; callers retry on their next tick.

use std::time::Duration;

use sqlx::PgPool;
use tracing::debug;

/// Proof of a successful acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockGrant {
    /// Monotonic per-job counter, bumped on every change of holder.
    pub fencing_token: i64,
}

/// Handle to the `job_locks` table.
#[derive(Debug, Clone)]
pub struct JobLock {
    pool: PgPool,
}

impl JobLock {
    /// Create a new job lock handle.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Try to take the lock for `ttl`.
    ///
    /// Succeeds iff no lock row exists or the existing lease has expired.
    pub async fn try_acquire(
        &self,
        name: &str,
        ttl: Duration,
        holder_id: &str,
    ) -> Result<Option<LockGrant>, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO job_locks (job_name, holder_id, lease_until, fencing_token)
            VALUES ($1, $2, NOW() + make_interval(secs => $3), 1)
            ON CONFLICT (job_name) DO UPDATE SET
                holder_id = EXCLUDED.holder_id,
                lease_until = EXCLUDED.lease_until,
                fencing_token = job_locks.fencing_token + 1,
                updated_at = NOW()
            WHERE job_locks.lease_until <= NOW()
            RETURNING fencing_token
            "#,
        )
        .bind(name)
        .bind(holder_id)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((fencing_token,)) => {
                debug!(job = %name, holder = %holder_id, fencing_token, "Job lock acquired");
                Ok(Some(LockGrant { fencing_token }))
            }
            None => {
                debug!(job = %name, holder = %holder_id, "Job lock held elsewhere");
                Ok(None)
            }
        }
    }

    /// Extend the lease by `ttl` from now. Succeeds iff `holder_id` holds it.
    pub async fn renew(
        &self,
        name: &str,
        ttl: Duration,
        holder_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE job_locks
            SET lease_until = NOW() + make_interval(secs => $3), updated_at = NOW()
            WHERE job_name = $1 AND holder_id = $2
            "#,
        )
        .bind(name)
        .bind(holder_id)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Give up the lock. Idempotent.
    ///
    /// Returns `false` only when another holder owns the row. The row is kept
    /// (with an expired lease) so the fencing token keeps increasing.
    pub async fn release(&self, name: &str, holder_id: &str) -> Result<bool, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            WITH released AS (
                UPDATE job_locks
                SET lease_until = LEAST(lease_until, NOW()), updated_at = NOW()
                WHERE job_name = $1 AND holder_id = $2
                RETURNING holder_id
            )
            SELECT holder_id FROM released
            UNION ALL
            SELECT holder_id FROM job_locks
            WHERE job_name = $1 AND NOT EXISTS (SELECT 1 FROM released)
            "#,
        )
        .bind(name)
        .bind(holder_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            None => true,
            Some((current,)) => current == holder_id,
        })
    }

    /// Force the lease of `name` to expire regardless of holder.
    pub async fn expire(&self, name: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE job_locks
            SET lease_until = LEAST(lease_until, NOW()), updated_at = NOW()
            WHERE job_name = $1
            "#,
        )
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Release every live lease held by `holder_id`. Used at shutdown.
    pub async fn release_all(&self, holder_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE job_locks
            SET lease_until = NOW(), updated_at = NOW()
            WHERE holder_id = $1 AND lease_until > NOW()
            "#,
        )
        .bind(holder_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// Process-unique lock holder identity: `{hostname}-{pid}-{random}`.
pub fn new_holder_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "ssm-cloud".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", host, std::process::id(), &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holder_ids_are_unique() {
        let a = new_holder_id();
        let b = new_holder_id();
        assert_ne!(a, b);
        assert!(a.contains(&std::process::id().to_string()));
    }
}
