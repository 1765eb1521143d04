// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mod catalog.
//!
//! The catalog is filled by an external scraper of the upstream mod
//! repository; this module reads it and offers an upsert for that feeder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::types::Json;

use crate::ids::new_id;

/// Catalog page size.
pub const MOD_PAGE_SIZE: i64 = 30;

/// One released version of a mod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModVersion {
    /// Semantic version string.
    pub version: String,
    /// Required game version range.
    #[serde(default)]
    pub game_version: String,
    /// Download link.
    #[serde(default)]
    pub link: String,
}

/// Catalog entry.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mod {
    /// Identity.
    pub mod_id: String,
    /// Upstream mod reference.
    pub mod_reference: String,
    /// Display name.
    pub mod_name: String,
    /// Download count.
    pub downloads: i64,
    /// Newest released version.
    pub latest_version: String,
    /// All released versions.
    pub versions: Json<Vec<ModVersion>>,
    /// Logo URL.
    pub logo_url: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Catalog sort key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModSort {
    /// By display name.
    #[default]
    Name,
    /// By download count.
    Downloads,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// Catalog page request. Pages start at 0.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModQuery {
    /// Page number.
    #[serde(default)]
    pub page: i64,
    /// Sort key.
    #[serde(default)]
    pub sort: ModSort,
    /// Sort direction.
    #[serde(default)]
    pub direction: SortDirection,
    /// Case-insensitive substring filter on the name.
    #[serde(default)]
    pub search: Option<String>,
}

impl ModQuery {
    /// `ORDER BY` clause for this query. Built from enums only.
    pub fn order_clause(&self) -> &'static str {
        match (self.sort, self.direction) {
            (ModSort::Name, SortDirection::Asc) => "lower(mod_name) ASC, mod_id ASC",
            (ModSort::Name, SortDirection::Desc) => "lower(mod_name) DESC, mod_id DESC",
            (ModSort::Downloads, SortDirection::Asc) => "downloads ASC, mod_id ASC",
            (ModSort::Downloads, SortDirection::Desc) => "downloads DESC, mod_id DESC",
        }
    }

    /// `ILIKE` pattern for the search term, with wildcards escaped.
    pub fn search_pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", escape_like(s)))
    }

    /// Row offset of the requested page.
    pub fn offset(&self) -> i64 {
        self.page.max(0) * MOD_PAGE_SIZE
    }
}

/// Escape `%`, `_` and `\` for a `LIKE` pattern using `\` as escape.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// One catalog page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModPage {
    /// Mods on this page.
    pub mods: Vec<Mod>,
    /// Total matching mods.
    pub total: i64,
    /// Number of pages.
    pub pages: i64,
}

/// Insert or refresh a catalog entry.
pub async fn upsert_mod(
    pool: &PgPool,
    mod_reference: &str,
    mod_name: &str,
    downloads: i64,
    versions: &[ModVersion],
    logo_url: &str,
) -> Result<Mod, sqlx::Error> {
    let latest_version = latest_version_of(versions).unwrap_or_else(|| "0.0.0".to_string());
    sqlx::query_as::<_, Mod>(
        r#"
        INSERT INTO mods (mod_id, mod_reference, mod_name, downloads, latest_version, versions, logo_url)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (mod_reference) DO UPDATE SET
            mod_name = EXCLUDED.mod_name,
            downloads = EXCLUDED.downloads,
            latest_version = EXCLUDED.latest_version,
            versions = EXCLUDED.versions,
            logo_url = EXCLUDED.logo_url,
            updated_at = NOW()
        RETURNING mod_id, mod_reference, mod_name, downloads, latest_version, versions, logo_url,
                  created_at, updated_at
        "#,
    )
    .bind(new_id())
    .bind(mod_reference)
    .bind(mod_name)
    .bind(downloads)
    .bind(latest_version)
    .bind(Json(versions))
    .bind(logo_url)
    .fetch_one(pool)
    .await
}

/// Highest semantic version in the list. Unparseable entries are ignored.
pub fn latest_version_of(versions: &[ModVersion]) -> Option<String> {
    versions
        .iter()
        .filter_map(|v| {
            semver::Version::parse(v.version.trim_start_matches('v'))
                .ok()
                .map(|parsed| (parsed, &v.version))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, raw)| raw.clone())
}

/// Get a catalog entry by reference.
pub async fn get_mod(pool: &PgPool, mod_reference: &str) -> Result<Option<Mod>, sqlx::Error> {
    sqlx::query_as::<_, Mod>(
        r#"
        SELECT mod_id, mod_reference, mod_name, downloads, latest_version, versions, logo_url,
               created_at, updated_at
        FROM mods
        WHERE mod_reference = $1
        "#,
    )
    .bind(mod_reference)
    .fetch_optional(pool)
    .await
}

/// Catalog entries for a set of references.
pub async fn get_mods_by_reference(
    pool: &PgPool,
    references: &[String],
) -> Result<Vec<Mod>, sqlx::Error> {
    sqlx::query_as::<_, Mod>(
        r#"
        SELECT mod_id, mod_reference, mod_name, downloads, latest_version, versions, logo_url,
               created_at, updated_at
        FROM mods
        WHERE mod_reference = ANY($1)
        "#,
    )
    .bind(references)
    .fetch_all(pool)
    .await
}

/// One page of the catalog.
pub async fn list_mods(pool: &PgPool, query: &ModQuery) -> Result<ModPage, sqlx::Error> {
    let pattern = query.search_pattern();

    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM mods
        WHERE ($1::text IS NULL OR mod_name ILIKE $1 ESCAPE '\')
        "#,
    )
    .bind(pattern.as_deref())
    .fetch_one(pool)
    .await?;

    let sql = format!(
        r#"
        SELECT mod_id, mod_reference, mod_name, downloads, latest_version, versions, logo_url,
               created_at, updated_at
        FROM mods
        WHERE ($1::text IS NULL OR mod_name ILIKE $1 ESCAPE '\')
        ORDER BY {}
        LIMIT $2 OFFSET $3
        "#,
        query.order_clause()
    );

    let mods = sqlx::query_as::<_, Mod>(&sql)
        .bind(pattern.as_deref())
        .bind(MOD_PAGE_SIZE)
        .bind(query.offset())
        .fetch_all(pool)
        .await?;

    Ok(ModPage {
        mods,
        total,
        pages: (total + MOD_PAGE_SIZE - 1) / MOD_PAGE_SIZE,
    })
}
