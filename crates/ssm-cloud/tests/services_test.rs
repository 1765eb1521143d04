// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the account, agent, integration and mod operations behind the
//! frontend API.

mod common;

use bytes::Bytes;
use futures::TryStreamExt;
use futures::future::join_all;
use serde_json::json;

use ssm_cloud::ErrorKind;
use ssm_cloud::db::integrations::IntegrationType;
use ssm_cloud::db::mods::{self, ModQuery, ModSort, ModVersion, SortDirection};
use ssm_cloud::db::{accounts, agents as agent_rows, tasks};
use ssm_cloud::outbox::{AGENT_OFFLINE, AGENT_ONLINE, USER_ADDED};
use ssm_cloud::services::accounts::{AUDIT_ACCOUNT_CREATED, AUDIT_USER_JOINED};
use ssm_cloud::services::mods::{TASK_INSTALL_MOD, TASK_UNINSTALL_MOD, TASK_UPDATE_MOD};
use ssm_cloud::services::{accounts as account_service, agents, integrations, mods as mod_service};
use ssm_cloud::storage::{ArtifactKind, MemoryStorage, ObjectStorage, object_key};

async fn login(pool: &sqlx::PgPool, name: &str) -> accounts::User {
    let eid = common::unique(name);
    account_service::login_user(pool, &eid, &format!("{eid}@example.invalid"), name, "")
        .await
        .unwrap()
}

fn versions(list: &[&str]) -> Vec<ModVersion> {
    list.iter()
        .map(|v| ModVersion {
            version: v.to_string(),
            game_version: String::new(),
            link: String::new(),
        })
        .collect()
}

#[tokio::test]
async fn test_create_and_join_account() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let owner = login(&pool, "owner").await;
    let guest = login(&pool, "guest").await;
    let name = common::unique("factory");

    let account = account_service::create_account(&pool, &owner.user_id, &name)
        .await
        .unwrap();
    let join_code = account.join_code.clone().expect("join code generated");

    let err = account_service::create_account(&pool, &guest.user_id, &name)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let hook = common::create_webhook(
        &pool,
        &account.account_id,
        "http://hooks.invalid/users",
        &[USER_ADDED],
    )
    .await;

    let joined = account_service::join_account(
        &pool,
        &common::outbox(&pool),
        &guest.user_id,
        &join_code.to_ascii_lowercase(),
    )
    .await
    .unwrap();
    assert_eq!(joined.account_id, account.account_id);

    let guest = accounts::get_user(&pool, &guest.user_id).await.unwrap().unwrap();
    assert_eq!(guest.active_account_id.as_deref(), Some(account.account_id.as_str()));

    let audit = accounts::list_audit(&pool, &account.account_id, 10).await.unwrap();
    assert!(audit.iter().any(|a| a.audit_type == AUDIT_ACCOUNT_CREATED));
    assert!(audit.iter().any(|a| a.audit_type == AUDIT_USER_JOINED));

    let events = ssm_cloud::db::integrations::list_events(&pool, &hook.integration_id, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload.0["data"]["user_name"], "guest");

    let err = account_service::join_account(&pool, &common::outbox(&pool), &guest.user_id, "NOPE00")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_switch_account_requires_membership() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let user = login(&pool, "switcher").await;
    let mine = account_service::create_account(&pool, &user.user_id, &common::unique("mine"))
        .await
        .unwrap();
    let other = common::create_account(&pool).await;

    account_service::switch_account(&pool, &user.user_id, &mine.account_id)
        .await
        .unwrap();
    let err = account_service::switch_account(&pool, &user.user_id, &other.account_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_delete_account_cascades() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let user = login(&pool, "leaver").await;
    let account = account_service::create_account(&pool, &user.user_id, &common::unique("gone"))
        .await
        .unwrap();
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("a")).await;
    common::create_webhook(&pool, &account.account_id, "http://hooks.invalid/x", &[AGENT_ONLINE])
        .await;

    let storage = MemoryStorage::new();
    let key = object_key(&account.account_id, &agent.agent_id, ArtifactKind::Saves, "w.sav");
    storage
        .put_bytes(&key, Bytes::from_static(b"save"), "application/octet-stream")
        .await
        .unwrap();
    storage
        .put_bytes("someone-else/agent/saves/w.sav", Bytes::from_static(b"keep"), "application/octet-stream")
        .await
        .unwrap();

    account_service::delete_account(&pool, &storage, &account.account_id)
        .await
        .unwrap();

    assert!(accounts::get_account(&pool, &account.account_id).await.unwrap().is_none());
    assert!(agent_rows::get_agent(&pool, &agent.agent_id).await.unwrap().is_none());
    assert!(storage.object(&key).is_none());
    assert!(storage.object("someone-else/agent/saves/w.sav").is_some());
    assert!(
        ssm_cloud::db::integrations::list_integrations(&pool, &account.account_id)
            .await
            .unwrap()
            .is_empty()
    );
    let user = accounts::get_user(&pool, &user.user_id).await.unwrap().unwrap();
    assert!(user.active_account_id.is_none());
}

#[tokio::test]
async fn test_delete_agent_purges_artifacts() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("del")).await;
    let other = common::create_account(&pool).await;

    let storage = MemoryStorage::new();
    let key = object_key(&account.account_id, &agent.agent_id, ArtifactKind::Backups, "b.zip");
    storage
        .put_bytes(&key, Bytes::from_static(b"zip"), "application/zip")
        .await
        .unwrap();

    // Another account cannot see or delete it.
    let err = agents::delete_agent(&pool, &storage, &other.account_id, &agent.agent_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    agents::delete_agent(&pool, &storage, &account.account_id, &agent.agent_id)
        .await
        .unwrap();
    assert!(storage.object(&key).is_none());
    assert!(agent_rows::get_agent(&pool, &agent.agent_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_integration_url_is_unique_per_account() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let events = vec![AGENT_ONLINE.to_string(), AGENT_OFFLINE.to_string()];

    let created = integrations::create_integration(
        &pool,
        &account.account_id,
        "Ops",
        IntegrationType::GenericWebhook,
        "https://hooks.example.invalid/ops",
        &events,
    )
    .await
    .unwrap();
    assert_eq!(created.event_types.len(), 2);

    let err = integrations::create_integration(
        &pool,
        &account.account_id,
        "Ops again",
        IntegrationType::GenericWebhook,
        "https://hooks.example.invalid/ops",
        &events,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = integrations::create_integration(
        &pool,
        &account.account_id,
        "Bad",
        IntegrationType::Discord,
        "ftp://hooks.example.invalid",
        &events,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    integrations::delete_integration(&pool, &account.account_id, &created.integration_id)
        .await
        .unwrap();
    assert!(
        integrations::list_integrations(&pool, &account.account_id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_mod_catalog_paging_and_search() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let tag = common::unique("pg");

    for (i, downloads) in [(0, 5), (1, 50), (2, 500)] {
        mods::upsert_mod(
            &pool,
            &format!("{tag}-ref-{i}"),
            &format!("{tag} Mod {i}"),
            downloads,
            &versions(&["1.0.0"]),
            "",
        )
        .await
        .unwrap();
    }

    let page = mod_service::list_mods(
        &pool,
        &ModQuery {
            page: 0,
            sort: ModSort::Downloads,
            direction: SortDirection::Desc,
            search: Some(tag.to_ascii_uppercase()),
        },
    )
    .await
    .unwrap();

    assert_eq!(page.total, 3);
    assert_eq!(page.pages, 1);
    let downloads: Vec<i64> = page.mods.iter().map(|m| m.downloads).collect();
    assert_eq!(downloads, vec![500, 50, 5]);
}

#[tokio::test]
async fn test_install_update_uninstall_mod() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("modder")).await;
    let reference = common::unique("SML");

    mods::upsert_mod(&pool, &reference, "Mod Loader", 1, &versions(&["3.0.0", "3.1.0"]), "")
        .await
        .unwrap();

    let config = mod_service::install_mod(
        &pool,
        &account.account_id,
        &agent.agent_id,
        &reference,
        Some("3.0.0"),
    )
    .await
    .unwrap();
    assert_eq!(config.selected_mods.len(), 1);
    assert_eq!(config.selected_mods[0].desired_version, "3.0.0");

    let err = mod_service::install_mod(
        &pool,
        &account.account_id,
        &agent.agent_id,
        &reference,
        Some("9.9.9"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let config = mod_service::update_mod(&pool, &account.account_id, &agent.agent_id, &reference)
        .await
        .unwrap();
    assert_eq!(config.selected_mods[0].desired_version, "3.1.0");

    let config = mod_service::uninstall_mod(&pool, &account.account_id, &agent.agent_id, &reference)
        .await
        .unwrap();
    assert!(config.selected_mods.is_empty());

    let queued = tasks::list_tasks(&pool, &agent.agent_id).await.unwrap();
    let actions: Vec<&str> = queued.iter().map(|t| t.action.as_str()).collect();
    assert_eq!(actions, vec![TASK_INSTALL_MOD, TASK_UPDATE_MOD, TASK_UNINSTALL_MOD]);
    assert_eq!(queued[1].data.0, json!({ "modReference": reference, "version": "3.1.0" }));

    let stored = common::reload_agent(&pool, &agent.agent_id).await;
    assert!(stored.mod_config.0.selected_mods.is_empty());
}

#[tokio::test]
async fn test_concurrent_installs_keep_every_selection() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("many")).await;

    let tag = common::unique("bulk");
    let references: Vec<String> = (0..10).map(|i| format!("{tag}-{i}")).collect();
    for reference in &references {
        mods::upsert_mod(&pool, reference, reference, 1, &versions(&["1.0.0"]), "")
            .await
            .unwrap();
    }

    let results = join_all(references.iter().map(|reference| {
        mod_service::install_mod(&pool, &account.account_id, &agent.agent_id, reference, None)
    }))
    .await;
    for result in results {
        result.unwrap();
    }

    let stored = common::reload_agent(&pool, &agent.agent_id).await.mod_config.0;
    let mut selected: Vec<String> = stored
        .selected_mods
        .iter()
        .map(|m| m.mod_reference.clone())
        .collect();
    selected.sort();
    let mut expected = references.clone();
    expected.sort();
    assert_eq!(selected, expected);

    let queued = tasks::list_tasks(&pool, &agent.agent_id).await.unwrap();
    assert_eq!(queued.len(), 10);
}

#[tokio::test]
async fn test_download_artifact_streams_object() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("dl")).await;
    let other = common::create_account(&pool).await;

    let storage = MemoryStorage::new();
    let key = object_key(&account.account_id, &agent.agent_id, ArtifactKind::Saves, "world.sav");
    storage
        .put_bytes(&key, Bytes::from_static(b"SAVEDATA"), "application/octet-stream")
        .await
        .unwrap();

    let body = agents::download_artifact(
        &pool,
        &storage,
        &account.account_id,
        &agent.agent_id,
        ArtifactKind::Saves,
        "world.sav",
    )
    .await
    .unwrap();
    let chunks: Vec<Bytes> = body.try_collect().await.unwrap();
    assert_eq!(chunks.concat(), b"SAVEDATA");

    let missing = agents::download_artifact(
        &pool,
        &storage,
        &account.account_id,
        &agent.agent_id,
        ArtifactKind::Saves,
        "other.sav",
    )
    .await;
    assert_eq!(missing.err().map(|e| e.kind()), Some(ErrorKind::NotFound));

    let foreign = agents::download_artifact(
        &pool,
        &storage,
        &other.account_id,
        &agent.agent_id,
        ArtifactKind::Saves,
        "world.sav",
    )
    .await;
    assert_eq!(foreign.err().map(|e| e.kind()), Some(ErrorKind::NotFound));

    let traversal = agents::download_artifact(
        &pool,
        &storage,
        &account.account_id,
        &agent.agent_id,
        ArtifactKind::Saves,
        "../world.sav",
    )
    .await;
    assert_eq!(traversal.err().map(|e| e.kind()), Some(ErrorKind::Validation));
}
