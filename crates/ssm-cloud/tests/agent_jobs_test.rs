// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for agent authentication, status edges, log ingestion and the
//! reconciliation jobs that act on agent rows.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use ssm_cloud::ErrorKind;
use ssm_cloud::db::agents::{self, AgentStatus, ModConfig, SelectedMod};
use ssm_cloud::db::logs::{self, LogSource};
use ssm_cloud::db::mods::{self, ModVersion};
use ssm_cloud::db::{integrations, tasks};
use ssm_cloud::handlers::{self, AgentHandlerState};
use ssm_cloud::ingest::{StreamEnd, ingest_log_stream};
use ssm_cloud::jobs::{
    AgentVersionChecker, LivenessMonitor, LivenessMonitorConfig, LogFlusher, ModConfigReconciler,
    TaskPruner,
};
use ssm_cloud::outbox::{AGENT_OFFLINE, AGENT_ONLINE};
use ssm_cloud::registry::OnlineEdge;
use ssm_cloud::services::mods as mod_service;
use ssm_cloud::storage::{ArtifactKind, MemoryStorage, ObjectStorage, object_key};
use ssm_cloud::streams::StreamRegistry;
use ssm_protocol::LogLine;

fn online(online: bool) -> AgentStatus {
    AgentStatus {
        online,
        installed: true,
        running: online,
        cpu: 10.0,
        ram: 30.0,
        installed_sf_version: 0,
        latest_sf_version: 0,
    }
}

fn log_line(source: &str, line: &str, initial: bool) -> Result<LogLine, tonic::Status> {
    Ok(LogLine {
        source: source.to_string(),
        line: line.to_string(),
        initial,
    })
}

#[tokio::test]
async fn test_authenticate_rejects_bad_keys() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let registry = common::registry(&pool);

    for key in [None, Some(""), Some("   "), Some("not-a-key")] {
        let err = registry.authenticate(key).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthFailed, "{key:?}");
    }

    let unknown = ssm_cloud::ids::generate_api_key();
    let err = registry.authenticate(Some(&unknown)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailed);
}

#[tokio::test]
async fn test_authenticate_touches_last_comm() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("auth")).await;
    common::backdate_last_comm(&pool, &agent.agent_id, 30).await;
    let before = common::reload_agent(&pool, &agent.agent_id).await.last_comm_date;

    let resolved = common::registry(&pool)
        .authenticate(Some(&agent.api_key))
        .await
        .unwrap();
    assert_eq!(resolved.agent_id, agent.agent_id);

    let after = common::reload_agent(&pool, &agent.agent_id).await.last_comm_date;
    assert!(after > before);
}

#[tokio::test]
async fn test_status_edges_enqueue_events() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let hook = common::create_webhook(
        &pool,
        &account.account_id,
        "http://hooks.invalid/status",
        &[AGENT_ONLINE, AGENT_OFFLINE],
    )
    .await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("edge")).await;
    let registry = common::registry(&pool);

    let edge = registry.update_status(&agent, &online(true)).await.unwrap();
    assert_eq!(edge, Some(OnlineEdge::CameOnline));
    // Same state again is not an edge.
    assert_eq!(registry.update_status(&agent, &online(true)).await.unwrap(), None);
    let edge = registry.update_status(&agent, &online(false)).await.unwrap();
    assert_eq!(edge, Some(OnlineEdge::WentOffline));

    let events = integrations::list_events(&pool, &hook.integration_id, 10)
        .await
        .unwrap();
    let mut types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    types.sort();
    assert_eq!(types, vec![AGENT_OFFLINE, AGENT_ONLINE]);

    let stored = common::reload_agent(&pool, &agent.agent_id).await;
    assert!(!stored.online);
    assert!(!stored.running);
}

#[tokio::test]
async fn test_liveness_forces_silent_agents_offline() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let hook = common::create_webhook(
        &pool,
        &account.account_id,
        "http://hooks.invalid/offline",
        &[AGENT_OFFLINE],
    )
    .await;
    let registry = common::registry(&pool);

    let silent = common::create_agent(&pool, &account.account_id, &common::unique("silent")).await;
    let chatty = common::create_agent(&pool, &account.account_id, &common::unique("chatty")).await;
    registry.update_status(&silent, &online(true)).await.unwrap();
    registry.update_status(&chatty, &online(true)).await.unwrap();
    common::backdate_last_comm(&pool, &silent.agent_id, 120).await;

    let monitor = LivenessMonitor::new(
        common::outbox(&pool),
        LivenessMonitorConfig {
            offline_threshold: Duration::from_secs(60 * 60),
        },
    );
    let forced = monitor.check_once().await.unwrap();

    assert!(forced.contains(&silent.agent_id));
    assert!(!forced.contains(&chatty.agent_id));

    let stored = common::reload_agent(&pool, &silent.agent_id).await;
    assert!(!stored.online);
    assert_eq!(stored.cpu, 0.0);
    assert!(common::reload_agent(&pool, &chatty.agent_id).await.online);

    let events = integrations::list_events(&pool, &hook.integration_id, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload.0["data"]["agent_name"], silent.agent_name.as_str());
}

#[tokio::test]
async fn test_log_stream_appends_and_resets() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("logs")).await;
    let registry = common::registry(&pool);

    registry
        .upsert_log(&agent, "FactoryGame.log", &["boot".to_string()])
        .await
        .unwrap();

    let frames = stream::iter(vec![
        log_line("FactoryGame", "first", false),
        log_line("FactoryGame", "restarted", true),
        log_line("FactoryGame", "second", false),
        // No Steam document yet.
        log_line("Steam", "ignored", false),
        log_line("Nope", "ignored", false),
    ]);
    let summary =
        ingest_log_stream(&registry, &agent, frames, &CancellationToken::new()).await;

    assert_eq!(summary.applied, 3);
    assert_eq!(summary.dropped, 2);
    assert_eq!(summary.end, StreamEnd::Eof);

    let log = logs::get_log(&pool, &agent.agent_id, LogSource::FactoryGame)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.lines, vec!["restarted", "second"]);
    assert!(log.pending_upload);
}

#[tokio::test]
async fn test_log_stream_touches_last_comm() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("chat")).await;
    let registry = common::registry(&pool);
    registry
        .upsert_log(&agent, "FactoryGame.log", &[])
        .await
        .unwrap();
    common::backdate_last_comm(&pool, &agent.agent_id, 30).await;
    let before = common::reload_agent(&pool, &agent.agent_id).await.last_comm_date;

    let frames = stream::iter(vec![log_line("FactoryGame", "tick", false)]);
    let summary =
        ingest_log_stream(&registry, &agent, frames, &CancellationToken::new()).await;
    assert_eq!(summary.applied, 1);

    let after = common::reload_agent(&pool, &agent.agent_id).await.last_comm_date;
    assert!(after > before);
}

#[tokio::test]
async fn test_log_stream_replace_then_flush() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("abcd")).await;
    let registry = common::registry(&pool);
    registry
        .upsert_log(&agent, "FactoryGame.log", &["stale".to_string()])
        .await
        .unwrap();

    let frames = stream::iter(vec![
        log_line("FactoryGame", "A", true),
        log_line("FactoryGame", "B", false),
        log_line("FactoryGame", "C", false),
        log_line("FactoryGame", "D", false),
    ]);
    let summary =
        ingest_log_stream(&registry, &agent, frames, &CancellationToken::new()).await;
    assert_eq!(summary.applied, 4);

    let storage = Arc::new(MemoryStorage::new());
    let temp = tempfile::tempdir().unwrap();
    LogFlusher::new(pool.clone(), storage.clone(), temp.path().to_path_buf())
        .flush_once(&CancellationToken::new())
        .await
        .unwrap();

    let key = object_key(
        &account.account_id,
        &agent.agent_id,
        ArtifactKind::Logs,
        "FactoryGame.log",
    );
    let log = logs::get_log(&pool, &agent.agent_id, LogSource::FactoryGame)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.lines, vec!["A", "B", "C", "D"]);
    assert!(!log.pending_upload);
    assert_eq!(log.file_url, key);
    assert_eq!(&storage.object(&key).unwrap().data[..], b"A\nB\nC\nD");
}

#[tokio::test]
async fn test_upsert_log_twice_replaces_buffer() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("upsert")).await;
    let registry = common::registry(&pool);

    let source = registry
        .upsert_log(&agent, "Steam.log", &["one".to_string(), "two".to_string()])
        .await
        .unwrap();
    assert_eq!(source, LogSource::Steam);
    registry
        .upsert_log(&agent, "Steam.log", &["three".to_string()])
        .await
        .unwrap();

    let log = logs::get_log(&pool, &agent.agent_id, LogSource::Steam)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(log.lines, vec!["three"]);
    assert!(log.pending_upload);
}

#[tokio::test]
async fn test_log_flusher_uploads_pending_logs() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("flush")).await;
    let registry = common::registry(&pool);
    registry
        .upsert_log(
            &agent,
            "SSMAgent-2025.log",
            &["line one".to_string(), "line two".to_string()],
        )
        .await
        .unwrap();

    let storage = Arc::new(MemoryStorage::new());
    let temp = tempfile::tempdir().unwrap();
    let flusher = LogFlusher::new(
        pool.clone(),
        storage.clone() as Arc<dyn ObjectStorage>,
        temp.path().to_path_buf(),
    );
    flusher.flush_once(&CancellationToken::new()).await.unwrap();

    let key = object_key(
        &account.account_id,
        &agent.agent_id,
        ArtifactKind::Logs,
        "SSMAgent-2025.log",
    );
    let object = storage.object(&key).expect("log should be uploaded");
    assert_eq!(&object.data[..], b"line one\nline two");

    let log = logs::get_log(&pool, &agent.agent_id, LogSource::Agent)
        .await
        .unwrap()
        .unwrap();
    assert!(!log.pending_upload);
    assert_eq!(log.file_url, key);
}

#[tokio::test]
async fn test_log_flusher_keeps_pending_on_upload_failure() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("nofl")).await;
    common::registry(&pool)
        .upsert_log(&agent, "Steam.log", &["x".to_string()])
        .await
        .unwrap();

    let storage = Arc::new(MemoryStorage::new());
    storage.set_fail_puts(true);
    let temp = tempfile::tempdir().unwrap();
    let flusher = LogFlusher::new(pool.clone(), storage.clone(), temp.path().to_path_buf());
    let report = flusher.flush_once(&CancellationToken::new()).await.unwrap();

    assert!(report.failed >= 1);
    let log = logs::get_log(&pool, &agent.agent_id, LogSource::Steam)
        .await
        .unwrap()
        .unwrap();
    assert!(log.pending_upload);
    assert!(storage.keys().iter().all(|k| !k.contains(&agent.agent_id)));
}

#[tokio::test]
async fn test_task_pruner_drops_finished_tasks() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("prune")).await;

    let done = tasks::enqueue_task(&pool, &agent.agent_id, "startsfserver", &json!({}))
        .await
        .unwrap();
    let exhausted = tasks::enqueue_task(&pool, &agent.agent_id, "stopsfserver", &json!({}))
        .await
        .unwrap();
    let open = tasks::enqueue_task(&pool, &agent.agent_id, "updatesfserver", &json!({}))
        .await
        .unwrap();

    assert!(tasks::mark_task_completed(&pool, &agent.agent_id, &done.task_id).await.unwrap());
    sqlx::query("UPDATE agent_tasks SET retries = $2 WHERE task_id = $1")
        .bind(&exhausted.task_id)
        .bind(tasks::MAX_TASK_RETRIES + 1)
        .execute(&pool)
        .await
        .unwrap();

    assert!(TaskPruner::new(pool.clone()).prune_once().await.unwrap() >= 2);

    let remaining = tasks::list_tasks(&pool, &agent.agent_id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].task_id, open.task_id);
}

#[tokio::test]
async fn test_mod_config_reconciler_flags_outdated_mods() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("mods")).await;

    let reference = common::unique("RefinedPower");
    let current = common::unique("FicsitRemote");
    let version = |v: &str| ModVersion {
        version: v.to_string(),
        game_version: String::new(),
        link: String::new(),
    };
    mods::upsert_mod(&pool, &reference, "Refined Power", 10, &[version("1.0.0"), version("1.2.0")], "")
        .await
        .unwrap();
    mods::upsert_mod(&pool, &current, "Ficsit Remote", 5, &[version("2.0.0")], "")
        .await
        .unwrap();

    let selected = |reference: &str, desired: &str| SelectedMod {
        mod_reference: reference.to_string(),
        desired_version: desired.to_string(),
        installed_version: String::new(),
        installed: false,
        needs_update: false,
        config: serde_json::Value::Null,
    };
    let config = ModConfig {
        selected_mods: vec![selected(&reference, "1.0.0"), selected(&current, "2.0.0")],
    };
    agents::update_mod_config(&pool, &agent.agent_id, &config).await.unwrap();

    let reconciler = ModConfigReconciler::new(pool.clone());
    reconciler.reconcile_once(&CancellationToken::new()).await.unwrap();

    let stored = common::reload_agent(&pool, &agent.agent_id).await.mod_config.0;
    assert!(stored.selected_mods[0].needs_update);
    assert!(!stored.selected_mods[1].needs_update);
}

#[tokio::test]
async fn test_mod_report_merges_into_stored_selection() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let agent = common::create_agent(&pool, &account.account_id, &common::unique("report")).await;
    let reference = common::unique("PowerChecker");
    mods::upsert_mod(
        &pool,
        &reference,
        "Power Checker",
        3,
        &[ModVersion {
            version: "1.0.0".to_string(),
            game_version: String::new(),
            link: String::new(),
        }],
        "",
    )
    .await
    .unwrap();

    let registry = common::registry(&pool);
    let snapshot = registry.authenticate(Some(&agent.api_key)).await.unwrap();
    assert!(snapshot.mod_config.0.selected_mods.is_empty());

    mod_service::install_mod(&pool, &account.account_id, &agent.agent_id, &reference, None)
        .await
        .unwrap();

    let temp = tempfile::tempdir().unwrap();
    let state = AgentHandlerState::new(
        registry,
        Arc::new(MemoryStorage::new()),
        StreamRegistry::new(),
        temp.path().to_path_buf(),
    );

    // An empty report leaves the user's selection alone.
    let merged = handlers::handle_update_mod_config(&state, &snapshot, &ModConfig::default())
        .await
        .unwrap();
    assert_eq!(merged.selected_mods.len(), 1);

    let report = ModConfig {
        selected_mods: vec![SelectedMod {
            mod_reference: reference.clone(),
            desired_version: String::new(),
            installed_version: "1.0.0".to_string(),
            installed: true,
            needs_update: false,
            config: serde_json::Value::Null,
        }],
    };
    handlers::handle_update_mod_config(&state, &snapshot, &report)
        .await
        .unwrap();

    let stored = common::reload_agent(&pool, &agent.agent_id).await.mod_config.0;
    assert_eq!(stored.selected_mods.len(), 1);
    assert_eq!(stored.selected_mods[0].mod_reference, reference);
    assert_eq!(stored.selected_mods[0].desired_version, "1.0.0");
    assert!(stored.selected_mods[0].installed);
    assert_eq!(stored.selected_mods[0].installed_version, "1.0.0");
}

#[tokio::test]
async fn test_agent_version_checker_sets_update_flag() {
    skip_if_no_db!();
    let pool = common::test_pool().await;
    let account = common::create_account(&pool).await;
    let registry = common::registry(&pool);
    let old = common::create_agent(&pool, &account.account_id, &common::unique("old")).await;
    let new = common::create_agent(&pool, &account.account_id, &common::unique("new")).await;
    let odd = common::create_agent(&pool, &account.account_id, &common::unique("odd")).await;

    registry.update_config(&old, "1.0.0", "10.0.0.1").await.unwrap();
    registry.update_config(&new, "9.9.9", "10.0.0.2").await.unwrap();
    registry.update_config(&odd, "dev-build", "10.0.0.3").await.unwrap();

    AgentVersionChecker::new(pool.clone(), "9.9.9")
        .check_once(&CancellationToken::new())
        .await
        .unwrap();

    assert!(common::reload_agent(&pool, &old.agent_id).await.update_available);
    assert!(!common::reload_agent(&pool, &new.agent_id).await.update_available);
    assert!(!common::reload_agent(&pool, &odd.agent_id).await.update_available);
}
