mod common;

use common::{experience_configs, manual_clock, test_config, wait_until, Call, FakeTransport};
use customfit::core::{ConnectionStatus, RotationReason};
use customfit::platform::{AppState, ManualClock, NetworkType};
use customfit::storage::InMemoryStorage;
use customfit::types::{CFUser, FlagValue};
use customfit::{CFClient, Collaborators, ErrorCode};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn collaborators(transport: &Arc<FakeTransport>, clock: &Arc<ManualClock>) -> Collaborators {
    Collaborators::default()
        .with_transport(transport.clone())
        .with_clock(clock.clone())
        .with_storage(Arc::new(InMemoryStorage::new()))
}

async fn synced_client(transport: &Arc<FakeTransport>) -> (CFClient, Arc<ManualClock>) {
    let clock = manual_clock();
    let client = CFClient::with_collaborators(
        test_config(),
        CFUser::new("user-1"),
        collaborators(transport, &clock),
    )
    .unwrap();
    client
        .await_first_sync_within(Duration::from_secs(2))
        .await
        .unwrap();
    (client, clock)
}

#[test]
fn test_client_requires_runtime() {
    let transport = FakeTransport::new();
    let result = CFClient::with_collaborators(
        test_config(),
        CFUser::anonymous(),
        collaborators(&transport, &manual_clock()),
    );

    let error = result.err().expect("no runtime available");
    assert_eq!(error.code, ErrorCode::InternalError);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let transport = FakeTransport::new();
    let result = CFClient::with_collaborators(
        customfit::CFConfig::new(""),
        CFUser::anonymous(),
        collaborators(&transport, &manual_clock()),
    );

    assert_eq!(
        result.err().expect("empty key").code,
        ErrorCode::ConfigMissingClientKey
    );
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_typed_reads_after_first_sync() {
    let transport = FakeTransport::with_configs(experience_configs());
    let (client, _clock) = synced_client(&transport).await;

    assert_eq!(client.get_string("hero_text", "fallback"), "Welcome");
    assert_eq!(client.get_number("max_items", 0.0), 25.0);
    assert!(client.get_boolean("dark_mode", false));
    assert_eq!(client.get_json("layout", json!(null)), json!({"columns": 3}));
    assert!(client.has_flag("dark_mode"));
    assert_eq!(client.get_all_flags().len(), 4);
    assert_eq!(
        client.connection_info().status,
        ConnectionStatus::Connected
    );

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_or_mismatched_flags_return_default() {
    let transport = FakeTransport::with_configs(experience_configs());
    let (client, _clock) = synced_client(&transport).await;

    assert_eq!(client.get_string("unknown", "fallback"), "fallback");
    assert_eq!(client.get_number("dark_mode", 7.0), 7.0);
    assert!(!client.get_boolean("hero_text", false));
    assert!(!client.has_flag("unknown"));

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reading_experience_flag_records_one_summary() {
    let transport = FakeTransport::with_configs(experience_configs());
    let (client, _clock) = synced_client(&transport).await;

    client.get_string("hero_text", "");
    client.get_string("hero_text", "");
    client.get_boolean("dark_mode", false);

    assert_eq!(client.pending_summaries(), 1);

    client.flush().await.unwrap();
    let sent = transport.sent_summaries.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].experience_id, "exp-hero");
    assert_eq!(sent[0].user_id.as_deref(), Some("user-1"));
    assert_eq!(sent[0].session_id, client.current_session_id());

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_track_and_flush_events() {
    let transport = FakeTransport::new();
    let (client, _clock) = synced_client(&transport).await;

    let mut properties = HashMap::new();
    properties.insert("plan".to_string(), json!("pro"));
    client.track_event("upgrade", properties).unwrap();
    assert_eq!(client.pending_events(), 1);

    assert_eq!(client.flush().await.unwrap(), 1);
    assert!(transport.calls().contains(&Call::Events(1)));
    assert_eq!(transport.sent_events.lock()[0].properties["plan"], "pro");

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_offline_mode_blocks_network() {
    let transport = FakeTransport::new();
    let (client, _clock) = synced_client(&transport).await;
    transport.clear_calls();

    client.set_offline_mode(true);
    assert!(client.is_offline_mode());
    assert_eq!(client.connection_info().status, ConnectionStatus::Offline);

    client.track_event("queued", HashMap::new()).unwrap();
    let error = client.flush().await.unwrap_err();
    assert_eq!(error.code, ErrorCode::NetworkOffline);
    assert_eq!(
        client.check_for_update().await.unwrap_err().code,
        ErrorCode::NetworkOffline
    );
    assert!(transport.calls().is_empty());
    assert_eq!(client.pending_events(), 1);

    client.set_offline_mode(false);
    assert_eq!(client.flush().await.unwrap(), 1);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_connectivity_loss_and_return() {
    let transport = FakeTransport::new();
    let (client, _clock) = synced_client(&transport).await;

    client.on_connectivity_changed(NetworkType::None);
    assert_eq!(
        client.connection_info().status,
        ConnectionStatus::Disconnected
    );

    transport.clear_calls();
    client.on_connectivity_changed(NetworkType::Wifi);
    let probe = transport.clone();
    assert!(wait_until(Duration::from_secs(2), || probe.count(|c| *c == Call::Metadata) >= 1).await);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_flag_listener_fires_on_refresh() {
    let transport = FakeTransport::with_configs(experience_configs());
    let (client, _clock) = synced_client(&transport).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.add_flag_listener("max_items", move |key: &str, value: Option<&FlagValue>| {
        sink.lock().push((key.to_string(), value.cloned()));
    });

    *transport.configs.lock() = json!({
        "configs": {"max_items": {"variation": 50, "variation_data_type": "NUMBER"}}
    });
    transport.set_etag("\"v2\"");
    client.check_for_update().await.unwrap();

    assert_eq!(
        seen.lock().clone(),
        vec![("max_items".to_string(), Some(FlagValue::Number(50.0)))]
    );
    assert_eq!(client.get_number("max_items", 0.0), 50.0);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_set_user_rotates_session_and_refetches() {
    let transport = FakeTransport::new();
    let (client, _clock) = synced_client(&transport).await;
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = reasons.clone();
    client.add_session_listener(move |_: &str, _: &str, reason: RotationReason| {
        sink.lock().push(reason);
    });
    let session_before = client.current_session_id();
    transport.clear_calls();

    client.set_user(CFUser::new("user-2"));

    assert_eq!(client.user().user_customer_id.as_deref(), Some("user-2"));
    assert_ne!(client.current_session_id(), session_before);
    assert_eq!(reasons.lock().clone(), vec![RotationReason::AuthChange]);
    let probe = transport.clone();
    assert!(wait_until(Duration::from_secs(2), || probe.config_fetches() == 1).await);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_long_background_rotates_session() {
    let transport = FakeTransport::new();
    let (client, clock) = synced_client(&transport).await;
    let session_before = client.current_session_id();

    client.on_app_state_changed(AppState::Background);
    clock.advance(Duration::from_secs(16 * 60));
    client.on_app_state_changed(AppState::Foreground);

    assert_ne!(client.current_session_id(), session_before);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_flushes() {
    let transport = FakeTransport::new();
    let (client, _clock) = synced_client(&transport).await;
    client.track_event("closing", HashMap::new()).unwrap();

    client.shutdown().await.unwrap();
    assert!(client.is_shutdown());
    assert!(transport.calls().contains(&Call::Events(1)));

    transport.clear_calls();
    client.shutdown().await.unwrap();
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn test_experience_summary_not_resent_after_variation_change() {
    let transport = FakeTransport::with_configs(experience_configs());
    let (client, _clock) = synced_client(&transport).await;

    client.get_string("hero_text", "");
    client.flush().await.unwrap();
    assert_eq!(transport.sent_summaries.lock().len(), 1);

    let mut configs = experience_configs();
    configs["configs"]["hero_text"]["variation"] = json!("Hello again");
    configs["configs"]["hero_text"]["variation_id"] = json!("var-b");
    *transport.configs.lock() = configs;
    transport.set_etag("\"v2\"");
    client.check_for_update().await.unwrap();

    assert_eq!(client.get_string("hero_text", ""), "Hello again");
    assert_eq!(client.pending_summaries(), 0);
    client.flush().await.unwrap();
    assert_eq!(transport.sent_summaries.lock().len(), 1);

    client.shutdown().await.unwrap();
}
