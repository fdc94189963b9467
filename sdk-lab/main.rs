//! CustomFit Rust SDK Lab
//!
//! Verification script that drives the client against an in-process
//! backend. Run with: cargo run --example sdk-lab
//! Set RUST_LOG=customfit=debug to see the engine's logs.

use async_trait::async_trait;
use customfit::http::{ConfigMetadata, EventPayload, SdkSettings, SummaryPayload, Transport};
use customfit::{CFClient, CFConfig, CFUser, Collaborators, ConnectionStatus, RotationReason};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const PASS: &str = "\x1b[32m[PASS]\x1b[0m";
const FAIL: &str = "\x1b[31m[FAIL]\x1b[0m";

/// Serves a fixed set of configs and counts what it receives.
#[derive(Default)]
struct LabBackend {
    events_received: AtomicUsize,
    summaries_received: AtomicUsize,
    config_fetches: AtomicUsize,
    configs: Mutex<serde_json::Value>,
}

#[async_trait]
impl Transport for LabBackend {
    async fn fetch_metadata(&self) -> customfit::Result<ConfigMetadata> {
        Ok(ConfigMetadata {
            etag: Some("\"lab-1\"".to_string()),
            last_modified: None,
        })
    }

    async fn fetch_sdk_settings(&self) -> customfit::Result<SdkSettings> {
        Ok(SdkSettings::default())
    }

    async fn fetch_user_configs(&self, _user: &CFUser) -> customfit::Result<serde_json::Value> {
        self.config_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.configs.lock().clone())
    }

    async fn send_events(&self, payload: &EventPayload) -> customfit::Result<()> {
        self.events_received
            .fetch_add(payload.events.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn send_summaries(&self, payload: &SummaryPayload) -> customfit::Result<()> {
        self.summaries_received
            .fetch_add(payload.summaries.len(), Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== CustomFit Rust SDK Lab ===\n");

    let mut passed = 0;
    let mut failed = 0;

    macro_rules! pass {
        ($test:expr) => {{
            println!("{} {}", PASS, $test);
            passed += 1;
        }};
    }

    macro_rules! fail {
        ($test:expr) => {{
            println!("{} {}", FAIL, $test);
            failed += 1;
        }};
    }

    let backend = Arc::new(LabBackend::default());
    *backend.configs.lock() = serde_json::json!({
        "configs": {
            "lab_bool": {"variation": true, "variation_data_type": "BOOLEAN"},
            "lab_string": {"variation": "Hello Lab", "variation_data_type": "STRING"},
            "lab_number": {"variation": 42, "variation_data_type": "NUMBER"},
            "lab_json": {
                "variation": {"nested": true, "count": 100},
                "variation_data_type": "JSON",
                "config_id": "cfg-1",
                "variation_id": "var-1",
                "experience_behaviour_response": {"experience_id": "exp-1"}
            }
        }
    });

    // Test 1: Initialization
    println!("Testing initialization...");
    let config = CFConfig::builder("lab-client-key")
        .first_sync_timeout(Duration::from_secs(3))
        .build();
    let collaborators = Collaborators::default().with_transport(backend.clone());

    let client = match CFClient::with_collaborators(config, CFUser::new("lab-user"), collaborators)
    {
        Ok(client) => client,
        Err(e) => {
            fail!(format!("Initialization - {}", e));
            print_summary(passed, failed);
            std::process::exit(1);
        }
    };

    match client.await_first_sync().await {
        Ok(()) => pass!("await_first_sync()"),
        Err(e) => fail!(format!("await_first_sync() - {}", e)),
    }

    // Test 2: Flag reads
    println!("\nTesting flag reads...");
    if client.get_boolean("lab_bool", false) {
        pass!("get_boolean()");
    } else {
        fail!("get_boolean() - expected true");
    }

    if client.get_string("lab_string", "") == "Hello Lab" {
        pass!("get_string()");
    } else {
        fail!("get_string() - wrong value");
    }

    if (client.get_number("lab_number", 0.0) - 42.0).abs() < f64::EPSILON {
        pass!("get_number()");
    } else {
        fail!("get_number() - wrong value");
    }

    let json = client.get_json("lab_json", serde_json::Value::Null);
    if json.get("nested") == Some(&serde_json::json!(true)) {
        pass!("get_json()");
    } else {
        fail!("get_json() - wrong value");
    }

    if client.get_string("lab_bool", "fallback") == "fallback" {
        pass!("type mismatch falls back to default");
    } else {
        fail!("type mismatch - default not used");
    }

    if client.get_all_flags().len() == 4 {
        pass!("get_all_flags()");
    } else {
        fail!("get_all_flags() - wrong count");
    }

    // Test 3: Unchanged metadata skips the config fetch
    let fetches_before = backend.config_fetches.load(Ordering::SeqCst);
    match client.check_for_update().await {
        Ok(_) if backend.config_fetches.load(Ordering::SeqCst) == fetches_before => {
            pass!("check_for_update() with unchanged etag")
        }
        Ok(_) => fail!("check_for_update() - configs refetched"),
        Err(e) => fail!(format!("check_for_update() - {}", e)),
    }

    // Test 4: Events and summaries
    println!("\nTesting event delivery...");
    let mut properties: HashMap<String, serde_json::Value> = HashMap::new();
    properties.insert("sdk".to_string(), serde_json::json!("rust"));
    match client.track_event("lab_verification", properties) {
        Ok(_) => pass!("track_event()"),
        Err(e) => fail!(format!("track_event() - {}", e)),
    }

    if client.track_event("", HashMap::new()).is_err() {
        pass!("track_event() rejects empty names");
    } else {
        fail!("track_event() - empty name accepted");
    }

    match client.flush().await {
        Ok(_) if backend.events_received.load(Ordering::SeqCst) == 1 => pass!("flush()"),
        Ok(n) => fail!(format!("flush() - sent {} records", n)),
        Err(e) => fail!(format!("flush() - {}", e)),
    }

    if backend.summaries_received.load(Ordering::SeqCst) == 1 {
        pass!("summary delivered once for repeated reads");
    } else {
        fail!("summary delivery - wrong count");
    }

    // Test 5: Sessions
    println!("\nTesting sessions...");
    let rotations = Arc::new(AtomicUsize::new(0));
    let counter = rotations.clone();
    client.add_session_listener(move |_old, _new, reason| {
        if reason == RotationReason::Manual {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let before = client.current_session_id();
    let after = client.force_session_rotation();
    if before != after && rotations.load(Ordering::SeqCst) == 1 {
        pass!("force_session_rotation()");
    } else {
        fail!("force_session_rotation() - session not rotated");
    }

    // Test 6: Offline mode
    println!("\nTesting offline mode...");
    client.set_offline_mode(true);
    if client.connection_info().status == ConnectionStatus::Offline {
        pass!("set_offline_mode(true)");
    } else {
        fail!("set_offline_mode(true) - status not offline");
    }

    let _ = client.track_event("queued_offline", HashMap::new());
    if client.flush().await.is_err() && client.pending_events() == 1 {
        pass!("flush() fails fast while offline and keeps events");
    } else {
        fail!("offline flush - unexpected result");
    }
    client.set_offline_mode(false);

    // Test 7: Shutdown
    println!("\nTesting shutdown...");
    match client.shutdown().await {
        Ok(()) => pass!("shutdown()"),
        Err(e) => fail!(format!("shutdown() - {}", e)),
    }

    print_summary(passed, failed);

    if failed > 0 {
        println!("\n\x1b[31mSome verifications failed!\x1b[0m");
        std::process::exit(1);
    } else {
        println!("\n\x1b[32mAll verifications passed!\x1b[0m");
        std::process::exit(0);
    }
}

fn print_summary(passed: i32, failed: i32) {
    println!("\n{}", "=".repeat(40));
    println!("Results: {} passed, {} failed", passed, failed);
    println!("{}", "=".repeat(40));
}
