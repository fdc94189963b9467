//! Conditional configuration polling.
//!
//! Each sync cycle first probes the settings document for its `ETag` and
//! `Last-Modified` validators. Only when they differ from the last probe are
//! the SDK settings and the user configs fetched. A successful fetch
//! produces a new [`ConfigSnapshot`] that replaces the current one
//! wholesale; readers holding the old `Arc` keep a consistent view.

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{CFError, ErrorCode, Result};
use crate::http::{ConfigMetadata, NetworkGuard, SdkSettings, Transport, CONFIG_FETCH_KEY};
use crate::listeners::{ListenerId, ListenerRegistry};
use crate::platform::Clock;
use crate::types::{CFUser, ConfigSnapshot, ExperienceInfo, FlagEntry, FlagType, FlagValue};

/// Outcome of one sync cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateResult {
    /// Validators matched the previous probe; nothing was fetched.
    NotModified,
    /// A new snapshot was installed. Lists keys whose value changed.
    Updated { changed_keys: Vec<String> },
    /// The account is disabled or asked the SDK to skip; configs were not fetched.
    SkippedByAccount,
}

pub type FlagListener = dyn Fn(&str, Option<&FlagValue>) + Send + Sync;
pub type AllFlagsListener = dyn Fn(&HashMap<String, FlagValue>) + Send + Sync;

/// A per-key listener with the key it watches.
pub struct KeyedFlagListener {
    key: String,
    callback: Arc<FlagListener>,
}

#[derive(Default)]
struct SyncState {
    last_metadata: Option<ConfigMetadata>,
    settings: Option<SdkSettings>,
}

pub struct ConfigSynchronizer {
    transport: Arc<dyn Transport>,
    guard: Arc<NetworkGuard>,
    clock: Arc<dyn Clock>,
    user: Arc<RwLock<CFUser>>,
    snapshot: RwLock<Arc<ConfigSnapshot>>,
    state: Mutex<SyncState>,
    sync_lock: tokio::sync::Mutex<()>,
    ready_tx: watch::Sender<bool>,
    flag_listeners: ListenerRegistry<KeyedFlagListener>,
    all_flags_listeners: ListenerRegistry<AllFlagsListener>,
}

impl ConfigSynchronizer {
    pub fn new(
        transport: Arc<dyn Transport>,
        guard: Arc<NetworkGuard>,
        clock: Arc<dyn Clock>,
        user: Arc<RwLock<CFUser>>,
    ) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            transport,
            guard,
            clock,
            user,
            snapshot: RwLock::new(Arc::new(ConfigSnapshot::empty())),
            state: Mutex::new(SyncState::default()),
            sync_lock: tokio::sync::Mutex::new(()),
            ready_tx,
            flag_listeners: ListenerRegistry::new("flag"),
            all_flags_listeners: ListenerRegistry::new("all-flags"),
        }
    }

    /// The snapshot currently in effect.
    pub fn current_snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Settings from the most recent settings fetch, if any.
    pub fn settings(&self) -> Option<SdkSettings> {
        self.state.lock().settings.clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow()
    }

    /// Probe the validators and fetch only if they changed.
    pub async fn check_for_update(&self) -> Result<UpdateResult> {
        self.sync(false).await
    }

    /// Fetch settings and configs regardless of the validators.
    pub async fn force_refresh(&self) -> Result<Arc<ConfigSnapshot>> {
        self.sync(true).await?;
        Ok(self.current_snapshot())
    }

    /// Wait until the first sync cycle has completed.
    ///
    /// Expiry only fails this waiter; the sync itself keeps going.
    pub async fn await_first_sync(&self, timeout: Duration) -> Result<()> {
        let mut ready_rx = self.ready_tx.subscribe();
        let waited = tokio::time::timeout(timeout, ready_rx.wait_for(|ready| *ready))
            .await
            .map(|ready| ready.map(|_| ()));
        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(CFError::internal("Config synchronizer dropped")),
            Err(_) => Err(CFError::new(
                ErrorCode::FirstSyncTimeout,
                format!("First config sync did not complete within {:?}", timeout),
            )),
        }
    }

    pub fn add_flag_listener(&self, key: impl Into<String>, listener: Arc<FlagListener>) -> ListenerId {
        self.flag_listeners.add(Arc::new(KeyedFlagListener {
            key: key.into(),
            callback: listener,
        }))
    }

    pub fn remove_flag_listener(&self, id: ListenerId) -> bool {
        self.flag_listeners.remove(id)
    }

    pub fn add_all_flags_listener(&self, listener: Arc<AllFlagsListener>) -> ListenerId {
        self.all_flags_listeners.add(listener)
    }

    pub fn remove_all_flags_listener(&self, id: ListenerId) -> bool {
        self.all_flags_listeners.remove(id)
    }

    pub fn clear_listeners(&self) {
        self.flag_listeners.clear();
        self.all_flags_listeners.clear();
    }

    async fn sync(&self, force: bool) -> Result<UpdateResult> {
        let _sync = self.sync_lock.lock().await;

        let transport = &self.transport;
        let metadata = self
            .guard
            .call(CONFIG_FETCH_KEY, "Metadata probe", || transport.fetch_metadata())
            .await?;

        let unchanged = self.state.lock().last_metadata.as_ref() == Some(&metadata);
        if unchanged && !force {
            tracing::debug!("Config metadata unchanged, skipping fetch");
            return Ok(UpdateResult::NotModified);
        }

        let settings = self
            .guard
            .call(CONFIG_FETCH_KEY, "SDK settings fetch", || transport.fetch_sdk_settings())
            .await?;
        self.state.lock().settings = Some(settings.clone());

        if !settings.allows_config_fetch() {
            tracing::warn!(
                "Account disabled or SDK skipped (enabled: {}, skip: {}); not fetching configs",
                settings.cf_account_enabled,
                settings.cf_skip_sdk
            );
            self.state.lock().last_metadata = Some(metadata);
            self.ready_tx.send_replace(true);
            return Ok(UpdateResult::SkippedByAccount);
        }

        let user = self.user.read().clone();
        let body = self
            .guard
            .call(CONFIG_FETCH_KEY, "Config fetch", || transport.fetch_user_configs(&user))
            .await?;

        let flags = parse_configs(&body);
        let new_snapshot = Arc::new(ConfigSnapshot::new(
            flags,
            metadata.etag.clone(),
            metadata.last_modified.clone(),
            self.clock.now(),
        ));

        let previous = std::mem::replace(&mut *self.snapshot.write(), Arc::clone(&new_snapshot));
        self.state.lock().last_metadata = Some(metadata);
        self.ready_tx.send_replace(true);

        let changed_keys = changed_keys(&previous, &new_snapshot);
        tracing::info!(
            "Installed config snapshot with {} flags ({} changed)",
            new_snapshot.len(),
            changed_keys.len()
        );
        self.notify(&new_snapshot, &changed_keys);

        Ok(UpdateResult::Updated { changed_keys })
    }

    fn notify(&self, snapshot: &ConfigSnapshot, changed_keys: &[String]) {
        if changed_keys.is_empty() {
            return;
        }

        self.flag_listeners.notify(|listener| {
            if changed_keys.iter().any(|key| key == &listener.key) {
                (listener.callback)(&listener.key, snapshot.get(&listener.key));
            }
        });

        let values = snapshot.values();
        self.all_flags_listeners.notify(|listener| listener(&values));
    }
}

/// Keys added, removed or whose value differs between two snapshots.
fn changed_keys(previous: &ConfigSnapshot, next: &ConfigSnapshot) -> Vec<String> {
    let mut keys: Vec<String> = next
        .keys()
        .into_iter()
        .filter(|key| previous.get(key) != next.get(key))
        .collect();
    keys.extend(previous.keys().into_iter().filter(|key| !next.contains(key)));
    keys.sort();
    keys
}

/// Parse a user-configs body into flag entries.
///
/// Accepts `{"configs": {...}}` or a bare map. Each entry's `variation` is
/// converted according to `variation_data_type`; when the tag is unknown or
/// does not match, the raw value is kept and a warning is logged.
pub fn parse_configs(body: &Value) -> HashMap<String, FlagEntry> {
    let configs = match body.get("configs").and_then(Value::as_object) {
        Some(configs) => configs,
        None => match body.as_object() {
            Some(configs) => configs,
            None => {
                tracing::warn!("User configs response is not an object; ignoring");
                return HashMap::new();
            }
        },
    };

    configs
        .iter()
        .map(|(key, raw)| (key.clone(), parse_entry(key, raw)))
        .collect()
}

fn parse_entry(key: &str, raw: &Value) -> FlagEntry {
    let Some(object) = raw.as_object().filter(|o| o.contains_key("variation")) else {
        return FlagEntry::new(FlagValue::from(raw.clone()));
    };

    let variation = &object["variation"];
    let declared = object.get("variation_data_type").and_then(Value::as_str);
    let value = match declared.and_then(FlagType::parse) {
        Some(flag_type) => FlagValue::from_typed(variation, flag_type).unwrap_or_else(|| {
            tracing::warn!(
                "Flag '{}' declared as {:?} but value does not match; using raw value",
                key,
                flag_type
            );
            FlagValue::from(variation.clone())
        }),
        None => {
            tracing::warn!(
                "Flag '{}' has unknown variation type {:?}; inferring from value",
                key,
                declared
            );
            FlagValue::from(variation.clone())
        }
    };

    let entry = FlagEntry::new(value);
    match parse_experience(object) {
        Some(experience) => entry.with_experience(experience),
        None => entry,
    }
}

fn parse_experience(object: &Map<String, Value>) -> Option<ExperienceInfo> {
    let behaviour = object
        .get("experience_behaviour_response")
        .and_then(Value::as_object);

    let experience_id = behaviour.and_then(|b| str_field(b, "experience_id"))?;
    Some(ExperienceInfo {
        config_id: str_field(object, "config_id")?,
        variation_id: str_field(object, "variation_id")?,
        experience_id,
        behaviour_id: behaviour.and_then(|b| str_field(b, "behaviour_id")),
        rule_id: behaviour.and_then(|b| str_field(b, "rule_id")),
        is_template_config: object
            .get("is_template_config")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn str_field(object: &Map<String, Value>, name: &str) -> Option<String> {
    match object.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
