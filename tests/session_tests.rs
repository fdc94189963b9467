mod common;

use common::manual_clock;
use customfit::core::{RotationReason, SessionConfig, SessionManager};
use customfit::platform::ManualClock;
use customfit::storage::{InMemoryStorage, Storage, SESSION_STORAGE_KEY};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn config() -> SessionConfig {
    SessionConfig {
        max_duration: Duration::from_secs(60 * 60),
        inactivity_timeout: Duration::from_secs(30 * 60),
        background_threshold: Duration::from_secs(15 * 60),
        rotate_on_auth_change: true,
    }
}

fn manager_with(clock: Arc<ManualClock>, storage: Arc<InMemoryStorage>) -> SessionManager {
    SessionManager::new(config(), clock, storage, None)
}

type Rotations = Arc<Mutex<Vec<(String, String, RotationReason)>>>;

fn record_rotations(manager: &SessionManager) -> Rotations {
    let rotations: Rotations = Arc::new(Mutex::new(Vec::new()));
    let sink = rotations.clone();
    manager.add_listener(Arc::new(move |old: &str, new: &str, reason: RotationReason| {
        sink.lock().push((old.to_string(), new.to_string(), reason));
    }));
    rotations
}

#[test]
fn test_forced_rotation_notifies_once() {
    let manager = manager_with(manual_clock(), Arc::new(InMemoryStorage::new()));
    let rotations = record_rotations(&manager);
    let before = manager.current_session_id();

    let after = manager.force_session_rotation();

    assert_ne!(before, after);
    assert_eq!(manager.current_session_id(), after);
    assert_eq!(
        rotations.lock().clone(),
        vec![(before, after, RotationReason::Manual)]
    );
}

#[test]
fn test_activity_within_limits_keeps_session() {
    let clock = manual_clock();
    let manager = manager_with(clock.clone(), Arc::new(InMemoryStorage::new()));
    let id = manager.current_session_id();

    clock.advance(Duration::from_secs(10 * 60));
    assert_eq!(manager.update_activity(), id);
    clock.advance(Duration::from_secs(20 * 60));
    assert_eq!(manager.update_activity(), id);
}

#[test]
fn test_inactivity_rotates_on_next_activity() {
    let clock = manual_clock();
    let manager = manager_with(clock.clone(), Arc::new(InMemoryStorage::new()));
    let rotations = record_rotations(&manager);
    let id = manager.current_session_id();

    clock.advance(Duration::from_secs(31 * 60));
    let next = manager.update_activity();

    assert_ne!(next, id);
    assert_eq!(rotations.lock()[0].2, RotationReason::InactivityTimeout);
}

#[test]
fn test_max_duration_rotates_even_when_active() {
    let clock = manual_clock();
    let manager = manager_with(clock.clone(), Arc::new(InMemoryStorage::new()));
    let rotations = record_rotations(&manager);

    for _ in 0..6 {
        clock.advance(Duration::from_secs(10 * 60));
        manager.update_activity();
    }

    let reasons: Vec<RotationReason> = rotations.lock().iter().map(|r| r.2).collect();
    assert_eq!(reasons, vec![RotationReason::MaxDurationExceeded]);
}

#[test]
fn test_long_background_rotates_on_foreground() {
    let clock = manual_clock();
    let manager = manager_with(clock.clone(), Arc::new(InMemoryStorage::new()));
    let rotations = record_rotations(&manager);
    let id = manager.current_session_id();

    manager.on_app_background();
    clock.advance(Duration::from_secs(16 * 60));
    let next = manager.on_app_foreground();

    assert_ne!(next, id);
    assert_eq!(rotations.lock()[0].2, RotationReason::BackgroundTimeout);
}

#[test]
fn test_short_background_keeps_session() {
    let clock = manual_clock();
    let manager = manager_with(clock.clone(), Arc::new(InMemoryStorage::new()));
    let id = manager.current_session_id();

    manager.on_app_background();
    clock.advance(Duration::from_secs(5 * 60));

    assert_eq!(manager.on_app_foreground(), id);
}

#[test]
fn test_auth_change_rotates() {
    let manager = manager_with(manual_clock(), Arc::new(InMemoryStorage::new()));
    let rotations = record_rotations(&manager);

    let rotated = manager.on_user_authentication_change(Some("user-2".to_string()));

    assert!(rotated.is_some());
    assert_eq!(rotations.lock()[0].2, RotationReason::AuthChange);
    assert!(manager
        .on_user_authentication_change(Some("user-2".to_string()))
        .is_none());
}

#[test]
fn test_auth_change_rotation_can_be_disabled() {
    let mut config = config();
    config.rotate_on_auth_change = false;
    let manager = SessionManager::new(config, manual_clock(), Arc::new(InMemoryStorage::new()), None);

    assert!(manager
        .on_user_authentication_change(Some("user-2".to_string()))
        .is_none());
}

#[test]
fn test_session_is_restored_from_storage() {
    let clock = manual_clock();
    let storage = Arc::new(InMemoryStorage::new());
    let first = manager_with(clock.clone(), storage.clone());
    let id = first.current_session_id();

    clock.advance(Duration::from_secs(5 * 60));
    let second = manager_with(clock, storage);

    assert_eq!(second.current_session_id(), id);
}

#[test]
fn test_expired_session_is_not_restored() {
    let clock = manual_clock();
    let storage = Arc::new(InMemoryStorage::new());
    let first = manager_with(clock.clone(), storage.clone());
    let id = first.current_session_id();

    clock.advance(Duration::from_secs(45 * 60));
    let second = manager_with(clock, storage);

    assert_ne!(second.current_session_id(), id);
}

#[test]
fn test_corrupt_persisted_session_is_replaced() {
    let storage = Arc::new(InMemoryStorage::new());
    storage.set(SESSION_STORAGE_KEY, b"not json").unwrap();

    let manager = manager_with(manual_clock(), storage.clone());

    let stored = storage.get(SESSION_STORAGE_KEY).unwrap().unwrap();
    assert!(String::from_utf8(stored)
        .unwrap()
        .contains(&manager.current_session_id()));
}

#[test]
fn test_rotation_is_persisted() {
    let storage = Arc::new(InMemoryStorage::new());
    let manager = manager_with(manual_clock(), storage.clone());

    let id = manager.force_session_rotation();

    let stored = storage.get(SESSION_STORAGE_KEY).unwrap().unwrap();
    assert!(String::from_utf8(stored).unwrap().contains(&id));
}

#[test]
fn test_removed_listener_is_not_called() {
    let manager = manager_with(manual_clock(), Arc::new(InMemoryStorage::new()));
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let id = manager.add_listener(Arc::new(move |_: &str, _: &str, _: RotationReason| *counter.lock() += 1));

    assert!(manager.remove_listener(id));
    manager.force_session_rotation();

    assert_eq!(*calls.lock(), 0);
}

#[test]
fn test_panicking_listener_does_not_block_others() {
    let manager = manager_with(manual_clock(), Arc::new(InMemoryStorage::new()));
    manager.add_listener(Arc::new(|_: &str, _: &str, _: RotationReason| panic!("listener failure")));
    let rotations = record_rotations(&manager);

    manager.force_session_rotation();

    assert_eq!(rotations.lock().len(), 1);
}
