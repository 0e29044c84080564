use std::sync::Arc;
use std::time::Duration;

use shelf_core::storage::StorageChange;
use shelf_core::sync::ChangeAction;
use shelf_core::{EngineConfig, MemoryStorage, NamedLocks, NewLink, Store, StoreEvent, SyncStorage};
use tokio::sync::broadcast;

fn engine_config() -> EngineConfig {
    EngineConfig {
        retry_backoff: Duration::from_millis(1),
        ..EngineConfig::default()
    }
}

/// Two stores sharing one area and one lock provider
async fn two_tabs() -> (Arc<MemoryStorage>, Store, Store) {
    let storage = Arc::new(MemoryStorage::new());
    let locks = Arc::new(NamedLocks::new());
    let a = Store::open(storage.clone(), locks.clone(), engine_config())
        .await
        .unwrap();
    let b = Store::open(storage.clone(), locks, engine_config())
        .await
        .unwrap();
    (storage, a, b)
}

fn drain(changes: &mut broadcast::Receiver<StorageChange>) -> Vec<StorageChange> {
    let mut drained = Vec::new();
    while let Ok(change) = changes.try_recv() {
        drained.push(change);
    }
    drained
}

async fn next_event(events: &mut broadcast::Receiver<StoreEvent>, wanted: &str) -> StoreEvent {
    let wait = async {
        loop {
            let event = events.recv().await.unwrap();
            if event.name() == wanted {
                return event;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("no {} event", wanted))
}

#[tokio::test]
async fn test_own_commit_is_suppressed_foreign_commit_reloads() {
    let (storage, a, b) = two_tabs().await;
    let mut changes = storage.subscribe();

    let link = a
        .add_item(NewLink::new("https://a.example"), None)
        .await
        .unwrap();
    let written = drain(&mut changes);
    assert!(!written.is_empty());

    let mut own = Vec::new();
    let mut foreign = Vec::new();
    for change in &written {
        own.push(a.handle_storage_change(change).await.unwrap());
        foreign.push(b.handle_storage_change(change).await.unwrap());
    }

    assert!(own.contains(&ChangeAction::SelfEcho));
    assert!(!own.contains(&ChangeAction::FullReload));
    assert!(foreign.contains(&ChangeAction::FullReload));
    assert!(b.get_item(&link.id).is_some());
}

#[tokio::test]
async fn test_dock_only_change_reconciles_pins() {
    let (storage, a, b) = two_tabs().await;
    let link = a
        .add_item(NewLink::new("https://a.example"), None)
        .await
        .unwrap();
    b.reload().await.unwrap();

    let mut changes = storage.subscribe();
    a.pin_to_dock(&link.id).await.unwrap();

    let mut actions = Vec::new();
    for change in drain(&mut changes) {
        actions.push(b.handle_storage_change(&change).await.unwrap());
    }
    // Background chunk cleanup from the earlier add may show up as noise
    assert!(actions.contains(&ChangeAction::DockOnly));
    assert!(!actions.contains(&ChangeAction::FullReload));
    assert_eq!(b.dock().len(), 1);
}

#[tokio::test]
async fn test_listener_publishes_reordered_for_foreign_commits() {
    let (_storage, a, b) = two_tabs().await;
    let _listener = b.spawn_change_listener();
    let mut events = b.subscribe();

    let link = a
        .add_item(NewLink::new("https://a.example"), None)
        .await
        .unwrap();

    next_event(&mut events, "reordered").await;
    assert!(b.get_item(&link.id).is_some());
}

#[tokio::test]
async fn test_listener_ignores_own_commits() {
    let (_storage, a, _b) = two_tabs().await;
    let _listener = a.spawn_change_listener();
    let mut events = a.subscribe();

    a.add_item(NewLink::new("https://a.example"), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert!(names.contains(&"itemAdded"));
    assert!(!names.contains(&"reordered"));
}

#[tokio::test]
async fn test_concurrent_tabs_do_not_lose_writes() {
    let (_storage, a, b) = two_tabs().await;

    let (x, y) = tokio::join!(
        a.add_item(NewLink::new("https://x.example"), None),
        b.add_item(NewLink::new("https://y.example"), None)
    );
    let (x, y) = (x.unwrap(), y.unwrap());

    a.reload().await.unwrap();
    assert!(a.get_item(&x.id).is_some());
    assert!(a.get_item(&y.id).is_some());
}

#[tokio::test]
async fn test_settings_change_reaches_other_tab() {
    let (storage, a, b) = two_tabs().await;
    let mut changes = storage.subscribe();
    a.set_page_size(6).await.unwrap();

    let mut events = b.subscribe();
    for change in drain(&mut changes) {
        b.handle_storage_change(&change).await.unwrap();
    }
    assert_eq!(b.settings().page_size, 6);
    let event = next_event(&mut events, "settingsChanged").await;
    assert!(matches!(event, StoreEvent::SettingsChanged { settings } if settings.page_size == 6));
}
