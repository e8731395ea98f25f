//! End-to-end behaviour of the link manager against a real link file.
//!
//! Tests cover:
//!  1. First start with no file → generated link survives a restart
//!  2. Manual link decodes back to its identifiers
//!  3. Regeneration always changes the link
//!  4. Rejected manual input leaves no trace
//!  5. Tampered ciphertext is detected, preserved and replaced
//!  6. Concurrent writers: last event observed == stored link
//!  7. Lost or damaged master key → regeneration

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use roomlink_core::store::HEADER_SIZE;
use roomlink_core::{
    ChangeCause, FileKeystore, IdentifierGenerator, LinkChannel, LinkCodec, LinkError, LinkManager,
    LinkState, MemoryKeystore, SecretStore,
};
use tempfile::tempdir;

fn manager_with(dir: &Path, ks: &MemoryKeystore, capacity: usize) -> LinkManager {
    let codec = LinkCodec::default();
    let store = SecretStore::new(dir, Arc::new(ks.clone()), codec.clone());
    LinkManager::new(
        store,
        codec,
        IdentifierGenerator::default(),
        LinkChannel::new(capacity),
    )
}

fn manager(dir: &Path, ks: &MemoryKeystore) -> LinkManager {
    manager_with(dir, ks, 16)
}

fn fresh_store(dir: &Path, ks: &MemoryKeystore) -> SecretStore {
    SecretStore::new(dir, Arc::new(ks.clone()), LinkCodec::default())
}

// ─── Test 1: First start ────────────────────────────────────────────────────

#[test]
fn first_start_generates_and_persists() {
    let dir = tempdir().unwrap();
    let ks = MemoryKeystore::new();
    let m = manager(dir.path(), &ks);
    assert!(!m.store_path().exists());

    let ensured = m.ensure_link().unwrap();
    assert_eq!(ensured.caused_by, Some(ChangeCause::Generated));
    let link = LinkCodec::default().decode(&ensured.url).unwrap();
    assert!(link.push_id().len() >= 20);
    assert!(link.has_audience());

    // Simulated restart: new store instance, same key.
    let reloaded = fresh_store(dir.path(), &ks).load().unwrap().unwrap();
    assert_eq!(reloaded, ensured.url);
}

// ─── Test 2: Manual link ────────────────────────────────────────────────────

#[test]
fn manual_link_round_trips() {
    let dir = tempdir().unwrap();
    let ks = MemoryKeystore::new();
    let m = manager(dir.path(), &ks);
    let mut sub = m.subscribe();

    let url = m.set_manual_link("room42", "viewerKeyABC").unwrap();
    let event = sub.try_recv().unwrap();
    assert_eq!(event.caused_by, ChangeCause::ManualSet);
    assert_eq!(event.url, url);

    let link = LinkCodec::default().decode(&event.url).unwrap();
    assert_eq!(link.push_id(), "room42");
    assert_eq!(link.audience(), "viewerKeyABC");
    assert_eq!(fresh_store(dir.path(), &ks).load().unwrap(), Some(url));
}

#[test]
fn manual_link_without_audience() {
    let dir = tempdir().unwrap();
    let ks = MemoryKeystore::new();
    let m = manager(dir.path(), &ks);
    let url = m.set_manual_link("room42", "").unwrap();
    assert_eq!(url.as_str(), "https://vdo.ninja/?push=room42");
    assert_eq!(fresh_store(dir.path(), &ks).load().unwrap(), Some(url));
}

// ─── Test 3: Regeneration ───────────────────────────────────────────────────

#[test]
fn regeneration_always_changes_the_link() {
    let dir = tempdir().unwrap();
    let ks = MemoryKeystore::new();
    let m = manager(dir.path(), &ks);
    let mut previous = m.ensure_link().unwrap().url;
    for _ in 0..20 {
        let next = m.generate_new_link().unwrap();
        assert_ne!(next, previous);
        assert_eq!(fresh_store(dir.path(), &ks).load().unwrap().as_ref(), Some(&next));
        previous = next;
    }
}

// ─── Test 4: Rejected manual input ──────────────────────────────────────────

#[test]
fn rejected_manual_input_has_no_side_effects() {
    let dir = tempdir().unwrap();
    let ks = MemoryKeystore::new();
    let m = manager(dir.path(), &ks);
    let existing = m.ensure_link().unwrap().url;
    let before = fs::read(m.store_path()).unwrap();
    let mut sub = m.subscribe();

    for (push, audience) in [("", "anything"), ("", ""), ("room 42", ""), ("room42", "a&b")] {
        assert!(matches!(
            m.set_manual_link(push, audience),
            Err(LinkError::Validation(_))
        ));
    }

    assert_eq!(fs::read(m.store_path()).unwrap(), before);
    assert!(sub.try_recv().is_none());
    assert_eq!(m.current_link(), Some(existing));
}

// ─── Test 5: Tampering ──────────────────────────────────────────────────────

#[test]
fn tampered_store_is_preserved_and_replaced() {
    let dir = tempdir().unwrap();
    let ks = MemoryKeystore::new();
    let original = manager(dir.path(), &ks).generate_new_link().unwrap();

    let path = dir.path().join(roomlink_core::store::LINK_FILE);
    let mut raw = fs::read(&path).unwrap();
    raw[HEADER_SIZE] ^= 0xFF;
    fs::write(&path, &raw).unwrap();

    assert!(matches!(
        fresh_store(dir.path(), &ks).load(),
        Err(LinkError::DecryptionFailed)
    ));

    let restarted = manager(dir.path(), &ks);
    let ensured = restarted.ensure_link().unwrap();
    assert!(matches!(ensured.discarded, Some(LinkError::DecryptionFailed)));
    assert_eq!(ensured.caused_by, Some(ChangeCause::Generated));
    assert_ne!(ensured.url, original);

    let preserved = ensured.preserved_at.unwrap();
    assert_eq!(fs::read(&preserved).unwrap(), raw);
    assert_eq!(
        fresh_store(dir.path(), &ks).load().unwrap(),
        Some(ensured.url)
    );
}

// ─── Test 6: Concurrency ────────────────────────────────────────────────────

#[test]
fn concurrent_writers_never_lose_the_last_update() {
    let dir = tempdir().unwrap();
    let ks = MemoryKeystore::new();
    let m = Arc::new(manager_with(dir.path(), &ks, 256));
    let mut sub = m.subscribe();

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let m = Arc::clone(&m);
            thread::spawn(move || {
                for i in 0..10 {
                    if (t + i) % 2 == 0 {
                        m.generate_new_link().unwrap();
                    } else {
                        m.set_manual_link(&format!("room-{t}-{i}"), "viewer").unwrap();
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let last = std::iter::from_fn(|| sub.try_recv()).last().unwrap();
    assert_eq!(last.seq, 80);
    assert_eq!(m.current_link().as_ref(), Some(&last.url));
    assert_eq!(fresh_store(dir.path(), &ks).load().unwrap(), Some(last.url));
}

#[test]
fn concurrent_startup_transitions_once() {
    let dir = tempdir().unwrap();
    let ks = MemoryKeystore::new();
    let m = Arc::new(manager(dir.path(), &ks));
    let mut sub = m.subscribe();

    let urls: Vec<_> = (0..8)
        .map(|_| {
            let m = Arc::clone(&m);
            thread::spawn(move || m.ensure_link().unwrap().url)
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    assert!(urls.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(m.state(), LinkState::Present);
    assert!(sub.try_recv().is_some());
    assert!(sub.try_recv().is_none());
}

// ─── Test 7: Lost key ───────────────────────────────────────────────────────

#[test]
fn lost_master_key_leads_to_regeneration() {
    let dir = tempdir().unwrap();
    let old = manager(dir.path(), &MemoryKeystore::new())
        .generate_new_link()
        .unwrap();

    let new_key = MemoryKeystore::new();
    let m = manager(dir.path(), &new_key);
    let ensured = m.ensure_link().unwrap();
    assert!(matches!(ensured.discarded, Some(LinkError::DecryptionFailed)));
    assert_ne!(ensured.url, old);
    assert_eq!(fresh_store(dir.path(), &new_key).load().unwrap(), Some(ensured.url));
}

fn file_key_manager(dir: &Path) -> LinkManager {
    let codec = LinkCodec::default();
    let keystore = Arc::new(FileKeystore::new(dir.join(roomlink_core::keystore::KEY_FILE)));
    LinkManager::new(
        SecretStore::new(dir, keystore, codec.clone()),
        codec,
        IdentifierGenerator::default(),
        LinkChannel::default(),
    )
}

#[test]
fn truncated_key_file_leads_to_regeneration() {
    let dir = tempdir().unwrap();
    let old = file_key_manager(dir.path()).generate_new_link().unwrap();
    fs::write(dir.path().join(roomlink_core::keystore::KEY_FILE), b"short").unwrap();

    let m = file_key_manager(dir.path());
    let ensured = m.ensure_link().unwrap();
    assert!(matches!(ensured.discarded, Some(LinkError::DecryptionFailed)));
    assert_ne!(ensured.url, old);

    // Later writes keep working under the replacement key.
    let manual = m.set_manual_link("room42", "viewerKeyABC").unwrap();
    let regenerated = m.generate_new_link().unwrap();
    assert_ne!(regenerated, manual);

    let restarted = file_key_manager(dir.path());
    let reloaded = restarted.ensure_link().unwrap();
    assert_eq!(reloaded.caused_by, Some(ChangeCause::Loaded));
    assert_eq!(reloaded.url, regenerated);
}

#[tokio::test]
async fn surfaces_refresh_from_events() {
    let dir = tempdir().unwrap();
    let m = Arc::new(manager(dir.path(), &MemoryKeystore::new()));
    let mut window_a = m.subscribe();
    let mut window_b = m.subscribe();

    let writer = Arc::clone(&m);
    let expected = tokio::task::spawn_blocking(move || writer.generate_new_link().unwrap())
        .await
        .unwrap();

    assert_eq!(window_a.recv().await.unwrap().url, expected);
    assert_eq!(window_b.recv().await.unwrap().url, expected);
}
