//! Integration tests for the pending message store.
//!
//! All tests are deterministic: timestamps are fixed ISO strings, and
//! each test works in its own temporary directory.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use jimchat_protocol::ChatMessage;
use jimchat_storage::PendingStore;
use jimchat_types::{Result, Timestamp};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns a unique temporary directory for each test.
fn temp_dir() -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "jimchat-pending-test-{}-{}-{}",
        std::process::id(),
        id,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    ));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

fn queue_path(dir: &PathBuf) -> PathBuf {
    dir.join("pending.json")
}

/// Builds a deterministic chat message addressed to `to`.
fn chat(seq: u32, to: &str) -> ChatMessage {
    ChatMessage {
        time: Timestamp::Iso(format!("2025-06-15T12:00:{seq:02}")),
        from: "alice".into(),
        to: to.into(),
        message: format!("message {seq}"),
        encoding: "utf-8".into(),
    }
}

// ---------------------------------------------------------------------------
// FIFO ordering
// ---------------------------------------------------------------------------

#[test]
fn enqueue_order_is_preserved_per_recipient() -> Result<()> {
    let dir = temp_dir();
    let store = PendingStore::open(&queue_path(&dir))?;

    for seq in 0..5 {
        store.enqueue("bob", chat(seq, "bob"))?;
    }
    store.enqueue("carol", chat(9, "carol"))?;

    let mut taken = store.take_deliverable(|_| true)?;
    taken.sort_by(|a, b| a.0.cmp(&b.0));

    let (bob, bob_messages) = &taken[0];
    assert_eq!(bob, "bob");
    let texts: Vec<&str> = bob_messages.iter().map(|m| m.message.as_str()).collect();
    assert_eq!(
        texts,
        ["message 0", "message 1", "message 2", "message 3", "message 4"]
    );

    assert_eq!(taken[1].0, "carol");
    assert_eq!(store.total_len()?, 0, "taking drains the store");
    Ok(())
}

// ---------------------------------------------------------------------------
// Persistence round-trip
// ---------------------------------------------------------------------------

#[test]
fn persist_then_restore_yields_identical_queues() -> Result<()> {
    let dir = temp_dir();
    let path = queue_path(&dir);

    let store = PendingStore::open(&path)?;
    store.enqueue("bob", chat(0, "bob"))?;
    store.enqueue("bob", chat(1, "bob"))?;
    store.enqueue("carol", chat(2, "carol"))?;
    store.persist()?;

    let restored = PendingStore::open(&path)?;
    assert_eq!(restored.len_for("bob")?, 2);
    assert_eq!(restored.len_for("carol")?, 1);

    let taken = restored.take_deliverable(|name| name == "bob")?;
    let (_, messages) = &taken[0];
    assert_eq!(messages[0], chat(0, "bob"));
    assert_eq!(messages[1], chat(1, "bob"));
    Ok(())
}

#[test]
fn missing_document_yields_empty_store() -> Result<()> {
    let dir = temp_dir();
    let store = PendingStore::open(&queue_path(&dir))?;
    assert_eq!(store.total_len()?, 0);
    Ok(())
}

#[test]
fn persisted_document_is_a_username_keyed_json_map() -> Result<()> {
    let dir = temp_dir();
    let path = queue_path(&dir);

    let store = PendingStore::open(&path)?;
    store.enqueue("bob", chat(0, "bob"))?;
    store.persist()?;

    let raw = std::fs::read(&path).expect("queue file exists");
    let doc: serde_json::Value = serde_json::from_slice(&raw).expect("valid json");
    let messages = doc["bob"].as_array().expect("list of messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["message"], "message 0");
    assert_eq!(messages[0]["encoding"], "utf-8");
    Ok(())
}

// ---------------------------------------------------------------------------
// Failed delivery
// ---------------------------------------------------------------------------

#[test]
fn failed_delivery_leaves_message_at_queue_front() -> Result<()> {
    let dir = temp_dir();
    let store = PendingStore::open(&queue_path(&dir))?;

    for seq in 0..3 {
        store.enqueue("bob", chat(seq, "bob"))?;
    }

    // Simulate a drain pass in which delivery of the second message
    // fails at the transport: the first was written successfully, the
    // failed message and everything after it go back to the front.
    let taken = store.take_deliverable(|_| true)?;
    let (recipient, messages) = taken.into_iter().next().expect("bob's queue");
    let undelivered: Vec<ChatMessage> = messages.into_iter().skip(1).collect();
    store.restore_front(&recipient, undelivered)?;

    // A later message arrives, then the recipient becomes reachable.
    store.enqueue("bob", chat(3, "bob"))?;

    let taken = store.take_deliverable(|_| true)?;
    let (_, messages) = &taken[0];
    let texts: Vec<&str> = messages.iter().map(|m| m.message.as_str()).collect();
    assert_eq!(
        texts,
        ["message 1", "message 2", "message 3"],
        "failed message stays first; nothing lost or duplicated"
    );
    Ok(())
}
