//! Pending message store: per-recipient FIFO queues of undelivered
//! chat messages.
//!
//! The router always enqueues, never attempting direct delivery; the
//! dispatch loop's flush pass drains the queues of recipients
//! that are currently reachable. A delivery attempt that fails at the
//! transport is non-destructive: the undelivered tail is reinserted at
//! the front of that recipient's queue and the pass moves on to the
//! next recipient.
//!
//! # Durability
//!
//! The whole queue map is dumped to a single JSON document on clean
//! shutdown ([`PendingStore::persist`]) and reloaded on startup. A
//! crash between enqueue and persist loses the unflushed state; that
//! is the protocol's only durability guarantee.
//!
//! # Thread Safety
//!
//! All mutations are protected by `std::sync::Mutex`. No `unsafe`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use jimchat_protocol::ChatMessage;
use jimchat_types::{JimError, Result};

use crate::queue_file::{self, QueueMap};

// ---------------------------------------------------------------------------
// PendingStore
// ---------------------------------------------------------------------------

/// Durable per-recipient FIFO queue of undelivered messages.
pub struct PendingStore {
    inner: Mutex<QueueMap>,
    file_path: PathBuf,
}

impl PendingStore {
    /// Opens a store backed by the JSON document at `path`.
    ///
    /// If the file exists its contents are loaded; a missing file
    /// yields an empty store.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = queue_file::load(path)?;
        Ok(Self {
            inner: Mutex::new(entries),
            file_path: path.to_path_buf(),
        })
    }

    /// Appends a message to `recipient`'s queue.
    ///
    /// Insertion order is arrival order; O(1) amortized.
    pub fn enqueue(&self, recipient: &str, message: ChatMessage) -> Result<()> {
        let mut entries = self.lock_entries()?;
        entries
            .entry(recipient.to_string())
            .or_default()
            .push_back(message);
        Ok(())
    }

    /// Removes and returns the queued messages of every recipient for
    /// which `is_reachable` returns true, each queue in FIFO arrival
    /// order.
    ///
    /// Ordering across different recipients is unspecified. The caller
    /// attempts delivery and puts any undelivered tail back with
    /// [`PendingStore::restore_front`].
    pub fn take_deliverable<F>(&self, is_reachable: F) -> Result<Vec<(String, Vec<ChatMessage>)>>
    where
        F: Fn(&str) -> bool,
    {
        let mut entries = self.lock_entries()?;

        let recipients: Vec<String> = entries
            .keys()
            .filter(|name| is_reachable(name))
            .cloned()
            .collect();

        let mut taken = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            if let Some(queue) = entries.remove(&recipient) {
                if !queue.is_empty() {
                    taken.push((recipient, queue.into_iter().collect()));
                }
            }
        }

        Ok(taken)
    }

    /// Reinserts undelivered messages at the front of `recipient`'s
    /// queue, preserving their relative order.
    ///
    /// Used after a transport failure mid-delivery so that no message
    /// is lost or reordered.
    pub fn restore_front(&self, recipient: &str, messages: Vec<ChatMessage>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut entries = self.lock_entries()?;
        let queue = entries.entry(recipient.to_string()).or_default();
        for message in messages.into_iter().rev() {
            queue.push_front(message);
        }
        Ok(())
    }

    /// Number of messages queued for `recipient`.
    pub fn len_for(&self, recipient: &str) -> Result<usize> {
        let entries = self.lock_entries()?;
        Ok(entries.get(recipient).map_or(0, VecDeque::len))
    }

    /// Total number of queued messages across all recipients.
    pub fn total_len(&self) -> Result<usize> {
        let entries = self.lock_entries()?;
        Ok(entries.values().map(VecDeque::len).sum())
    }

    /// Dumps the full queue map to the backing JSON document.
    ///
    /// Called on clean shutdown; the write is atomic (tmp → fsync →
    /// rename).
    pub fn persist(&self) -> Result<()> {
        let entries = self.lock_entries()?;
        queue_file::save(&self.file_path, &entries)
    }

    // -- Internal ---------------------------------------------------------

    fn lock_entries(&self) -> Result<std::sync::MutexGuard<'_, QueueMap>> {
        self.inner.lock().map_err(|e| JimError::StorageError {
            reason: format!("pending store lock poisoned: {e}"),
        })
    }
}
