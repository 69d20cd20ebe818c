//! Per-connection plumbing: identifiers, events, and the reader task.

use std::fmt;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;

use jimchat_types::JimError;

// ---------------------------------------------------------------------------
// ConnId
// ---------------------------------------------------------------------------

/// Identifier of a live connection, unique for the server's lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ConnEvent
// ---------------------------------------------------------------------------

/// What a reader task reports to the dispatch loop.
#[derive(Debug)]
pub enum ConnEvent {
    /// One received frame (at most one route-cycle's worth of bytes).
    Data { id: ConnId, raw: Vec<u8> },
    /// The peer vanished: orderly shutdown or transport error.
    Closed { id: ConnId, reason: JimError },
}

// ---------------------------------------------------------------------------
// Reader task
// ---------------------------------------------------------------------------

/// Reads frames from one connection and forwards them to the dispatch
/// loop until the peer goes away or the loop itself shuts down.
///
/// A zero-byte read is the peer's orderly shutdown and is reported as
/// [`JimError::PeerClosed`], distinct from an empty message.
pub async fn run_reader(
    id: ConnId,
    mut reader: OwnedReadHalf,
    events: mpsc::Sender<ConnEvent>,
    max_frame_len: usize,
) {
    let mut buf = vec![0u8; max_frame_len];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = events
                    .send(ConnEvent::Closed {
                        id,
                        reason: JimError::PeerClosed,
                    })
                    .await;
                break;
            }
            Ok(n) => {
                let frame = ConnEvent::Data {
                    id,
                    raw: buf[..n].to_vec(),
                };
                if events.send(frame).await.is_err() {
                    // Dispatch loop is gone; nothing left to report to.
                    break;
                }
            }
            Err(e) => {
                let _ = events
                    .send(ConnEvent::Closed {
                        id,
                        reason: e.into(),
                    })
                    .await;
                break;
            }
        }
    }
}
