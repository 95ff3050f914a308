//! Shared fate for a set of cloned Connections (§4.6).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

use super::Command;
use crate::error::Result;
use crate::event::ConnectionCause;

struct Member {
    id: u64,
    cmd_tx: mpsc::Sender<Command>,
}

/// Tracks every Connection descended from one primary so `closeGroup` and
/// `abortGroup` can fan out to all of them (§4.6). Members are weakly
/// coupled: a member that already exited simply drops its send silently,
/// matching "abort never fails".
pub struct ConnectionGroup {
    members: Mutex<Vec<Member>>,
}

impl ConnectionGroup {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            members: Mutex::new(Vec::new()),
        })
    }

    pub(crate) async fn join(&self, id: u64, cmd_tx: mpsc::Sender<Command>) {
        self.members.lock().await.push(Member { id, cmd_tx });
    }

    /// Flushes and closes every member (§4.6). Individual failures are
    /// collected but do not stop the fan-out.
    pub(crate) async fn close_all(&self) -> Result<()> {
        let senders: Vec<mpsc::Sender<Command>> =
            self.members.lock().await.iter().map(|m| m.cmd_tx.clone()).collect();
        let mut first_err = None;
        for cmd_tx in senders {
            let (reply_tx, reply_rx) = oneshot::channel();
            if cmd_tx.send(Command::Close(reply_tx)).await.is_err() {
                continue;
            }
            if let Ok(Err(err)) = reply_rx.await {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Aborts every member with cause `GroupAborted` (§4.6, §8).
    pub(crate) async fn abort_all(&self) {
        let senders: Vec<mpsc::Sender<Command>> =
            self.members.lock().await.iter().map(|m| m.cmd_tx.clone()).collect();
        for cmd_tx in senders {
            let _ = cmd_tx.send(Command::Abort(ConnectionCause::GroupAborted)).await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn member_ids(&self) -> Vec<u64> {
        self.members.lock().await.iter().map(|m| m.id).collect()
    }
}
