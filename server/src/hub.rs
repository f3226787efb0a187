//! Membership and broadcast fan-out coordinator
//!
//! One task owns the set of live connections; registration, removal and
//! broadcast all arrive as commands on a single queue, so the set is never
//! touched from two places at once and nothing here needs a lock.
//!
//! Fan-out is at-most-once per client per broadcast: each registered
//! client gets a non-blocking enqueue onto its bounded outbound queue, and
//! a client whose queue is full is evicted on the spot rather than ever
//! stalling the loop. An evicted client stops receiving broadcasts and
//! must re-request a full panel sync to catch up.
//!
//! Queue close discipline: the hub holds one `Sender` per client and drops
//! it on unregister or eviction; the connection's inbound loop drops its
//! own clone when it exits. The outbound loop observes the channel as
//! closed only after every sender is gone, which makes the close a
//! one-shot event; there is no close() call to race on.

use log::{debug, info, warn};
use std::collections::HashMap;
use tokio::sync::mpsc;

pub type ClientId = u64;

/// What the hub keeps per registered connection: the identity and the
/// sending half of that connection's bounded outbound queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: ClientId,
    pub sender: mpsc::Sender<Vec<u8>>,
}

/// Commands consumed by the coordinator task.
#[derive(Debug)]
pub enum HubCommand {
    Register { client: ClientHandle },
    Unregister { id: ClientId },
    Broadcast { frame: Vec<u8> },
}

/// Cheap cloneable front for the coordinator task. Commands are fire and
/// forget; if the task is gone (shutdown) they are dropped.
#[derive(Debug, Clone)]
pub struct Hub {
    cmd_tx: mpsc::UnboundedSender<HubCommand>,
}

impl Hub {
    /// Spawns the coordinator task and returns its handle.
    pub fn spawn() -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(cmd_rx));
        Self { cmd_tx }
    }

    pub fn register(&self, client: ClientHandle) {
        let _ = self.cmd_tx.send(HubCommand::Register { client });
    }

    /// Removes a client from the fan-out set. Unknown ids are a no-op, so
    /// double unregistration is harmless.
    pub fn unregister(&self, id: ClientId) {
        let _ = self.cmd_tx.send(HubCommand::Unregister { id });
    }

    /// Queues an encoded frame for delivery to every registered client.
    pub fn broadcast(&self, frame: Vec<u8>) {
        let _ = self.cmd_tx.send(HubCommand::Broadcast { frame });
    }
}

async fn run(mut cmd_rx: mpsc::UnboundedReceiver<HubCommand>) {
    let mut clients: HashMap<ClientId, ClientHandle> = HashMap::new();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            HubCommand::Register { client } => {
                debug!("client {} registered ({} connected)", client.id, clients.len() + 1);
                clients.insert(client.id, client);
            }
            HubCommand::Unregister { id } => {
                if clients.remove(&id).is_some() {
                    info!("client {} unregistered ({} connected)", id, clients.len());
                }
            }
            HubCommand::Broadcast { frame } => {
                let mut evicted = Vec::new();
                for (id, client) in &clients {
                    match client.sender.try_send(frame.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("client {} outbound queue full, evicting", id);
                            evicted.push(*id);
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            debug!("client {} outbound queue closed, removing", id);
                            evicted.push(*id);
                        }
                    }
                }
                for id in evicted {
                    clients.remove(&id);
                }
            }
        }
    }

    info!("hub shutting down ({} clients still registered)", clients.len());
}
