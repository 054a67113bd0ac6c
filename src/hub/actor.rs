//! Hub control loop and request handle

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::metrics::GatewayMetrics;
use crate::pump::ConnectionHandle;

/// Capacity of the hub request mailbox
pub const HUB_MAILBOX_CAPACITY: usize = 1024;

/// Unique identity of a registered connection
pub type ConnectionId = u64;

/// Registry entry for one connection.
///
/// The hub holds the only sender of the connection's outbound queue, so
/// dropping the registration closes the queue and lets the writer finish.
pub struct Registration {
    pub connection: Arc<ConnectionHandle>,
    pub queue: mpsc::Sender<Bytes>,
}

impl Registration {
    pub fn new(connection: Arc<ConnectionHandle>, queue: mpsc::Sender<Bytes>) -> Self {
        Self { connection, queue }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }
}

enum HubCommand {
    Register(Registration),
    Unregister(ConnectionId),
    Broadcast(Bytes),
    Count(oneshot::Sender<usize>),
}

/// Cloneable handle used by pumps and the feed bridge to talk to the hub
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    next_id: Arc<AtomicU64>,
}

impl HubHandle {
    /// Allocate a fresh connection identity
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Add a connection to the registry
    pub async fn register(&self, registration: Registration) -> Result<()> {
        self.send(HubCommand::Register(registration)).await
    }

    /// Remove a connection and close its queue; no-op if already gone
    pub async fn unregister(&self, id: ConnectionId) -> Result<()> {
        self.send(HubCommand::Unregister(id)).await
    }

    /// Fan a payload out to every registered connection
    pub async fn broadcast(&self, payload: Bytes) -> Result<()> {
        self.send(HubCommand::Broadcast(payload)).await
    }

    /// Number of connections currently registered
    pub async fn connection_count(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::Count(tx)).await?;
        rx.await.map_err(|_| GatewayError::HubUnavailable)
    }

    async fn send(&self, command: HubCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| GatewayError::HubUnavailable)
    }
}

/// The hub control loop. Owns the registry; nothing else mutates it.
pub struct Hub {
    registry: HashMap<ConnectionId, Registration>,
    commands: mpsc::Receiver<HubCommand>,
    metrics: Arc<GatewayMetrics>,
}

impl Hub {
    /// Create a hub and the handle used to reach it
    pub fn new(metrics: Arc<GatewayMetrics>) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(HUB_MAILBOX_CAPACITY);
        let hub = Self {
            registry: HashMap::new(),
            commands: rx,
            metrics,
        };
        let handle = HubHandle {
            commands: tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (hub, handle)
    }

    /// Process requests until every handle has been dropped
    pub async fn run(mut self) {
        info!("Hub control loop started");

        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register(registration) => self.register(registration),
                HubCommand::Unregister(id) => self.unregister(id),
                HubCommand::Broadcast(payload) => self.broadcast(payload),
                HubCommand::Count(reply) => {
                    let _ = reply.send(self.registry.len());
                }
            }
        }

        let remaining = self.registry.len();
        for (_, registration) in self.registry.drain() {
            registration.connection.begin_draining();
        }
        self.metrics.active_connections.set(0);
        info!(remaining, "Hub control loop stopped");
    }

    fn register(&mut self, registration: Registration) {
        let id = registration.id();
        if self.registry.contains_key(&id) {
            // Dropping the duplicate closes its queue; the existing entry stays.
            warn!(conn_id = id, "Connection already registered, ignoring duplicate");
            return;
        }

        registration.connection.mark_registered();
        self.registry.insert(id, registration);
        self.metrics.registrations.inc();
        self.metrics.active_connections.set(self.registry.len() as i64);
        debug!(conn_id = id, connections = self.registry.len(), "Connection registered");
    }

    fn unregister(&mut self, id: ConnectionId) {
        if let Some(registration) = self.registry.remove(&id) {
            registration.connection.begin_draining();
            self.metrics.active_connections.set(self.registry.len() as i64);
            debug!(conn_id = id, connections = self.registry.len(), "Connection unregistered");
        }
    }

    fn broadcast(&mut self, payload: Bytes) {
        let mut evicted = Vec::new();

        for (id, registration) in &self.registry {
            match registration.queue.try_send(payload.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(conn_id = id, "Outbound queue full, disconnecting slow consumer");
                    self.metrics.backpressure_disconnects.inc();
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(conn_id = id, "Writer already gone, removing connection");
                    evicted.push(*id);
                }
            }
        }

        for id in evicted {
            self.unregister(id);
        }

        self.metrics.broadcasts.inc();
        debug!(
            len = payload.len(),
            connections = self.registry.len(),
            "Broadcast delivered"
        );
    }
}
