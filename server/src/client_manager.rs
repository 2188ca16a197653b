//! Connected client registry and race event broadcasting
//!
//! This module tracks every open connection on the server side:
//! - Client registration with capacity enforcement and id assignment
//! - A bounded outbound queue per client, drained by that client's writer task
//! - Fan-out of race notifications to every registered client
//!
//! All writes to a client's socket go through its outbound queue, so a
//! broadcast can never interleave with a response on the same connection.

use crate::race::{RaceEvent, RaceListener};
use log::{debug, info, warn};
use shared::{encode_line, Notification};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A connected client and the sending half of its outbound queue
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Remote address, used for logging
    pub addr: SocketAddr,
    /// When the connection was accepted
    pub connected_at: Instant,
    sender: mpsc::Sender<String>,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, sender: mpsc::Sender<String>) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            sender,
        }
    }
}

/// Result of one broadcast pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Clients whose queue was full; they miss this message
    pub dropped: usize,
    /// Clients whose writer has gone away; they were unregistered
    pub removed: usize,
}

/// Tracks all connected clients
pub struct ClientManager {
    clients: HashMap<u32, Client>,
    next_client_id: u32,
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty registry. Client ids start at 1.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a connection. Returns `None` when the server is full.
    pub fn add_client(&mut self, addr: SocketAddr, sender: mpsc::Sender<String>) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, sender));

        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Client {} disconnected after {:.1}s",
                client.id,
                client.connected_at.elapsed().as_secs_f32()
            );
            true
        } else {
            false
        }
    }

    /// Queues `line` for every client without waiting on any of them.
    pub fn broadcast(&mut self, line: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        for (id, client) in &self.clients {
            match client.sender.try_send(line.to_string()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("Client {} is not keeping up, dropping broadcast", id);
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            if self.remove_client(&id) {
                report.removed += 1;
            }
        }

        report
    }

    pub fn client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Maps a race event onto the notification clients receive, if any
pub fn notification_for(event: &RaceEvent) -> Option<Notification> {
    match event {
        RaceEvent::Started { race_name, .. } => Some(Notification::RaceStarted {
            race_name: race_name.clone(),
        }),
        RaceEvent::RacerFinished {
            racer, position, ..
        } => Some(Notification::HorseFinished {
            racer: racer.to_dto(),
            position: *position,
        }),
        RaceEvent::Finished {
            race_name,
            final_order,
            ..
        } => Some(Notification::RaceFinished {
            race_name: race_name.clone(),
            final_positions: final_order.iter().map(|r| r.to_dto()).collect(),
        }),
        RaceEvent::Scheduled(_) | RaceEvent::Aborted { .. } => None,
    }
}

/// Forwards race events to every connected client
#[derive(Clone)]
pub struct Broadcaster {
    clients: Arc<RwLock<ClientManager>>,
}

impl Broadcaster {
    pub fn new(clients: Arc<RwLock<ClientManager>>) -> Self {
        Self { clients }
    }
}

impl RaceListener for Broadcaster {
    fn on_race_event(&self, event: &RaceEvent) {
        let Some(notification) = notification_for(event) else {
            return;
        };

        let line = match encode_line(&notification) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode notification: {}", e);
                return;
            }
        };

        let report = self
            .clients
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .broadcast(&line);
        debug!("Broadcast {:?}", report);
    }
}
