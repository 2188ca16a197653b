//! TCP server: accept loop, per-connection request handling and wiring
//!
//! Every connection gets two tasks. The reader task decodes one request line
//! at a time, dispatches it and queues exactly one response line before
//! reading the next request. The writer task drains the connection's outbound
//! queue, which is shared with the race broadcaster.

use crate::betting::BettingCoordinator;
use crate::client_manager::{Broadcaster, ClientManager};
use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, Services, Session};
use crate::error::ApiError;
use crate::race::EventBus;
use crate::repository::Repositories;
use crate::scheduler::{self, SchedulerWorker};
use log::{debug, error, info, warn};
use shared::{encode_line, Response};
use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Line-protocol server
pub struct Server {
    listener: TcpListener,
    clients: Arc<RwLock<ClientManager>>,
    dispatcher: Dispatcher,
    outbound_queue: usize,
}

impl Server {
    /// Builds every service, binds the listener and returns the server along
    /// with the race worker, which the caller must spawn.
    pub async fn new(
        config: ServerConfig,
        repos: Repositories,
    ) -> io::Result<(Self, SchedulerWorker)> {
        let clients = Arc::new(RwLock::new(ClientManager::new(config.max_clients)));
        let betting = Arc::new(BettingCoordinator::new(
            repos.users.clone(),
            repos.bets.clone(),
            config.payout_multiplier,
        ));

        // Settlement must be applied before clients hear about the result.
        let mut events = EventBus::new();
        events.subscribe(betting.clone());
        events.subscribe(Arc::new(Broadcaster::new(Arc::clone(&clients))));

        let (race_scheduler, worker) = scheduler::channel(events, &config);

        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let outbound_queue = config.outbound_queue;
        let services = Services {
            repos,
            scheduler: race_scheduler,
            betting,
            config: Arc::new(config),
        };

        Ok((
            Server {
                listener,
                clients,
                dispatcher: Dispatcher::new(services),
                outbound_queue,
            },
            worker,
        ))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn clients(&self) -> Arc<RwLock<ClientManager>> {
        Arc::clone(&self.clients)
    }

    /// Accepts connections forever, one task per connection.
    pub async fn run(self) {
        info!("Server started successfully");

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let connection = Connection {
                        clients: Arc::clone(&self.clients),
                        dispatcher: self.dispatcher.clone(),
                        outbound_queue: self.outbound_queue,
                    };
                    tokio::spawn(connection.serve(stream, addr));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Keeps a client registered for as long as it is alive.
///
/// Dropping it removes the client from the [`ClientManager`], which also
/// drops the manager's copy of the outbound sender. This runs on every exit
/// from the reader loop, including an unwinding one.
struct Registration {
    clients: Arc<RwLock<ClientManager>>,
    client_id: u32,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let removed = self
            .clients
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove_client(&self.client_id);
        if removed {
            debug!("Client {} unregistered", self.client_id);
        }
    }
}

/// Runs one request through `handle`, turning a panic into an error response.
fn respond_or_recover<F>(client_id: u32, handle: F) -> Response
where
    F: FnOnce() -> Response,
{
    match panic::catch_unwind(AssertUnwindSafe(handle)) {
        Ok(response) => response,
        Err(_) => {
            error!("Request from client {} panicked", client_id);
            Response::error(
                "",
                "",
                ApiError::Protocol("internal server error".to_string()).to_body(),
            )
        }
    }
}

struct Connection {
    clients: Arc<RwLock<ClientManager>>,
    dispatcher: Dispatcher,
    outbound_queue: usize,
}

impl Connection {
    async fn serve(self, stream: TcpStream, addr: SocketAddr) {
        let (reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::channel::<String>(self.outbound_queue.max(1));

        let client_id = self
            .clients
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .add_client(addr, tx.clone());

        let Some(client_id) = client_id else {
            warn!("Refusing connection from {}: server full", addr);
            let refusal = Response::error(
                "",
                "",
                ApiError::Protocol("Server full".to_string()).to_body(),
            );
            if let Ok(line) = encode_line(&refusal) {
                let _ = writer.write_all(line.as_bytes()).await;
            }
            let _ = writer.shutdown().await;
            return;
        };
        let registration = Registration {
            clients: Arc::clone(&self.clients),
            client_id,
        };

        let writer_task = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    debug!("Write to {} failed: {}", addr, e);
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let mut session = Session::default();
        let mut lines = BufReader::new(reader).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Read from client {} failed: {}", client_id, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let response = respond_or_recover(client_id, || {
                self.dispatcher.handle_line(&mut session, &line)
            });
            match encode_line(&response) {
                Ok(out) => {
                    if tx.send(out).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to encode response: {}", e),
            }

            if session.closing {
                debug!("Client {} asked to disconnect", client_id);
                break;
            }
        }

        drop(registration);

        // The writer stops once every sender is gone, after flushing what is queued.
        drop(tx);
        if let Err(e) = writer_task.await {
            error!("Writer task for client {} panicked: {}", client_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{decode_line, ErrorKind, ServerMessage, UserDto};
    use tokio::net::tcp::OwnedReadHalf;
    use tokio::time::timeout;

    async fn start(config: ServerConfig) -> SocketAddr {
        let (server, worker) = Server::new(config, Repositories::in_memory()).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(worker.run());
        tokio::spawn(server.run());
        addr
    }

    async fn read_response(lines: &mut tokio::io::Lines<BufReader<OwnedReadHalf>>) -> Response {
        let line = timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("timed out")
            .unwrap()
            .expect("connection closed");
        match decode_line::<ServerMessage>(&line).unwrap() {
            ServerMessage::Response(response) => response,
            other => panic!("Expected response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_response_over_tcp() {
        let addr = start(ServerConfig::instant()).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"{\"handler\":\"auth\",\"action\":\"register\",\"payload\":{\"username\":\"ann\",\"password\":\"pw\"}}\n")
            .await
            .unwrap();
        let response = read_response(&mut lines).await;
        assert_eq!(response.payload_as::<UserDto>().unwrap().username, "ann");

        writer.write_all(b"garbage\n").await.unwrap();
        let response = read_response(&mut lines).await;
        assert_eq!(response.error_body().unwrap().kind, ErrorKind::Protocol);

        writer
            .write_all(b"{\"handler\":\"auth\",\"action\":\"readBalance\"}\n")
            .await
            .unwrap();
        let response = read_response(&mut lines).await;
        assert_eq!(response.payload_as::<UserDto>().unwrap().balance, 1000);
    }

    #[tokio::test]
    async fn test_disconnect_closes_connection() {
        let addr = start(ServerConfig::instant()).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"{\"handler\":\"auth\",\"action\":\"disconnect\"}\n")
            .await
            .unwrap();
        assert!(read_response(&mut lines).await.is_ok());

        let next = timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("timed out")
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_registration_released_when_task_panics() {
        let clients = Arc::new(RwLock::new(ClientManager::new(1)));
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let (tx, mut rx) = mpsc::channel::<String>(4);
        let client_id = clients.write().unwrap().add_client(addr, tx).unwrap();

        let registration = Registration {
            clients: Arc::clone(&clients),
            client_id,
        };
        let handle = tokio::spawn(async move {
            let _registration = registration;
            panic!("reader failed");
        });
        assert!(handle.await.unwrap_err().is_panic());

        assert!(clients.read().unwrap().is_empty());
        // The manager held the only sender, so the writer side sees the queue close.
        assert!(rx.recv().await.is_none());

        // The freed slot can be taken again
        let (tx, _rx) = mpsc::channel::<String>(4);
        assert!(clients.write().unwrap().add_client(addr, tx).is_some());
    }

    #[test]
    fn test_panicking_request_becomes_error_response() {
        let response = respond_or_recover(1, || panic!("handler bug"));
        let body = response.error_body().unwrap();
        assert_eq!(body.kind, ErrorKind::Protocol);
        assert_eq!(body.message, "internal server error");

        let ok = respond_or_recover(1, || Response::ok("race", "readTracks", serde_json::Value::Null));
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_server_full_refusal() {
        let config = ServerConfig {
            max_clients: 1,
            ..ServerConfig::instant()
        };
        let (server, worker) = Server::new(config, Repositories::in_memory()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let clients = server.clients();
        tokio::spawn(worker.run());
        tokio::spawn(server.run());

        let _first = TcpStream::connect(addr).await.unwrap();
        for _ in 0..200 {
            if clients.read().unwrap().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = TcpStream::connect(addr).await.unwrap();
        let (reader, _writer) = second.into_split();
        let mut lines = BufReader::new(reader).lines();

        let body = read_response(&mut lines).await.error_body().unwrap();
        assert_eq!(body.kind, ErrorKind::Protocol);
        assert_eq!(body.message, "Server full");

        let next = timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("timed out")
            .unwrap();
        assert!(next.is_none());
    }
}
