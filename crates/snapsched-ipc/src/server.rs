//! Daemon side of the control socket
//!
//! Each connection gets a reader task that turns request lines into
//! [`ServerMessage`]s and a writer task that drains the connection's
//! response queue. Lines that are not a valid request are answered
//! directly with an `invalid_request` error.

use snapsched_api::{ErrorCode, ErrorInfo, Request, Response};
use snapsched_util::ClientId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

type Clients = Arc<RwLock<HashMap<ClientId, mpsc::UnboundedSender<String>>>>;

/// What the socket hands to the request handler
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        uid: Option<u32>,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

/// Unix socket listener for snapsched clients
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    /// Response queue of every open connection
    clients: Clients,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

impl IpcServer {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale one left by an earlier daemon.
    pub async fn start(&mut self) -> IpcResult<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "Control socket listening");
        self.listener = Some(listener);
        Ok(())
    }

    /// The stream of client messages; only the first caller gets it.
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections until the task is dropped
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => self.register(stream).await,
                Err(e) => error!(error = %e, "Failed to accept connection"),
            }
        }
    }

    async fn register(&self, stream: UnixStream) {
        let client_id = ClientId::new();
        let uid = peer_uid(&stream);
        info!(client_id = %client_id, uid = ?uid, "Client connected");

        let (read_half, write_half) = stream.into_split();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<String>();

        self.clients
            .write()
            .await
            .insert(client_id.clone(), response_tx.clone());
        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            client_id: client_id.clone(),
            uid,
        });

        tokio::spawn(read_requests(
            read_half,
            client_id.clone(),
            response_tx,
            self.message_tx.clone(),
            self.clients.clone(),
        ));
        tokio::spawn(write_responses(write_half, client_id, response_rx));
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(response_tx) = clients.get(client_id) {
            response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forward request lines of one connection, then unregister it on EOF.
async fn read_requests(
    read_half: OwnedReadHalf,
    client_id: ClientId,
    response_tx: mpsc::UnboundedSender<String>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    clients: Clients,
) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(client_id = %client_id, "Client disconnected (EOF)");
                break;
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Read error");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                let _ = message_tx.send(ServerMessage::Request {
                    client_id: client_id.clone(),
                    request,
                });
            }
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Invalid request");
                let response =
                    Response::error(0, ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string()));
                if let Ok(json) = serde_json::to_string(&response) {
                    let _ = response_tx.send(json);
                }
            }
        }
    }

    clients.write().await.remove(&client_id);
    let _ = message_tx.send(ServerMessage::ClientDisconnected { client_id });
}

/// Write queued responses, one per line. Ends once every sender is gone.
async fn write_responses(
    mut writer: OwnedWriteHalf,
    client_id: ClientId,
    mut response_rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(mut msg) = response_rx.recv().await {
        msg.push('\n');
        if let Err(e) = writer.write_all(msg.as_bytes()).await {
            debug!(client_id = %client_id, error = %e, "Write error");
            break;
        }
    }
}

fn peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    nix::sys::socket::getsockopt(&stream.as_fd(), nix::sys::socket::sockopt::PeerCredentials)
        .ok()
        .map(|cred| cred.uid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IpcClient;
    use snapsched_api::{Command, ResponsePayload, ResponseResult};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_server_start() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();

        assert!(socket_path.exists());
        assert_eq!(server.socket_path(), socket_path.as_path());
    }

    #[tokio::test]
    async fn test_run_requires_start() {
        let dir = tempdir().unwrap();
        let server = IpcServer::new(dir.path().join("test.sock"));
        assert!(matches!(server.run().await, Err(IpcError::ServerError(_))));
    }

    #[tokio::test]
    async fn test_request_reaches_handler() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();
        let mut messages = server.take_message_receiver().await.unwrap();
        let server = Arc::new(server);

        let runner = server.clone();
        tokio::spawn(async move { runner.run().await });

        let responder = server.clone();
        tokio::spawn(async move {
            while let Some(msg) = messages.recv().await {
                if let ServerMessage::Request { client_id, request } = msg {
                    let response = Response::success(request.request_id, ResponsePayload::Pong);
                    responder.send_response(&client_id, response).await.unwrap();
                }
            }
        });

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        let response = client.send(Command::Ping).await.unwrap();
        assert_eq!(response.request_id, 1);
        assert!(matches!(response.result, ResponseResult::Ok(ResponsePayload::Pong)));
    }

    #[tokio::test]
    async fn test_malformed_line_gets_error_response() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();
        let server = Arc::new(server);
        let runner = server.clone();
        tokio::spawn(async move { runner.run().await });

        let stream = UnixStream::connect(&socket_path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(b"{not json}\n").await.unwrap();

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();

        let response: Response = serde_json::from_str(line.trim()).unwrap();
        match response.result {
            ResponseResult::Err(e) => assert_eq!(e.code, ErrorCode::InvalidRequest),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
