//! Service wiring

use anyhow::{Context, Result};
use snapsched_config::Settings;
use snapsched_core::SnapScheduler;
use snapsched_host_local::LocalConnector;
use snapsched_ipc::{IpcServer, ServerMessage};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::handle_command;

/// Build the connector for every configured filesystem, creating the
/// metadata directories that hold the schedule databases.
pub fn build_connector(settings: &Settings) -> Result<LocalConnector> {
    let mut connector = LocalConnector::new(settings.scheduler.snapshot_dir.clone());

    for fs in &settings.filesystems {
        std::fs::create_dir_all(&fs.metadata_dir).with_context(|| {
            format!(
                "Failed to create metadata directory {:?} for filesystem '{}'",
                fs.metadata_dir, fs.name
            )
        })?;
        connector.add_filesystem(fs.name.clone(), &fs.root, &fs.metadata_dir);
    }

    if let Some(default_fs) = &settings.default_fs {
        connector.set_default_fs(default_fs.clone());
    }

    Ok(connector)
}

/// Main service state
pub struct Service {
    scheduler: Arc<SnapScheduler>,
    ipc: Arc<IpcServer>,
}

impl Service {
    /// Load schedules of every configured filesystem and start listening.
    ///
    /// `socket_path` overrides the configured socket.
    pub async fn new(settings: Settings, socket_path: Option<PathBuf>) -> Result<Self> {
        let connector = build_connector(&settings)?;

        let scheduler = Arc::new(SnapScheduler::new(
            Arc::new(connector),
            settings.scheduler.clone(),
        ));
        let loaded = scheduler.load_all();
        info!(
            loaded,
            configured = settings.filesystems.len(),
            "Schedules loaded"
        );

        let socket_path = socket_path.unwrap_or_else(|| settings.daemon.socket_path.clone());
        let mut ipc = IpcServer::new(&socket_path);
        ipc.start()
            .await
            .with_context(|| format!("Failed to listen on {:?}", socket_path))?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        Ok(Self {
            scheduler,
            ipc: Arc::new(ipc),
        })
    }

    pub fn scheduler(&self) -> &Arc<SnapScheduler> {
        &self.scheduler
    }

    /// Serve requests and fire snapshots until `shutdown` completes.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut ipc_messages = self
            .ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        self.scheduler.start();

        let ipc_accept = self.ipc.clone();
        let accept_task = tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        info!("Service running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                Some(msg) = ipc_messages.recv() => {
                    self.handle_ipc_message(msg);
                }
            }
        }

        info!("Shutting down snapschedd");

        accept_task.abort();
        self.scheduler.shutdown();
        self.ipc.shutdown();

        info!("Shutdown complete");
        Ok(())
    }

    fn handle_ipc_message(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                let scheduler = self.scheduler.clone();
                let ipc = self.ipc.clone();

                tokio::spawn(async move {
                    let request_id = request.request_id;
                    let handled = tokio::task::spawn_blocking(move || {
                        handle_command(
                            &scheduler,
                            request.request_id,
                            request.api_version,
                            request.command,
                        )
                    })
                    .await;

                    let response = match handled {
                        Ok(response) => response,
                        Err(e) => {
                            error!(request_id, error = %e, "Command handler panicked");
                            snapsched_api::Response::error(
                                request_id,
                                snapsched_api::ErrorInfo::new(
                                    snapsched_api::ErrorCode::InternalError,
                                    "command handler failed",
                                ),
                            )
                        }
                    };

                    if let Err(e) = ipc.send_response(&client_id, response).await {
                        debug!(client_id = %client_id, error = %e, "Response not delivered");
                    }
                });
            }

            ServerMessage::ClientConnected { client_id, uid } => {
                debug!(client_id = %client_id, uid = ?uid, "Client registered");
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");
            }
        }
    }
}
