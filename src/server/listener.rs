use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::VncError;
use crate::events::VncEvent;
use crate::protocol::Rect;
use crate::server::builder::{ServerOptions, VncServerBuilder};
use crate::server::connection;
use crate::server::hub::Hub;
use crate::server::surface::{Surface, SurfaceLock};

/// How long `stop` waits for each task to unwind before abandoning it.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A VNC server exposing one animator-owned surface to multiple clients.
///
/// The animator draws into the surface while holding the surface lock,
/// reports changes through [`mark_damage`](Self::mark_damage), and drains
/// client input through [`get_event`](Self::get_event). The accept loop can
/// run on the caller's task ([`serve_forever`](Self::serve_forever)), on a
/// background task ([`daemonise`](Self::daemonise)), or be driven manually
/// ([`start`](Self::start) plus [`poll`](Self::poll)).
pub struct VncServer {
    hub: Arc<Hub>,
    events: tokio::sync::Mutex<mpsc::Receiver<VncEvent>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    listener: Mutex<Option<Arc<TcpListener>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl VncServer {
    /// Start configuring a server for `surface`, whose pixel bytes will
    /// only ever be read while `surface_lock` is held.
    pub fn builder(surface: Surface, surface_lock: SurfaceLock) -> VncServerBuilder {
        VncServerBuilder::new(surface, surface_lock)
    }

    pub(crate) fn new(surface: Surface, surface_lock: SurfaceLock, options: ServerOptions) -> Self {
        let (event_tx, event_rx) = mpsc::channel(options.event_queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            hub: Arc::new(Hub::new(surface, surface_lock, options, event_tx)),
            events: tokio::sync::Mutex::new(event_rx),
            shutdown_tx,
            shutdown_rx,
            listener: Mutex::new(None),
            accept_task: Mutex::new(None),
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Bind the listening socket. Idempotent; connections are only
    /// accepted once `serve_forever`, `daemonise` or `poll` runs.
    pub async fn start(&self) -> Result<(), VncError> {
        if self.listener.lock().is_some() {
            return Ok(());
        }
        let addr = format!("{}:{}", self.hub.options.host, self.hub.options.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("listening on {}", listener.local_addr()?);
        let mut slot = self.listener.lock();
        if slot.is_none() {
            *slot = Some(Arc::new(listener));
        }
        Ok(())
    }

    /// The bound address, once `start` has run. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Accept connections on the caller's task until [`stop`](Self::stop).
    pub async fn serve_forever(&self) -> Result<(), VncError> {
        self.start().await?;
        let listener = self.bound_listener()?;
        let result = accept_loop(
            self.hub.clone(),
            listener,
            self.shutdown_rx.clone(),
            self.connections.clone(),
        )
        .await;
        if let Err(e) = &result {
            warn!("listener failed: {e}");
        }
        result
    }

    /// Accept connections on a background task; returns immediately.
    /// [`stop`](Self::stop) joins the task.
    pub async fn daemonise(&self) -> Result<(), VncError> {
        self.start().await?;
        let listener = self.bound_listener()?;
        let mut task = self.accept_task.lock();
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return Ok(());
        }
        let hub = self.hub.clone();
        let shutdown = self.shutdown_rx.clone();
        let connections = self.connections.clone();
        *task = Some(tokio::spawn(async move {
            if let Err(e) = accept_loop(hub, listener, shutdown, connections).await {
                warn!("listener failed: {e}");
            }
        }));
        Ok(())
    }

    /// Accept at most one pending connection, waiting up to `timeout`.
    /// Returns whether a connection was accepted.
    pub async fn poll(&self, timeout: Duration) -> Result<bool, VncError> {
        self.start().await?;
        let listener = self.bound_listener()?;
        match tokio::time::timeout(timeout, listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!("accepted connection from {peer}");
                spawn_connection(&self.hub, &self.shutdown_rx, &self.connections, stream);
                Ok(true)
            }
            Ok(Err(e)) => Err(VncError::Io(e)),
            Err(_) => Ok(false),
        }
    }

    /// Stop listening and close every client connection.
    ///
    /// Idempotent. Blocked socket reads and event-queue sends unwind via
    /// the shutdown signal, and every task the server spawned has been
    /// joined (or, past a generous timeout, aborted) when this returns.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        *self.listener.lock() = None;

        let accept = self.accept_task.lock().take();
        if let Some(task) = accept {
            let abort = task.abort_handle();
            if tokio::time::timeout(STOP_JOIN_TIMEOUT, task).await.is_err() {
                abort.abort();
                warn!("accept loop did not stop in time; aborted");
            }
        }

        let connections: Vec<JoinHandle<()>> = {
            let mut tasks = self.connections.lock();
            tasks.drain(..).collect()
        };
        for task in connections {
            let abort = task.abort_handle();
            if tokio::time::timeout(STOP_JOIN_TIMEOUT, task).await.is_err() {
                abort.abort();
                warn!("connection task did not stop in time; aborted");
            }
        }
    }

    /// Report a changed region of the surface to every client.
    pub fn mark_damage(&self, rect: Rect) {
        self.hub.mark_damage(rect);
    }

    /// Report that the whole surface changed.
    pub fn mark_damage_all(&self) {
        self.hub.mark_damage_all();
    }

    /// Swap the served surface for a new one, guarded by its own lock.
    ///
    /// Clients advertising the DesktopSize pseudo-encoding are told the
    /// new geometry in their next update; every client is redelivered the
    /// full frame either way.
    pub fn change_surface(&self, surface: Surface, surface_lock: SurfaceLock) {
        self.hub.change_surface(surface, surface_lock);
    }

    /// Rename the desktop. Clients advertising the DesktopName
    /// pseudo-encoding are told in their next update.
    pub fn change_name(&self, name: impl Into<String>) {
        self.hub.change_name(name.into());
    }

    /// Next input event from any client.
    ///
    /// `None` means the timeout passed without an event, or the server was
    /// stopped with nothing left in the queue. Passing no timeout waits
    /// until an event arrives or the server stops.
    pub async fn get_event(&self, timeout: Option<Duration>) -> Option<VncEvent> {
        let mut events = self.events.lock().await;
        match timeout {
            Some(limit) => tokio::time::timeout(limit, events.recv())
                .await
                .ok()
                .flatten(),
            None => {
                let mut shutdown = self.shutdown_rx.clone();
                if *shutdown.borrow() {
                    return events.try_recv().ok();
                }
                tokio::select! {
                    event = events.recv() => event,
                    _ = shutdown.changed() => events.try_recv().ok(),
                }
            }
        }
    }

    fn bound_listener(&self) -> Result<Arc<TcpListener>, VncError> {
        self.listener
            .lock()
            .clone()
            .ok_or_else(|| VncError::Fatal("server is not listening".to_string()))
    }
}

async fn accept_loop(
    hub: Arc<Hub>,
    listener: Arc<TcpListener>,
    mut shutdown: watch::Receiver<bool>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
) -> Result<(), VncError> {
    if *shutdown.borrow() {
        return Ok(());
    }
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!("accepted connection from {peer}");
                spawn_connection(&hub, &shutdown, &connections, stream);
            }
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

fn spawn_connection(
    hub: &Arc<Hub>,
    shutdown: &watch::Receiver<bool>,
    connections: &Arc<Mutex<Vec<JoinHandle<()>>>>,
    stream: TcpStream,
) {
    let task = tokio::spawn(connection::run(stream, hub.clone(), shutdown.clone()));
    let mut tasks = connections.lock();
    tasks.retain(|t| !t.is_finished());
    tasks.push(task);
}
