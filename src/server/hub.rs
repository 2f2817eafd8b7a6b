use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::trace;

use crate::error::VncError;
use crate::events::VncEvent;
use crate::protocol::Rect;
use crate::server::builder::ServerOptions;
use crate::server::damage::Damage;
use crate::server::surface::{Surface, SurfaceLock};

/// Per-connection state the hub fans notifications out to.
///
/// The connection task owns the socket; the hub only touches this handle,
/// so a slow client can never block the animator or another connection.
pub(crate) struct ClientHandle {
    pub(crate) id: usize,
    pub(crate) damage: Mutex<Damage>,
    pending_resize: AtomicBool,
    pending_name: AtomicBool,
    pub(crate) wake: Notify,
}

impl ClientHandle {
    fn new(id: usize) -> Self {
        Self {
            id,
            damage: Mutex::new(Damage::default()),
            pending_resize: AtomicBool::new(false),
            pending_name: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub(crate) fn has_pending_resize(&self) -> bool {
        self.pending_resize.load(Ordering::Acquire)
    }

    pub(crate) fn has_pending_name(&self) -> bool {
        self.pending_name.load(Ordering::Acquire)
    }

    pub(crate) fn take_pending_resize(&self) -> bool {
        self.pending_resize.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn take_pending_name(&self) -> bool {
        self.pending_name.swap(false, Ordering::AcqRel)
    }
}

struct DisplayState {
    surface: Surface,
    lock: SurfaceLock,
    name: String,
}

/// State shared between the listener, the connection tasks and the
/// animator facade: the current surface descriptor, the desktop name and
/// the set of live clients.
///
/// Lock order is hub state before any per-connection lock before the
/// surface lock; none of them is ever held across an await point.
pub(crate) struct Hub {
    pub(crate) options: ServerOptions,
    display: Mutex<DisplayState>,
    clients: Mutex<Vec<Arc<ClientHandle>>>,
    next_id: AtomicUsize,
    pub(crate) event_tx: mpsc::Sender<VncEvent>,
}

impl Hub {
    pub(crate) fn new(
        surface: Surface,
        lock: SurfaceLock,
        options: ServerOptions,
        event_tx: mpsc::Sender<VncEvent>,
    ) -> Self {
        let name = options.desktop_name.clone();
        Self {
            options,
            display: Mutex::new(DisplayState {
                surface,
                lock,
                name,
            }),
            clients: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            event_tx,
        }
    }

    /// Register a connection; refused once `max_clients` are live.
    pub(crate) fn register(&self) -> Result<Arc<ClientHandle>, VncError> {
        let mut clients = self.clients.lock();
        if clients.len() >= self.options.max_clients {
            return Err(VncError::TooManyClients);
        }
        let handle = Arc::new(ClientHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed)));
        clients.push(handle.clone());
        trace!("client {} registered ({} live)", handle.id, clients.len());
        Ok(handle)
    }

    pub(crate) fn unregister(&self, handle: &ClientHandle) {
        let mut clients = self.clients.lock();
        clients.retain(|c| c.id != handle.id);
        trace!("client {} unregistered ({} live)", handle.id, clients.len());
    }

    /// The current surface descriptor and its lock. Callers must hold the
    /// lock while reading pixel bytes through the descriptor.
    pub(crate) fn snapshot_surface(&self) -> (Surface, SurfaceLock) {
        let display = self.display.lock();
        (display.surface, display.lock.clone())
    }

    pub(crate) fn desktop_name(&self) -> String {
        self.display.lock().name.clone()
    }

    /// Record `rect` as dirty on every live connection.
    pub(crate) fn mark_damage(&self, rect: Rect) {
        for client in self.clients.lock().iter() {
            client.damage.lock().mark(rect);
            client.wake.notify_one();
        }
    }

    /// Record the whole surface as dirty on every live connection.
    pub(crate) fn mark_damage_all(&self) {
        let bounds = self.display.lock().surface.bounds();
        for client in self.clients.lock().iter() {
            client.damage.lock().mark_all(bounds);
            client.wake.notify_one();
        }
    }

    /// Swap the served surface. Every connection is flagged so its next
    /// update announces the new geometry (where the client can hear it)
    /// and redelivers the full frame.
    pub(crate) fn change_surface(&self, surface: Surface, lock: SurfaceLock) {
        let bounds = surface.bounds();
        {
            let mut display = self.display.lock();
            display.surface = surface;
            display.lock = lock;
        }
        for client in self.clients.lock().iter() {
            client.pending_resize.store(true, Ordering::Release);
            client.damage.lock().mark_all(bounds);
            client.wake.notify_one();
        }
    }

    /// Rename the desktop. No damage is implied; clients supporting the
    /// DesktopName pseudo-encoding are told on their next update.
    pub(crate) fn change_name(&self, name: String) {
        self.display.lock().name = name;
        for client in self.clients.lock().iter() {
            client.pending_name.store(true, Ordering::Release);
            client.wake.notify_one();
        }
    }
}
