use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout, Instant};
use tracing::{debug, trace, warn};

use crate::error::VncError;
use crate::events::VncEvent;
use crate::protocol::messages::{put_string, ClientMsg, ServerInit};
use crate::protocol::pixel_format::{PixelConverter, PixelFormat};
use crate::protocol::security::vncauth::{self, CHALLENGE_LEN};
use crate::protocol::security::{AuthResult, SecurityType};
use crate::protocol::{Rect, VncEncoding, VncVersion};
use crate::server::hub::{ClientHandle, Hub};

/// The whole handshake (version, security, init) must complete within this
/// window or the socket is dropped.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

const SERVER_MSG_FRAMEBUFFER_UPDATE: u8 = 0;

/// Drive one accepted socket through its entire lifetime. Never returns an
/// error: failures are logged here and stay confined to this connection.
pub(crate) async fn run(stream: TcpStream, hub: Arc<Hub>, mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(_) => return,
    };
    debug!("connection received from {peer}");

    let registration = hub.register();
    let handle = registration.as_ref().ok().cloned();

    // The shutdown branch cancels the connection future at whatever await
    // point it is suspended on: a socket read, a write, or a blocked
    // event-queue send.
    let result = tokio::select! {
        result = drive(stream, &hub, &registration, peer) => result,
        _ = shutdown.changed() => Ok(()),
    };

    if let Some(handle) = handle {
        hub.unregister(&handle);
    }
    match result {
        Ok(()) => debug!("connection from {peer} closed"),
        Err(e) if e.is_disconnect() => debug!("client {peer} disconnected"),
        Err(e) => warn!("connection from {peer} failed: {e}"),
    }
}

async fn drive(
    mut stream: TcpStream,
    hub: &Arc<Hub>,
    registration: &Result<Arc<ClientHandle>, VncError>,
    peer: SocketAddr,
) -> Result<(), VncError> {
    let _ = stream.set_nodelay(true);

    let handle = match registration {
        Ok(handle) => handle.clone(),
        Err(_) => {
            timeout(HANDSHAKE_TIMEOUT, refuse_over_limit(&mut stream, hub))
                .await
                .map_err(|_| VncError::HandshakeTimeout)??;
            return Err(VncError::TooManyClients);
        }
    };

    let negotiated = timeout(HANDSHAKE_TIMEOUT, handshake(&mut stream, hub))
        .await
        .map_err(|_| VncError::HandshakeTimeout)??;
    debug!(
        "client {peer} initialised (version {:?}, read_only {})",
        negotiated.version, negotiated.read_only
    );

    let frame_period = Duration::from_secs_f64(1.0 / f64::from(hub.options.max_framerate));
    let (reader, writer) = stream.into_split();
    let mut connection = Connection {
        hub: hub.clone(),
        handle,
        reader,
        writer: Arc::new(Mutex::new(writer)),
        read_only: negotiated.read_only,
        converter: PixelConverter::native(),
        supports_desktop_size: false,
        supports_desktop_name: false,
        last_buttons: 0,
        update_requested: false,
        sent_name: negotiated.name,
        frame_period,
        last_update: Instant::now()
            .checked_sub(frame_period)
            .unwrap_or_else(Instant::now),
    };
    connection.message_loop().await
}

struct Negotiated {
    version: VncVersion,
    read_only: bool,
    name: String,
}

/// The security types this configuration offers, most preferred first.
fn offered_security_types(hub: &Hub) -> Vec<SecurityType> {
    if hub.options.password.is_some() || hub.options.read_only_password.is_some() {
        vec![SecurityType::VncAuth]
    } else {
        vec![SecurityType::None]
    }
}

/// Version, security and init phases, in protocol order.
async fn handshake(stream: &mut TcpStream, hub: &Hub) -> Result<Negotiated, VncError> {
    let version = hub
        .options
        .protocol_version_max
        .negotiate(stream)
        .await?;
    trace!("negotiated protocol version {version:?}");

    let read_only = authenticate(stream, hub, version).await?;

    // 7.3.1 ClientInit. Exclusive access is not supported; the request is
    // noted and the desktop stays shared.
    let shared = stream.read_u8().await?;
    if shared == 0 {
        debug!("client requested exclusive access (denied, as not supported)");
    }

    // 7.3.2 ServerInit
    let (surface, _lock) = hub.snapshot_surface();
    let name = hub.desktop_name();
    let mut buf = BytesMut::new();
    ServerInit {
        width: surface.width(),
        height: surface.height(),
        pixel_format: PixelFormat::rfb_native(),
        name: name.clone(),
    }
    .write_to(&mut buf);
    stream.write_all(&buf).await?;

    Ok(Negotiated {
        version,
        read_only,
        name,
    })
}

/// 7.1.2 and 7.1.3: security negotiation, VNC authentication when
/// configured, and the SecurityResult word. Returns whether the connection
/// is read-only.
async fn authenticate(
    stream: &mut TcpStream,
    hub: &Hub,
    version: VncVersion,
) -> Result<bool, VncError> {
    let options = &hub.options;
    let offered = offered_security_types(hub);
    let chosen = SecurityType::negotiate(&offered, version, stream).await?;
    trace!("security type {chosen:?} selected");

    let mut read_only = options.read_only;
    let failure: Option<String> = match chosen {
        SecurityType::None => None,
        SecurityType::VncAuth => {
            let challenge: [u8; CHALLENGE_LEN] = match &options.challenge_source {
                Some(source) => source(),
                None => rand::random(),
            };
            stream.write_all(&challenge).await?;

            let mut response = [0_u8; CHALLENGE_LEN];
            stream.read_exact(&mut response).await?;

            let matches = |password: &Option<String>| {
                password
                    .as_deref()
                    .map(|p| vncauth::expected_response(p, &challenge) == response)
                    .unwrap_or(false)
            };
            if matches(&options.password) {
                None
            } else if matches(&options.read_only_password) {
                read_only = true;
                None
            } else {
                Some("authentication failed".to_string())
            }
        }
        SecurityType::Invalid => Some("invalid security type".to_string()),
    };

    // 7.1.3 SecurityResult. For `None` there is no result word before 3.8.
    let has_security_result = version >= VncVersion::RFB38 || chosen != SecurityType::None;
    if has_security_result {
        match &failure {
            None => stream.write_u32(AuthResult::Ok.into()).await?,
            Some(reason) => {
                let mut buf = BytesMut::new();
                buf.put_u32(AuthResult::Failed.into());
                if version >= VncVersion::RFB38 {
                    put_string(&mut buf, reason);
                }
                stream.write_all(&buf).await?;
            }
        }
    }

    match failure {
        None => Ok(read_only),
        Some(reason) => Err(VncError::AuthFailed(reason)),
    }
}

/// Refusal path for connections over the client limit: complete the
/// version handshake so the refusal can be delivered in terms the client
/// understands, then report failure and drop the socket.
async fn refuse_over_limit(stream: &mut TcpStream, hub: &Hub) -> Result<(), VncError> {
    const REASON: &str = "too many clients";
    let version = hub
        .options
        .protocol_version_max
        .negotiate(stream)
        .await?;
    let mut buf = BytesMut::new();
    match version {
        VncVersion::RFB33 => {
            // 3.3 has no SecurityResult to fail; the refusal is the
            // Invalid security type plus a reason string.
            buf.put_u32(u32::from(u8::from(SecurityType::Invalid)));
            put_string(&mut buf, REASON);
        }
        _ => {
            let offered = offered_security_types(hub);
            let _ = SecurityType::negotiate(&offered, version, stream).await?;
            buf.put_u32(AuthResult::Failed.into());
            if version >= VncVersion::RFB38 {
                put_string(&mut buf, REASON);
            }
        }
    }
    stream.write_all(&buf).await?;
    Ok(())
}

/// One established client: the message loop plus everything needed to
/// produce framebuffer updates for it.
struct Connection {
    hub: Arc<Hub>,
    handle: Arc<ClientHandle>,
    reader: OwnedReadHalf,
    /// Serializes framebuffer updates against any other server-initiated
    /// message; each update is a single buffered write under this lock.
    writer: Arc<Mutex<OwnedWriteHalf>>,
    read_only: bool,
    converter: PixelConverter,
    supports_desktop_size: bool,
    supports_desktop_name: bool,
    last_buttons: u8,
    /// Latch set by FramebufferUpdateRequest; at most one update is in
    /// flight per request.
    update_requested: bool,
    /// The desktop name the client last heard, to suppress no-op renames.
    sent_name: String,
    frame_period: Duration,
    last_update: Instant,
}

impl Connection {
    async fn message_loop(&mut self) -> Result<(), VncError> {
        loop {
            self.maybe_send_update().await?;

            let deadline = self.throttle_deadline();
            let sleep_target = deadline.unwrap_or_else(Instant::now);
            tokio::select! {
                msgtype = self.reader.read_u8() => {
                    let msgtype = msgtype.map_err(|e| {
                        if e.kind() == std::io::ErrorKind::UnexpectedEof {
                            VncError::ConnectionClosed
                        } else {
                            VncError::Io(e)
                        }
                    })?;
                    self.dispatch(msgtype).await?;
                }
                _ = self.handle.wake.notified() => {}
                _ = tokio::time::sleep_until(sleep_target), if deadline.is_some() => {}
            }
        }
    }

    async fn dispatch(&mut self, msgtype: u8) -> Result<(), VncError> {
        match ClientMsg::read(msgtype, &mut self.reader).await? {
            ClientMsg::SetPixelFormat(format) => {
                // A format the server cannot produce ends the connection.
                self.converter = PixelConverter::new(format)?;
                trace!("client {} set pixel format {format:?}", self.handle.id);
                // Everything the client has seen is in the old format now.
                let (surface, _) = self.hub.snapshot_surface();
                self.handle.damage.lock().mark_all(surface.bounds());
            }
            ClientMsg::SetEncodings(raw) => {
                let recognised: Vec<VncEncoding> = raw
                    .iter()
                    .filter_map(|value| VncEncoding::from_wire(*value))
                    .collect();
                self.supports_desktop_size =
                    recognised.contains(&VncEncoding::DesktopSizePseudo);
                self.supports_desktop_name =
                    recognised.contains(&VncEncoding::DesktopNamePseudo);
                debug!(
                    "client {} advertised {} encodings ({} recognised)",
                    self.handle.id,
                    raw.len(),
                    recognised.len()
                );
            }
            ClientMsg::FramebufferUpdateRequest { incremental, rect } => {
                trace!(
                    "client {} requested update (incremental {incremental}, {rect:?})",
                    self.handle.id
                );
                if !incremental {
                    let (surface, _) = self.hub.snapshot_surface();
                    self.handle.damage.lock().mark_all(surface.bounds());
                }
                self.update_requested = true;
            }
            ClientMsg::KeyEvent { down, sym } => {
                if !self.read_only {
                    self.enqueue(VncEvent::Key { sym, down }).await?;
                }
            }
            ClientMsg::PointerEvent { buttons, x, y } => {
                if !self.read_only {
                    self.enqueue(VncEvent::PointerMove {
                        x: i32::from(x),
                        y: i32::from(y),
                        buttons,
                    })
                    .await?;
                    let changed = buttons ^ self.last_buttons;
                    for bit in 0..8 {
                        if changed & (1 << bit) != 0 {
                            self.enqueue(VncEvent::PointerClick {
                                x: i32::from(x),
                                y: i32::from(y),
                                button: bit,
                                down: buttons & (1 << bit) != 0,
                            })
                            .await?;
                        }
                    }
                }
                self.last_buttons = buttons;
            }
            ClientMsg::ClientCutText(text) => {
                trace!(
                    "client {} cut text of {} bytes discarded",
                    self.handle.id,
                    text.len()
                );
            }
        }
        Ok(())
    }

    /// Put an input event on the animator's queue. A full queue blocks
    /// here, which stalls this connection's reads until the animator
    /// drains; that backpressure is deliberate.
    async fn enqueue(&self, event: VncEvent) -> Result<(), VncError> {
        self.hub
            .event_tx
            .send(event)
            .await
            .map_err(|_| VncError::ConnectionClosed)
    }

    fn has_pending_output(&self) -> bool {
        self.handle.has_pending_resize()
            || self.handle.has_pending_name()
            || !self.handle.damage.lock().is_empty()
    }

    /// When there is latched work held back only by the frame period,
    /// the loop must wake again at this instant.
    fn throttle_deadline(&self) -> Option<Instant> {
        if self.update_requested && self.has_pending_output() {
            Some(self.last_update + self.frame_period)
        } else {
            None
        }
    }

    async fn maybe_send_update(&mut self) -> Result<(), VncError> {
        if !self.update_requested || !self.has_pending_output() {
            return Ok(());
        }
        if Instant::now() < self.last_update + self.frame_period {
            return Ok(());
        }
        if self.send_update().await? {
            self.update_requested = false;
            self.last_update = Instant::now();
        }
        Ok(())
    }

    /// Assemble and write one FramebufferUpdate: pseudo-rectangles for a
    /// pending resize or rename first, then the damage as Raw rectangles.
    /// Returns whether anything was sent.
    async fn send_update(&mut self) -> Result<bool, VncError> {
        let (surface, lock) = self.hub.snapshot_surface();
        let bounds = surface.bounds();

        let resize = self.handle.take_pending_resize();
        let send_resize = resize && self.supports_desktop_size;
        if resize && !self.supports_desktop_size {
            debug!(
                "client {} cannot receive DesktopSize {}x{}",
                self.handle.id,
                bounds.width,
                bounds.height
            );
        }

        let rename = self.handle.take_pending_name();
        let current_name = self.hub.desktop_name();
        let send_name =
            rename && self.supports_desktop_name && current_name != self.sent_name;
        if rename && !self.supports_desktop_name {
            debug!("client {} cannot receive DesktopName", self.handle.id);
        }

        // Copy the dirty pixels under the surface lock; conversion and the
        // socket write happen after it is released.
        let drained = self.handle.damage.lock().drain_clipped(bounds);
        let damage: Vec<(Rect, Vec<u8>)> = {
            let _guard = lock.lock();
            drained
                .into_iter()
                .map(|rect| {
                    let pixels = surface.copy_rect(&rect);
                    (rect, pixels)
                })
                .collect()
        };

        let nrects = damage.len() + usize::from(send_resize) + usize::from(send_name);
        if nrects == 0 {
            return Ok(false);
        }

        let payload_estimate: usize = damage
            .iter()
            .map(|(rect, _)| {
                12 + usize::from(rect.width) * usize::from(rect.height)
                    * self.converter.bytes_per_pixel()
            })
            .sum();
        let mut buf = BytesMut::with_capacity(4 + payload_estimate + 64);
        buf.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        buf.put_u8(0); // padding
        buf.put_u16(nrects as u16);

        if send_resize {
            bounds.write_header(VncEncoding::DesktopSizePseudo.into(), &mut buf);
            trace!(
                "client {} notified of DesktopSize {}x{}",
                self.handle.id,
                bounds.width,
                bounds.height
            );
        }
        if send_name {
            // Position and size must be zero for DesktopName.
            Rect::new(0, 0, 0, 0).write_header(VncEncoding::DesktopNamePseudo.into(), &mut buf);
            put_string(&mut buf, &current_name);
            self.sent_name = current_name.clone();
            trace!(
                "client {} notified of DesktopName {current_name:?}",
                self.handle.id
            );
        }
        for (rect, pixels) in &damage {
            rect.write_header(VncEncoding::Raw.into(), &mut buf);
            for row in pixels.chunks_exact(usize::from(rect.width) * 4) {
                self.converter.convert_row(row, &mut buf);
            }
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        trace!(
            "client {} sent update of {nrects} rectangles, {} bytes",
            self.handle.id,
            buf.len()
        );
        Ok(true)
    }
}
