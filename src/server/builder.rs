use std::sync::Arc;

use crate::error::VncError;
use crate::protocol::security::vncauth;
use crate::protocol::VncVersion;
use crate::server::listener::VncServer;
use crate::server::surface::{Surface, SurfaceLock};

/// Source of VNC authentication challenges. The default draws from the
/// process RNG; tests inject a fixed source to get reproducible handshakes.
pub type ChallengeSource = Arc<dyn Fn() -> [u8; 16] + Send + Sync>;

/// Everything configurable about a server. Immutable once built, except
/// for the desktop name which `change_name` replaces at run time.
#[derive(Clone)]
pub(crate) struct ServerOptions {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) password: Option<String>,
    pub(crate) read_only_password: Option<String>,
    pub(crate) read_only: bool,
    pub(crate) max_clients: usize,
    pub(crate) desktop_name: String,
    pub(crate) protocol_version_max: VncVersion,
    pub(crate) max_framerate: u32,
    pub(crate) event_queue_capacity: usize,
    pub(crate) challenge_source: Option<ChallengeSource>,
}

/// Builder to configure a [`VncServer`] for a surface.
///
/// ```no_run
/// use std::sync::Arc;
/// use parking_lot::Mutex;
/// use vnc_server::{Surface, VncServer, VncError};
///
/// #[tokio::main]
/// async fn main() -> Result<(), VncError> {
///     let pixels = vec![0u32; 640 * 480];
///     let lock = Arc::new(Mutex::new(()));
///     let surface = unsafe { Surface::from_raw(pixels.as_ptr().cast(), 640, 480, 640 * 4) };
///
///     let server = VncServer::builder(surface, lock)
///         .host("0.0.0.0")
///         .port(5900)
///         .desktop_name("my display")
///         .password("secret")
///         .max_clients(4)
///         .build()?;
///     server.serve_forever().await
/// }
/// ```
pub struct VncServerBuilder {
    surface: Surface,
    surface_lock: SurfaceLock,
    options: ServerOptions,
}

impl VncServerBuilder {
    /// Start configuring a server that serves `surface`, reading its pixel
    /// bytes only while `surface_lock` is held.
    pub fn new(surface: Surface, surface_lock: SurfaceLock) -> Self {
        Self {
            surface,
            surface_lock,
            options: ServerOptions {
                host: "0.0.0.0".to_string(),
                port: 5900,
                password: None,
                read_only_password: None,
                read_only: false,
                max_clients: 2,
                desktop_name: "VNC".to_string(),
                protocol_version_max: VncVersion::RFB38,
                max_framerate: 20,
                event_queue_capacity: 256,
                challenge_source: None,
            },
        }
    }

    /// Address to listen on. Defaults to `0.0.0.0`.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options.host = host.into();
        self
    }

    /// Port to listen on. Defaults to 5900; 0 picks an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Require VNC authentication with this password. Without any password
    /// the server offers the `None` security type.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.options.password = Some(password.into());
        self
    }

    /// A second password granting view-only access: clients authenticating
    /// with it have their input events discarded.
    pub fn read_only_password(mut self, password: impl Into<String>) -> Self {
        self.options.read_only_password = Some(password.into());
        self
    }

    /// Discard input events from every client, regardless of how it
    /// authenticated.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.options.read_only = read_only;
        self
    }

    /// Connections accepted beyond this count are refused during the
    /// handshake. Defaults to 2.
    pub fn max_clients(mut self, max_clients: usize) -> Self {
        self.options.max_clients = max_clients;
        self
    }

    /// The desktop name reported in ServerInit. Defaults to `VNC`.
    pub fn desktop_name(mut self, name: impl Into<String>) -> Self {
        self.options.desktop_name = name.into();
        self
    }

    /// The highest protocol version to advertise.
    ///
    /// Version should be one of the [VncVersion]
    ///
    pub fn protocol_version_max(mut self, version: VncVersion) -> Self {
        self.options.protocol_version_max = version;
        self
    }

    /// Ceiling on framebuffer updates per second and per client,
    /// regardless of how often clients ask. Defaults to 20.
    pub fn max_framerate(mut self, frames_per_second: u32) -> Self {
        self.options.max_framerate = frames_per_second;
        self
    }

    /// How many input events may queue before producing connections block.
    /// Blocking is deliberate backpressure on clients whose animator is
    /// not draining. Defaults to 256.
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.options.event_queue_capacity = capacity;
        self
    }

    /// Replace the VNC authentication challenge source.
    pub fn challenge_source(mut self, source: ChallengeSource) -> Self {
        self.options.challenge_source = Some(source);
        self
    }

    /// Validate the configuration and create the server.
    pub fn build(self) -> Result<VncServer, VncError> {
        let options = &self.options;
        if options.max_clients == 0 {
            return Err(VncError::Configuration(
                "max_clients must be at least 1".to_string(),
            ));
        }
        if options.event_queue_capacity == 0 {
            return Err(VncError::Configuration(
                "event_queue_capacity must be at least 1".to_string(),
            ));
        }
        if options.max_framerate == 0 {
            return Err(VncError::Configuration(
                "max_framerate must be at least 1".to_string(),
            ));
        }
        if let (Some(main), Some(read_only)) = (&options.password, &options.read_only_password) {
            // VNC authentication only sees the first eight bytes, so the
            // passwords must already differ there to be distinguishable.
            if vncauth::password_key(main) == vncauth::password_key(read_only) {
                return Err(VncError::Configuration(
                    "password and read_only_password are identical within the first 8 bytes"
                        .to_string(),
                ));
            }
        }
        Ok(VncServer::new(self.surface, self.surface_lock, self.options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn surface() -> (Vec<u32>, Surface) {
        let pixels = vec![0_u32; 4];
        let surface = unsafe { Surface::from_raw(pixels.as_ptr().cast(), 2, 2, 8) };
        (pixels, surface)
    }

    #[test]
    fn zero_limits_are_rejected() {
        let (_pixels, surface) = surface();
        let lock: SurfaceLock = Arc::new(Mutex::new(()));
        assert!(matches!(
            VncServerBuilder::new(surface, lock.clone())
                .max_clients(0)
                .build(),
            Err(VncError::Configuration(_))
        ));
        assert!(matches!(
            VncServerBuilder::new(surface, lock)
                .event_queue_capacity(0)
                .build(),
            Err(VncError::Configuration(_))
        ));
    }

    #[test]
    fn indistinguishable_passwords_are_rejected() {
        let (_pixels, surface) = surface();
        let lock: SurfaceLock = Arc::new(Mutex::new(()));
        assert!(matches!(
            VncServerBuilder::new(surface, lock)
                .password("longpassword-a")
                .read_only_password("longpassword-b")
                .build(),
            Err(VncError::Configuration(_))
        ));
    }
}
