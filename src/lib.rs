//! # VNC-SERVER
//!
//! ## Description
//! + An async implementation of the VNC (RFB) server side protocol for
//!   pixel surfaces owned and drawn by a host application (the animator)
//!
//! The animator renders into a 32-bit ARGB buffer it owns; the server
//! accepts clients, runs the RFB handshake and authentication, tracks the
//! dirty region per client and encodes framebuffer updates on request, and
//! hands key and pointer input back as discrete events.
//!
//! ## Simple example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use parking_lot::Mutex;
//! use vnc_server::{Rect, Surface, VncEvent, VncServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), vnc_server::VncError> {
//!     // The animator owns the pixel memory and the lock guarding it.
//!     let mut pixels = vec![0xff00_0000u32; 640 * 480];
//!     let lock = Arc::new(Mutex::new(()));
//!     let surface = unsafe { Surface::from_raw(pixels.as_ptr().cast(), 640, 480, 640 * 4) };
//!
//!     let server = VncServer::builder(surface, lock.clone())
//!         .port(5900)
//!         .desktop_name("demo")
//!         .build()?;
//!     server.daemonise().await?;
//!
//!     loop {
//!         // Draw under the lock, then tell the server what changed.
//!         {
//!             let _guard = lock.lock();
//!             pixels[0] = 0xffff_ffff;
//!         }
//!         server.mark_damage(Rect::new(0, 0, 1, 1));
//!
//!         // Drain client input.
//!         if let Some(event) = server.get_event(Some(Duration::from_millis(250))).await {
//!             match event {
//!                 VncEvent::Key { sym, down } => println!("key {sym:#x} down={down}"),
//!                 VncEvent::PointerMove { x, y, .. } => println!("pointer at {x},{y}"),
//!                 VncEvent::PointerClick { button, down, .. } => {
//!                     println!("button {button} down={down}")
//!                 }
//!             }
//!         }
//!     }
//! }
//! ```
//!
//! ## License
//!
//! Licensed under either of
//!
//!  * Apache License, Version 2.0
//!    ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//!  * MIT license
//!    ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.

pub mod error;
pub mod events;
pub mod protocol;
pub mod server;

pub use error::*;
pub use events::*;
pub use protocol::{PixelFormat, Rect, ServerInit, VncEncoding, VncVersion};
pub use server::{ChallengeSource, Surface, SurfaceLock, VncServer, VncServerBuilder};
