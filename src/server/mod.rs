pub mod builder;
mod connection;
mod damage;
mod hub;
mod listener;
pub mod surface;

pub use builder::{ChallengeSource, VncServerBuilder};
pub use listener::VncServer;
pub use surface::{Surface, SurfaceLock};
