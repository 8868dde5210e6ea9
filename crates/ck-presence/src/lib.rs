//! Process-local state: who is online and which browser sessions are signed in.
//!
//! Nothing here is persisted or shared across processes; both registries are
//! created once at startup and handed to the HTTP layer.

pub mod clock;
pub mod sessions;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use sessions::{Session, SessionStore};
pub use tracker::PresenceTracker;
