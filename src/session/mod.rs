//! Session lifecycle: connect, converse, tear down.

mod controller;
mod events;

pub use controller::{Session, SessionFactory};
pub use events::{SessionEvent, SessionState, EVENT_BUFFER};
