//! Request handlers for change notifications, resyncs and the sandbox.

mod events;
mod sandbox;

pub use events::*;
pub use sandbox::*;
