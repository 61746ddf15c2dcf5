//! Worker lifecycle: states, events and the host-side registration.
//!
//! A worker moves `registered -> installing -> installed -> activating ->
//! active`, or ends in `install-failed`. Events are a closed enum; a worker
//! maps each one to a `WaitUntil` token that the host settles.

pub mod event;
pub mod registration;
pub mod state;

pub use event::{ClientControl, Event, EventKind, Outcome, WaitUntil};
pub use registration::{Registration, Worker};
pub use state::WorkerState;
