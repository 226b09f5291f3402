//! # Domain Events
//!
//! Facts produced by business logic while a request runs. Events are buffered in a
//! request-scoped [`EventQueue`] and only leave the process after the owning transaction
//! has committed.

pub mod event;
pub mod queue;

pub use event::{AssetKind, Event, EventKind};
pub use queue::EventQueue;
