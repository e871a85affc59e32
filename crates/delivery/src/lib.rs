//! Delivery and state-synchronization engine.
//!
//! Inbound client events enter through [`EventRouter`], sends are timed by
//! [`DeliveryScheduler`], stored through `storage::Storage` and fanned out
//! through a [`Broadcaster`] using the [`PresenceRegistry`] to find direct
//! recipients. [`Hub`] is the in-process broadcaster used by the server.

mod hub;
mod presence;
mod router;
mod scheduler;

pub use hub::{Broadcaster, Hub, Target};
pub use presence::PresenceRegistry;
pub use router::{ConnectionSession, ConnectionState, EventRouter, RouteError};
pub use scheduler::{DeliveryScheduler, ScheduledTask};
