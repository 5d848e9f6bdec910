//! Incremental mailbox synchronization
//!
//! [`intake`] decodes push notifications at the edge; [`SyncEngine`]
//! owns the per-account cursor state machine and the fetch/store burst
//! behind each notification.

mod engine;
pub mod intake;

pub use engine::{SyncEngine, SyncStats};
pub use intake::{decode_envelope, IntakeStatus, NotificationIntake, PushNotification};
