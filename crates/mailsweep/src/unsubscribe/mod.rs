//! Unsubscribe automation
//!
//! [`finder`] locates the unsubscribe mechanism in a stored message,
//! [`plan`] decodes the model's structured action plan, and
//! [`UnsubscribeExecutor`] drives the whole attempt state machine.

pub mod finder;
pub mod plan;

mod executor;

pub use executor::{UnsubscribeExecutor, UreqWebClient, WebClient, WebError};
pub use finder::{find_unsubscribe_link, Confidence, FoundLink};
pub use plan::{ActionPlan, FormData};
