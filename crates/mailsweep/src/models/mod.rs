//! Domain models for mail entities

mod account;
mod category;
mod message;
mod unsubscribe;

pub use account::MailAccount;
pub use category::Category;
pub use message::{EmailAddress, Message, MessageBuilder};
pub use unsubscribe::{UnsubscribeAttempt, UnsubscribeMethod, UnsubscribeStatus};
