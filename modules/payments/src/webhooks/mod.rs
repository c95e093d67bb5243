//! Outbound webhook delivery

pub mod dispatcher;
pub mod sender;
pub mod signature;

pub use dispatcher::WebhookDispatcher;
pub use sender::{HttpWebhookSender, SendOutcome, WebhookSender};
