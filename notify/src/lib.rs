//! Notification fan-out: resolves subscribers of a flow transition, renders
//! one message, and delivers it across the configured channels with
//! exactly-once-per-(user, config, flow, target-state) semantics.

pub mod channels;
pub mod dispatcher;
pub mod render;

pub use channels::{ChannelSender, WebhookSender};
pub use dispatcher::Dispatcher;
