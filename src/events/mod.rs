mod hub;
mod types;

pub use hub::{EventHub, EventHubConfig};
pub use types::{ClientReply, ControlMessage, TaskEvent};
