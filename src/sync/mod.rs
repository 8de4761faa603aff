pub mod websocket;

pub use websocket::{handle_control_message, handle_websocket, SyncState};
