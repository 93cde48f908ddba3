// WebSocket subscription management

pub mod manager;
pub mod protocol;

pub use manager::{ConnectionManager, FrameAction};
pub use protocol::{ClientMessage, ErrorMessage};
