// Network layer
// Realtime presence channel over TCP plus the HTTP endpoints

pub mod channel;
pub mod connection;
pub mod http;

pub use channel::{ChannelEvent, ChannelHandle, ChannelSettings};
pub use connection::Connection;
pub use http::{FrameClient, PollClient};
