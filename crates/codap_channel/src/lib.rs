pub mod channel;
pub mod jsonrpc;
pub mod message;
pub mod stdio;
pub mod transport;

#[cfg(feature = "test-utils")]
pub mod mock_host;

pub use channel::HostChannel;
pub use message::{
    Action, CodapRequest, CodapResponse, ConnectionState, Dimensions, InteractiveFrame,
    ResourcePath,
};
pub use stdio::StdioTransport;
pub use transport::{ChannelError, HostTransport, NotificationHandler};
