// broker/mod.rs
pub mod channel;
pub mod errors;
pub mod tcp;
pub mod traits;

// Re-export main interfaces for easy access
pub use channel::{ChannelBroker, ChannelPublisher};
pub use errors::BrokerError;
pub use tcp::TcpLineBroker;
pub use traits::{Broker, InboundMessage, MessageCallback};
