pub mod channel;
pub mod message;

pub use channel::ChannelState;
pub use channel::MqttChannel;
pub use message::InboundMessage;
pub use message::OutboundMessage;
