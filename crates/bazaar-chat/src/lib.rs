pub mod error;
pub mod publish;
pub mod service;
pub mod token;

pub use error::ChatError;
pub use publish::EventSink;
pub use service::{ChatService, MessageBody};
pub use token::TokenBroker;
