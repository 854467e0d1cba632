//! STOMP 1.2 support: the frame codec and the messaging client.

pub mod client;
pub mod frame;

pub use client::{StompClient, StompClientError};
pub use frame::{StompCommand, StompError, StompFrame, StompHeader};
