//! Live transport network monitor library.
//!
//! The crate is organized around three subsystems and an orchestrator:
//! - [`stomp`]: the STOMP 1.2 frame codec and the messaging client.
//! - [`websockets`]: the secure WebSockets transport the client runs over,
//!   behind a narrow capability trait so tests can inject an in-memory fake.
//! - [`network`]: the transport network model (stations, lines, routes,
//!   travel segments) with live passenger counters.
//! - [`monitor`]: wires the STOMP client to the network model and drives the
//!   whole thing.

pub mod monitor;
pub mod network;
pub mod retrieve;
pub mod stomp;
pub mod websockets;
