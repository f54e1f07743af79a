//! A simplified reliable transport protocol (STCP) that turns an unreliable,
//! ordered segment exchange into a flow-controlled byte stream.
//!
//! # Organization
//! - [`segment`] encodes and decodes the wire format
//! - [`transport`] holds the connection state machine: the three-way
//!   handshake, the event-dispatch loop and the teardown lattice
//! - [`Host`] is the seam between the state machine and everything it talks
//!   to: the raw segment substrate, the event wait, and the application buffer
//! - [`socket`] is an application-facing stream built on top of the transport,
//!   with in-memory and UDP substrates
//!
//! # Connection lifecycle
//!
//! [`transport::run`] creates a [`Context`](transport::Context), performs the
//! active or passive handshake, unblocks the application, and then drives the
//! control loop until both directions have exchanged FINs and the local FIN
//! has been acknowledged. Each connection owns its context exclusively and all
//! tuning lives in a [`Config`] passed in at open time, so any number of
//! connections can share a process.

pub mod cli;
pub mod config;
pub use config::Config;

pub mod events;
pub use events::Events;

pub mod host;
pub use host::Host;

pub mod logging;
pub mod segment;
pub use segment::Segment;

mod seq;

pub mod socket;
pub use socket::StcpStream;

pub mod transport;
