//! The collaborators the transport drives but does not own.

use crate::{transport::SetupError, Events};
use async_trait::async_trait;
use thiserror::Error as ThisError;
use tokio::time::Instant;

/// Everything a connection talks to: the raw segment substrate, the blocking
/// event wait, and the application-side byte stream.
///
/// The connection is the only caller and calls from a single task, so
/// implementations can keep plain mutable state.
#[async_trait]
pub trait Host: Send {
    /// Suspends until at least one of the classes in `interest` is ready or
    /// `deadline` passes. Returns the ready classes, which are always a
    /// subset of `interest`, or an empty set on timeout. An empty set may
    /// also come back early when the application frees receive buffer
    /// space, so the advertised window can be refreshed.
    async fn wait_for_event(&mut self, interest: Events, deadline: Instant) -> Events;

    /// Transmits one serialized segment, returning the number of bytes the
    /// substrate accepted.
    async fn send_segment(&mut self, segment: &[u8]) -> Result<usize, TransportError>;

    /// Copies the next inbound segment into `buf`, returning its length.
    /// Only called after `wait_for_event` reported
    /// [`Events::NETWORK_DATA`].
    async fn receive_segment(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Takes up to `max` bytes the application has written.
    fn app_read(&mut self, max: usize) -> Vec<u8>;

    /// Hands bytes received from the peer to the application.
    fn app_write(&mut self, data: &[u8]);

    /// Bytes handed to the application with `app_write` that it has not
    /// consumed yet. Shrinks the window this side advertises.
    fn app_buffered(&self) -> usize {
        0
    }

    /// Tells the application the peer will send no more data.
    fn notify_peer_finished(&mut self);

    /// Releases the application blocked in connect or accept, with the
    /// outcome of the handshake.
    fn unblock_application(&mut self, outcome: Result<(), SetupError>);
}

/// A failure of the send or receive primitive. Never carries data.
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum TransportError {
    #[error("I/O error on the substrate: {0}")]
    Io(std::io::ErrorKind),
    #[error("The substrate is disconnected")]
    Disconnected,
    #[error("Only {sent} of {expected} bytes were transmitted")]
    Truncated { expected: usize, sent: usize },
    #[error("No peer is known yet")]
    NotConnected,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.kind())
    }
}
