//! The STCP connection state machine.
//!
//! A connection is driven by a single task: [`run`] performs the handshake in
//! the given [`Role`], releases the application, and then runs the control
//! loop until both sides have closed. Between wake-ups the connection is
//! suspended in [`Host::wait_for_event`]; everything that happens on one
//! wake-up runs to completion before the next wait.

use crate::{
    config::ConfigError,
    host::TransportError,
    segment::{Flags, ParseError, Segment},
    Config, Host,
};
use thiserror::Error as ThisError;
use tracing::{debug, info, info_span, warn, Instrument};

mod context;
pub use context::Context;

mod control_loop;
pub use control_loop::control_loop;

mod handshake;
pub use handshake::{active_open, passive_open};

mod state;
pub use state::State;

#[cfg(test)]
mod tests;

/// Which side of the handshake this end plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends the SYN
    Active,
    /// Waits for the SYN
    Passive,
}

/// Opens a connection and drives it until it is fully closed.
///
/// The application is unblocked with the handshake outcome before the
/// control loop starts. A handshake failure is returned without running the
/// loop; nothing after establishment is fatal.
pub async fn run<H: Host>(host: &mut H, role: Role, config: &Config) -> Result<(), SetupError> {
    async move {
        match open(host, role, config).await {
            Ok(mut ctx) => {
                info!(iss = ctx.initial_sequence_num(), "Connection established");
                host.unblock_application(Ok(()));
                control_loop(host, &mut ctx, config).await;
                info!(
                    last_sent_byte = ctx.last_sent_byte(),
                    last_ack_byte = ctx.last_ack_byte(),
                    "Connection closed"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Handshake failed");
                host.unblock_application(Err(e));
                Err(e)
            }
        }
    }
    .instrument(info_span!("stcp", ?role))
    .await
}

/// Creates a context and runs the handshake for `role` on it.
pub async fn open<H: Host>(host: &mut H, role: Role, config: &Config) -> Result<Context, SetupError> {
    config.validate()?;
    let mut ctx = Context::new(config.choose_iss(), config);
    match role {
        Role::Active => active_open(host, &mut ctx, config).await?,
        Role::Passive => passive_open(host, &mut ctx, config).await?,
    }
    Ok(ctx)
}

/// Serializes and sends one segment. Anything short of the whole segment is
/// an error.
async fn transmit<H: Host>(host: &mut H, segment: &Segment) -> Result<(), TransportError> {
    let bytes = segment.serialize();
    let sent = host.send_segment(&bytes).await?;
    if sent < bytes.len() {
        Err(TransportError::Truncated {
            expected: bytes.len(),
            sent,
        })?
    }
    debug!(
        seq = segment.header.seq,
        ack = segment.header.ack,
        flags = ?segment.header.flags,
        window = segment.header.window,
        len = segment.payload.len(),
        "Sent segment"
    );
    Ok(())
}

/// A failure to establish a connection. Fatal: the connection never becomes
/// usable and the application sees the connection as refused.
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum SetupError {
    #[error("The peer did not answer before the deadline")]
    Timeout,
    #[error("Expected {expected} from the peer but got {actual}")]
    FlagMismatch { expected: Flags, actual: Flags },
    #[error("Expected acknowledgment {expected} but got {actual}")]
    AckMismatch { expected: u32, actual: u32 },
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Malformed(#[from] ParseError),
    #[error("{0}")]
    Config(#[from] ConfigError),
}

/// A steady-state segment that breaks the protocol. The segment is dropped
/// without touching the connection or the application.
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum ProtocolViolation {
    #[error("{0}")]
    Malformed(#[from] ParseError),
    #[error("The flag combination {0} is not valid on an established connection")]
    InconsistentFlags(Flags),
    #[error("Acknowledgment {ack} is beyond the next sequence number {next}")]
    AckOfUnsentData { ack: u32, next: u32 },
    #[error("Data arrived after the peer's FIN")]
    DataAfterFin,
}
