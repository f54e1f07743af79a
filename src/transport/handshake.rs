use super::{transmit, Context, SetupError};
use crate::{
    segment::{Flags, Segment, SegmentBuilder},
    Config, Events, Host,
};
use tokio::time::Instant;
use tracing::debug;

/// Sends a SYN and completes the handshake as the initiator.
///
/// ```text
///     this side                                         peer
/// 1.  --> <SEQ=ISS><CTL=SYN>                        -->
/// 2.  <-- <SEQ=Y><ACK=ISS+1><CTL=SYN,ACK>           <--
/// 3.  --> <SEQ=ISS+1><ACK=Y+1><CTL=ACK>             -->
/// ```
pub async fn active_open<H: Host>(
    host: &mut H,
    ctx: &mut Context,
    config: &Config,
) -> Result<(), SetupError> {
    let iss = ctx.initial_sequence_num();
    let syn = SegmentBuilder::new(iss)
        .syn()
        .window(ctx.advertised_window_size())
        .control();
    transmit(host, &syn).await?;

    let reply = await_segment(host, config).await?;
    let flags = reply.header.flags;
    if !(flags.syn() && flags.ack()) {
        Err(SetupError::FlagMismatch {
            expected: Flags::new(true, true, false),
            actual: flags,
        })?
    }
    let expected = iss.wrapping_add(1);
    if reply.header.ack != expected {
        Err(SetupError::AckMismatch {
            expected,
            actual: reply.header.ack,
        })?
    }

    ctx.establish(reply.header.seq);
    // The SYN+ACK is the first word on the peer's window
    ctx.set_sender_window(reply.header.window);

    let ack = SegmentBuilder::new(ctx.sequence_num())
        .ack(ctx.receive_next())
        .window(ctx.advertised_window_size())
        .control();
    transmit(host, &ack).await?;
    debug!(peer_iss = reply.header.seq, "Active open complete");
    Ok(())
}

/// Waits for a SYN and completes the handshake as the responder.
///
/// ```text
///     peer                                              this side
/// 1.  --> <SEQ=X><CTL=SYN>                          -->
/// 2.  <-- <SEQ=ISS><ACK=X+1><CTL=SYN,ACK>           <--
/// 3.  --> <SEQ=X+1><ACK=ISS+1><CTL=ACK>             -->
/// ```
pub async fn passive_open<H: Host>(
    host: &mut H,
    ctx: &mut Context,
    config: &Config,
) -> Result<(), SetupError> {
    let syn = await_segment(host, config).await?;
    let flags = syn.header.flags;
    if !flags.syn() || flags.ack() || flags.fin() {
        Err(SetupError::FlagMismatch {
            expected: Flags::new(false, true, false),
            actual: flags,
        })?
    }
    let peer_iss = syn.header.seq;

    let iss = ctx.initial_sequence_num();
    let syn_ack = SegmentBuilder::new(iss)
        .syn()
        .ack(peer_iss.wrapping_add(1))
        .window(ctx.advertised_window_size())
        .control();
    transmit(host, &syn_ack).await?;

    let ack = await_segment(host, config).await?;
    let flags = ack.header.flags;
    if !flags.ack() || flags.syn() || flags.fin() {
        Err(SetupError::FlagMismatch {
            expected: Flags::new(true, false, false),
            actual: flags,
        })?
    }
    let expected = iss.wrapping_add(1);
    if ack.header.ack != expected {
        Err(SetupError::AckMismatch {
            expected,
            actual: ack.header.ack,
        })?
    }

    ctx.establish(peer_iss);
    ctx.set_sender_window(ack.header.window);
    debug!(peer_iss, "Passive open complete");
    Ok(())
}

/// Blocks for the next segment from the peer, failing at the handshake
/// deadline.
async fn await_segment<H: Host>(host: &mut H, config: &Config) -> Result<Segment, SetupError> {
    let deadline = Instant::now() + config.handshake_timeout;
    let ready = host.wait_for_event(Events::NETWORK_DATA, deadline).await;
    if !ready.network_data() {
        Err(SetupError::Timeout)?
    }
    let mut buf = vec![0; config.max_segment_len];
    let len = host.receive_segment(&mut buf).await?;
    let segment = Segment::from_bytes(&buf[..len])?;
    debug!(
        seq = segment.header.seq,
        ack = segment.header.ack,
        flags = ?segment.header.flags,
        "Handshake segment arrived"
    );
    Ok(segment)
}
