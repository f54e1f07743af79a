use super::{transmit, Context, ProtocolViolation, State};
use crate::{
    host::TransportError,
    segment::{Segment, SegmentBuilder},
    Config, Events, Host,
};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Drives an established connection until it is done: both FINs exchanged
/// and the local FIN acknowledged.
pub async fn control_loop<H: Host>(host: &mut H, ctx: &mut Context, config: &Config) {
    let mut fin_retry = FinRetry::default();
    while !ctx.is_done() {
        iterate(host, ctx, &mut fin_retry, config).await;
    }
}

/// When a FIN that could not be sent may be tried again. Kept out of the
/// context, which a transport failure leaves untouched.
#[derive(Debug, Default)]
pub(super) struct FinRetry {
    not_before: Option<Instant>,
    abandoned: bool,
}

impl FinRetry {
    fn allows(&self, now: Instant) -> bool {
        !self.abandoned && self.not_before.map_or(true, |at| now >= at)
    }

    fn failed(&mut self, error: TransportError, retry_at: Instant) {
        if error == TransportError::Disconnected {
            warn!("Substrate is gone, the FIN will not be retried");
            self.abandoned = true;
        } else {
            self.not_before = Some(retry_at);
        }
    }
}

/// One wait and everything that became ready during it. Application data is
/// handled first, then a close request, then an inbound segment.
pub(super) async fn iterate<H: Host>(
    host: &mut H,
    ctx: &mut Context,
    fin_retry: &mut FinRetry,
    config: &Config,
) -> Events {
    ctx.refresh_advertised_window(host.app_buffered());
    if ctx.state().can_receive() && ctx.needs_window_update(config.max_payload_len) {
        let ack = ctx.receive_next();
        send_ack(host, ctx, ack).await;
    }

    let now = Instant::now();
    let interest = interest(ctx, fin_retry, now, config);
    let deadline = now + config.event_timeout;
    let ready = host.wait_for_event(interest, deadline).await;
    trace!(?ready, state = ?ctx.state(), "Woke up");

    if ready.is_empty() {
        // TODO: retransmit unacknowledged segments here once a retry policy
        // (backoff and retry limit) is settled
        trace!("Nothing ready");
        return ready;
    }

    if ready.app_data() && ctx.state() != State::FinSent {
        send_app_data(host, ctx, config).await;
    }

    if ready.close_requested() && ctx.state() != State::FinSent {
        send_fin(host, ctx, fin_retry, config).await;
    }

    if ready.network_data() {
        receive(host, ctx, config).await;
    }

    ready
}

/// The event classes worth waking up for. Data is only interesting while it
/// could actually be sent, and a close only while a FIN may go out, so
/// neither a closed window nor a failing substrate spins the loop.
fn interest(ctx: &Context, fin_retry: &FinRetry, now: Instant, config: &Config) -> Events {
    let mut interest = Events::NETWORK_DATA;
    if ctx.send_quota(config.max_payload_len) > 0 {
        interest.insert(Events::APP_DATA);
    }
    if ctx.state().after_local_close().is_some() && fin_retry.allows(now) {
        interest.insert(Events::APP_CLOSE_REQUESTED);
    }
    interest
}

async fn send_app_data<H: Host>(host: &mut H, ctx: &mut Context, config: &Config) {
    let quota = ctx.send_quota(config.max_payload_len);
    if quota == 0 {
        trace!("Window closed, holding application data");
        return;
    }

    let data = host.app_read(quota);
    if data.is_empty() {
        return;
    }
    let len = data.len();

    let window = ctx.advertised_window_size();
    let segment = match SegmentBuilder::new(ctx.sequence_num())
        .ack_number(ctx.last_ack_byte())
        .window(window)
        .build(data)
    {
        Ok(segment) => segment,
        Err(e) => {
            warn!(error = %e, "Application handed over more than a segment holds");
            return;
        }
    };

    match transmit(host, &segment).await {
        Ok(()) => {
            ctx.record_sent(len);
            ctx.note_advertised(window);
        }
        Err(e) => warn!(error = %e, len, "Dropped application data"),
    }
}

async fn send_fin<H: Host>(
    host: &mut H,
    ctx: &mut Context,
    fin_retry: &mut FinRetry,
    config: &Config,
) {
    if ctx.state().after_local_close().is_none() {
        return;
    }

    let window = ctx.advertised_window_size();
    let fin = SegmentBuilder::new(ctx.sequence_num())
        .fin()
        .ack_number(ctx.last_ack_byte())
        .window(window)
        .control();

    match transmit(host, &fin).await {
        Ok(()) => {
            ctx.record_local_close();
            ctx.note_advertised(window);
            debug!(state = ?ctx.state(), "Local side closed");
        }
        // Retried after the next deadline, never on a disconnected substrate
        Err(e) => {
            warn!(error = %e, "Could not send FIN");
            fin_retry.failed(e, Instant::now() + config.event_timeout);
        }
    }
}

async fn receive<H: Host>(host: &mut H, ctx: &mut Context, config: &Config) {
    let mut buf = vec![0; config.max_segment_len];
    let len = match host.receive_segment(&mut buf).await {
        Ok(len) => len,
        Err(e) => {
            warn!(error = %e, "Receive failed");
            return;
        }
    };

    if let Err(violation) = segment_arrives(host, ctx, &buf[..len]).await {
        warn!(%violation, "Discarding segment");
    }
}

/// Applies one inbound segment. A violation leaves the context and the
/// application untouched.
async fn segment_arrives<H: Host>(
    host: &mut H,
    ctx: &mut Context,
    raw: &[u8],
) -> Result<(), ProtocolViolation> {
    let segment = Segment::from_bytes(raw)?;
    let Segment { header, payload } = segment;
    let flags = header.flags;
    debug!(
        seq = header.seq,
        ack = header.ack,
        ?flags,
        window = header.window,
        len = payload.len(),
        "Segment arrived"
    );

    // ACK and FIN never ride together, and SYNs belong to the handshake
    if flags.syn() || (flags.ack() && flags.fin()) {
        Err(ProtocolViolation::InconsistentFlags(flags))?
    }
    if !flags.ack() && !flags.fin() && ctx.peer_fin_received() {
        Err(ProtocolViolation::DataAfterFin)?
    }

    if flags.ack() {
        let newly_acked = ctx.on_ack(header.ack, header.window)?;
        trace!(newly_acked, last_ack_byte = ctx.last_ack_byte(), "Acknowledged");
        deliver(host, &payload);
    } else if flags.fin() {
        let repeated = ctx.peer_fin_received();
        let ack = ctx.on_peer_fin(header.seq, payload.len());
        ctx.refresh_advertised_window(host.app_buffered() + payload.len());
        send_ack(host, ctx, ack).await;
        if !repeated {
            deliver(host, &payload);
            host.notify_peer_finished();
            debug!(state = ?ctx.state(), "Peer finished sending");
        }
    } else {
        let ack = ctx.on_peer_data(header.seq, payload.len());
        ctx.refresh_advertised_window(host.app_buffered() + payload.len());
        send_ack(host, ctx, ack).await;
        deliver(host, &payload);
    }

    Ok(())
}

fn deliver<H: Host>(host: &mut H, payload: &[u8]) {
    if !payload.is_empty() {
        host.app_write(payload);
    }
}

/// Sends a pure acknowledgment carrying the current advertised window.
async fn send_ack<H: Host>(host: &mut H, ctx: &mut Context, ack: u32) {
    let window = ctx.advertised_window_size();
    let segment = SegmentBuilder::new(ctx.sequence_num())
        .ack(ack)
        .window(window)
        .control();
    match transmit(host, &segment).await {
        Ok(()) => ctx.note_advertised(window),
        Err(e) => warn!(error = %e, ack, "Could not send ACK"),
    }
}
