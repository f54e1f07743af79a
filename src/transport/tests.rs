use super::{
    control_loop::{iterate, FinRetry},
    *,
};
use crate::{host::TransportError, segment::SegmentBuilder, Events};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::time::Instant;

/// A host whose peer is a script: inbound segments are queued up front and
/// every segment the connection sends is recorded. Waits never block; a wait
/// with nothing ready behaves like an expired deadline.
#[derive(Default)]
struct ScriptedHost {
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<Segment>,
    app_out: VecDeque<u8>,
    close_requested: bool,
    delivered: Vec<u8>,
    buffered: usize,
    peer_finished: bool,
    unblocked: Option<Result<(), SetupError>>,
    send_error: Option<TransportError>,
    interests: Vec<Events>,
}

impl ScriptedHost {
    fn push(&mut self, segment: Segment) {
        self.inbound.push_back(segment.serialize());
    }

    fn write(&mut self, data: &[u8]) {
        self.app_out.extend(data);
    }

    fn take_sent(&mut self) -> Vec<Segment> {
        std::mem::take(&mut self.sent)
    }
}

#[async_trait]
impl Host for ScriptedHost {
    async fn wait_for_event(&mut self, interest: Events, _deadline: Instant) -> Events {
        self.interests.push(interest);
        let mut ready = Events::empty();
        if !self.app_out.is_empty() {
            ready.insert(Events::APP_DATA);
        }
        if self.close_requested && self.app_out.is_empty() {
            ready.insert(Events::APP_CLOSE_REQUESTED);
        }
        if !self.inbound.is_empty() {
            ready.insert(Events::NETWORK_DATA);
        }
        ready & interest
    }

    async fn send_segment(&mut self, segment: &[u8]) -> Result<usize, TransportError> {
        if let Some(e) = self.send_error {
            return Err(e);
        }
        self.sent.push(Segment::from_bytes(segment).unwrap());
        Ok(segment.len())
    }

    async fn receive_segment(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let segment = self.inbound.pop_front().ok_or(TransportError::Disconnected)?;
        buf[..segment.len()].copy_from_slice(&segment);
        Ok(segment.len())
    }

    fn app_read(&mut self, max: usize) -> Vec<u8> {
        let len = max.min(self.app_out.len());
        self.app_out.drain(..len).collect()
    }

    fn app_write(&mut self, data: &[u8]) {
        self.delivered.extend_from_slice(data);
    }

    fn app_buffered(&self) -> usize {
        self.buffered
    }

    fn notify_peer_finished(&mut self) {
        self.peer_finished = true;
    }

    fn unblock_application(&mut self, outcome: Result<(), SetupError>) {
        self.unblocked = Some(outcome);
    }
}

const ISS: u32 = 15;
const PEER_ISS: u32 = 300;

fn config() -> Config {
    Config::default().fixed_iss(ISS)
}

fn established() -> Context {
    let mut ctx = Context::new(ISS, &config());
    ctx.establish(PEER_ISS);
    ctx
}

fn ack(ack: u32, window: u16) -> Segment {
    SegmentBuilder::new(PEER_ISS + 1)
        .ack(ack)
        .window(window)
        .control()
}

fn data(seq: u32, payload: &[u8]) -> Segment {
    SegmentBuilder::new(seq)
        .window(3072)
        .build(payload.to_vec())
        .unwrap()
}

fn fin(seq: u32, payload: &[u8]) -> Segment {
    SegmentBuilder::new(seq)
        .fin()
        .window(3072)
        .build(payload.to_vec())
        .unwrap()
}

#[tokio::test]
async fn active_handshake() {
    // 1.  --> <SEQ=15><CTL=SYN>
    // 2.  <-- <SEQ=15><ACK=16><CTL=SYN,ACK>
    // 3.  --> <SEQ=16><ACK=16><CTL=ACK>
    let mut host = ScriptedHost::default();
    host.push(SegmentBuilder::new(15).syn().ack(16).window(2000).control());

    let mut ctx = Context::new(ISS, &config());
    active_open(&mut host, &mut ctx, &config()).await.unwrap();

    let sent = host.take_sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].header.seq, 15);
    assert!(sent[0].header.flags.syn());
    assert!(!sent[0].header.flags.ack());
    assert_eq!(sent[1].header.ack, 16);
    assert_eq!(sent[1].header.seq, 16);
    assert!(sent[1].header.flags.ack());
    assert!(!sent[1].header.flags.syn());

    assert_eq!(ctx.state(), State::Established);
    assert_eq!(ctx.sequence_num(), ctx.initial_sequence_num() + 1);
    assert_eq!(ctx.last_ack_byte(), ctx.sequence_num());
    assert_eq!(ctx.sequence_num(), 16);
    assert_eq!(ctx.sender_window_size(), 2000);
}

#[tokio::test]
async fn passive_handshake() {
    let mut host = ScriptedHost::default();
    host.push(SegmentBuilder::new(15).syn().window(3072).control());
    host.push(SegmentBuilder::new(16).ack(16).window(1500).control());

    let mut ctx = Context::new(ISS, &config());
    passive_open(&mut host, &mut ctx, &config()).await.unwrap();

    let sent = host.take_sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].header.flags.syn());
    assert!(sent[0].header.flags.ack());
    assert_eq!(sent[0].header.seq, 15);
    assert_eq!(sent[0].header.ack, 16);

    assert_eq!(ctx.state(), State::Established);
    assert_eq!(ctx.sequence_num(), 16);
    assert_eq!(ctx.last_ack_byte(), 16);
    assert_eq!(ctx.receive_next(), 16);
    assert_eq!(ctx.sender_window_size(), 1500);
}

#[tokio::test]
async fn active_handshake_failures() {
    // Missing SYN on the reply
    let mut host = ScriptedHost::default();
    host.push(SegmentBuilder::new(300).ack(16).control());
    let mut ctx = Context::new(ISS, &config());
    assert_eq!(
        active_open(&mut host, &mut ctx, &config()).await,
        Err(SetupError::FlagMismatch {
            expected: Flags::new(true, true, false),
            actual: Flags::new(true, false, false),
        })
    );
    assert_eq!(ctx.state(), State::HandshakeInProgress);

    // Acknowledges the wrong sequence number
    let mut host = ScriptedHost::default();
    host.push(SegmentBuilder::new(300).syn().ack(17).control());
    let mut ctx = Context::new(ISS, &config());
    assert_eq!(
        active_open(&mut host, &mut ctx, &config()).await,
        Err(SetupError::AckMismatch {
            expected: 16,
            actual: 17
        })
    );

    // Nobody answers
    let mut host = ScriptedHost::default();
    let mut ctx = Context::new(ISS, &config());
    assert_eq!(
        active_open(&mut host, &mut ctx, &config()).await,
        Err(SetupError::Timeout)
    );

    // Garbage answers
    let mut host = ScriptedHost::default();
    host.inbound.push_back(vec![0; 5]);
    let mut ctx = Context::new(ISS, &config());
    assert_eq!(
        active_open(&mut host, &mut ctx, &config()).await,
        Err(SetupError::Malformed(ParseError::HeaderTooShort { len: 5 }))
    );

    // The SYN cannot be sent
    let mut host = ScriptedHost {
        send_error: Some(TransportError::Disconnected),
        ..Default::default()
    };
    let mut ctx = Context::new(ISS, &config());
    assert_eq!(
        active_open(&mut host, &mut ctx, &config()).await,
        Err(SetupError::Transport(TransportError::Disconnected))
    );
}

#[tokio::test]
async fn passive_handshake_failures() {
    let mut host = ScriptedHost::default();
    host.push(data(15, b"hello"));
    let mut ctx = Context::new(ISS, &config());
    assert!(matches!(
        passive_open(&mut host, &mut ctx, &config()).await,
        Err(SetupError::FlagMismatch { .. })
    ));

    let mut host = ScriptedHost::default();
    host.push(SegmentBuilder::new(15).syn().control());
    host.push(SegmentBuilder::new(16).ack(99).control());
    let mut ctx = Context::new(ISS, &config());
    assert_eq!(
        passive_open(&mut host, &mut ctx, &config()).await,
        Err(SetupError::AckMismatch {
            expected: 16,
            actual: 99
        })
    );

    // The final ACK carries a stray SYN or FIN
    for flags in [Flags::new(true, true, false), Flags::new(true, false, true)] {
        let mut host = ScriptedHost::default();
        host.push(SegmentBuilder::new(15).syn().control());
        let mut last = SegmentBuilder::new(16).ack(16).control();
        last.header.flags = flags;
        host.push(last);
        let mut ctx = Context::new(ISS, &config());
        assert_eq!(
            passive_open(&mut host, &mut ctx, &config()).await,
            Err(SetupError::FlagMismatch {
                expected: Flags::new(true, false, false),
                actual: flags,
            })
        );
        assert_eq!(ctx.state(), State::HandshakeInProgress);
    }

    // SYN arrives but the final ACK never does
    let mut host = ScriptedHost::default();
    host.push(SegmentBuilder::new(15).syn().control());
    let mut ctx = Context::new(ISS, &config());
    assert_eq!(
        passive_open(&mut host, &mut ctx, &config()).await,
        Err(SetupError::Timeout)
    );
    assert_eq!(ctx.state(), State::HandshakeInProgress);
}

#[tokio::test]
async fn failed_handshake_refuses_the_application() {
    let mut host = ScriptedHost::default();
    assert_eq!(
        run(&mut host, Role::Active, &config()).await,
        Err(SetupError::Timeout)
    );
    assert_eq!(host.unblocked, Some(Err(SetupError::Timeout)));

    let mut host = ScriptedHost::default();
    let bad = config().window_size(0);
    assert_eq!(
        run(&mut host, Role::Passive, &bad).await,
        Err(SetupError::Config(ConfigError::ZeroWindow))
    );
    assert!(host.sent.is_empty());
}

#[tokio::test]
async fn data_transfer() {
    // Established at 16; the application offers 500 bytes and the window
    // allows exactly 500.
    let config = config().window_size(500);
    let mut ctx = Context::new(ISS, &config);
    let mut fin_retry = FinRetry::default();
    ctx.establish(PEER_ISS);
    let mut host = ScriptedHost::default();
    host.write(&[7; 500]);

    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    let sent = host.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].header.seq, 16);
    assert_eq!(sent[0].payload.len(), 500);
    assert!(sent[0].header.flags.is_empty());
    assert_eq!(ctx.sequence_num(), 516);
    assert_eq!(ctx.last_sent_byte(), 515);

    // No more may go out until the ACK arrives
    host.write(&[8; 100]);
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert!(host.take_sent().is_empty());
    assert!(!host.interests.last().unwrap().app_data());

    host.push(ack(516, 500));
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(ctx.last_ack_byte(), 516);
    assert!(host.take_sent().is_empty());

    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    let sent = host.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].header.seq, 516);
    assert_eq!(sent[0].payload, vec![8; 100]);
}

#[tokio::test]
async fn sends_follow_the_sequence_space() {
    let config = config();
    let mut ctx = established();
    let mut fin_retry = FinRetry::default();
    let mut host = ScriptedHost::default();
    host.write(&(0..5000).map(|i| i as u8).collect::<Vec<_>>());

    let mut next_seq = ctx.sequence_num();
    let mut received = vec![];
    loop {
        let last_ack = ctx.last_ack_byte();
        iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
        assert!(ctx.last_ack_byte() >= last_ack);

        for segment in host.take_sent() {
            assert_eq!(segment.header.seq, next_seq);
            assert!(segment.payload.len() <= config.max_payload_len);
            next_seq += segment.payload.len() as u32;
            received.extend_from_slice(&segment.payload);
        }
        assert_eq!(ctx.sequence_num(), next_seq);
        assert_eq!(ctx.last_sent_byte(), next_seq - 1);

        // The peer acknowledges everything it has seen so far
        if ctx.bytes_in_flight() > 0 {
            host.push(ack(ctx.sequence_num(), 3072));
        } else if host.app_out.is_empty() {
            break;
        }
    }
    assert_eq!(received, (0..5000).map(|i| i as u8).collect::<Vec<_>>());
}

#[tokio::test]
async fn duplicate_ack_is_idempotent() {
    let config = config();
    let mut ctx = established();
    let mut fin_retry = FinRetry::default();
    let mut host = ScriptedHost::default();
    host.write(&[1; 200]);
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;

    host.push(ack(116, 3072));
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    let snapshot = ctx.clone();

    host.push(ack(116, 3072));
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(ctx.last_ack_byte(), snapshot.last_ack_byte());
    assert_eq!(ctx.send_credit(), snapshot.send_credit());
    assert_eq!(ctx.advertised_window_size(), snapshot.advertised_window_size());
}

#[tokio::test]
async fn inbound_data_is_acknowledged_and_delivered() {
    let config = config();
    let mut ctx = established();
    let mut fin_retry = FinRetry::default();
    let mut host = ScriptedHost::default();
    host.push(data(301, b"hello"));
    host.push(data(306, b", world"));

    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;

    let sent = host.take_sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|segment| segment.header.flags.ack()));
    assert_eq!(sent[0].header.ack, 306);
    assert_eq!(sent[1].header.ack, 313);
    assert_eq!(host.delivered, b"hello, world");
    assert_eq!(ctx.receive_next(), 313);
}

#[tokio::test]
async fn peer_fin_is_acknowledged_past_its_payload() {
    let config = config();
    let mut ctx = established();
    let mut fin_retry = FinRetry::default();
    let mut host = ScriptedHost::default();
    host.push(fin(301, b"bye"));

    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(ctx.state(), State::FinReceived);
    assert!(host.peer_finished);
    assert_eq!(host.delivered, b"bye");
    let sent = host.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].header.ack, 305);

    // The peer repeats its FIN; it is acknowledged again but not delivered
    host.push(fin(301, b"bye"));
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(host.take_sent()[0].header.ack, 305);
    assert_eq!(host.delivered, b"bye");

    // The local side may still send after the peer finished
    host.write(b"still here");
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(host.take_sent()[0].payload, b"still here");

    // Anything but an ACK or FIN after the FIN is a violation
    host.push(data(305, b"late"));
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(host.delivered, b"bye");
}

#[tokio::test]
async fn close_waits_for_the_final_ack() {
    // Local close first, then the peer's FIN crosses our FIN's ACK
    let config = config();
    let mut ctx = established();
    let mut fin_retry = FinRetry::default();
    let mut host = ScriptedHost {
        close_requested: true,
        ..Default::default()
    };

    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(ctx.state(), State::FinSent);
    let sent = host.take_sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].header.flags.fin());
    assert_eq!(sent[0].header.seq, 16);

    // Close requests are not re-issued while the FIN is out
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert!(host.take_sent().is_empty());

    host.push(fin(301, b""));
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(ctx.state(), State::Closed);
    assert!(!ctx.is_done());
    assert_eq!(host.take_sent()[0].header.ack, 302);

    host.push(ack(17, 3072));
    control_loop(&mut host, &mut ctx, &config).await;
    assert!(ctx.is_done());
    assert!(ctx.local_fin_acked());
    assert!(ctx.peer_fin_received());
}

#[tokio::test]
async fn peer_closes_first() {
    let config = config();
    let mut ctx = established();
    let mut fin_retry = FinRetry::default();
    let mut host = ScriptedHost::default();

    host.push(fin(301, b""));
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(ctx.state(), State::FinReceived);

    host.close_requested = true;
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(ctx.state(), State::Closed);
    assert!(!ctx.is_done());

    host.push(ack(17, 3072));
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert!(ctx.is_done());
}

#[tokio::test]
async fn close_follows_queued_data() {
    let config = config();
    let mut ctx = established();
    let mut fin_retry = FinRetry::default();
    let mut host = ScriptedHost::default();
    host.write(b"last words");
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    host.close_requested = true;
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;

    let sent = host.take_sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].payload, b"last words");
    assert!(sent[1].header.flags.fin());
    assert_eq!(sent[1].header.seq, 26);
    assert_eq!(ctx.sequence_num(), 27);
}

#[tokio::test]
#[tracing_test::traced_test]
async fn malformed_segment_is_discarded() {
    let config = config();
    let mut ctx = established();
    let mut fin_retry = FinRetry::default();
    let mut host = ScriptedHost::default();

    // Declares a five word header but only carries three
    let mut raw = data(301, b"").serialize();
    raw[8] = 0x50;
    host.inbound.push_back(raw);

    let before = ctx.clone();
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(ctx, before);
    assert!(host.delivered.is_empty());
    assert!(host.sent.is_empty());
    assert!(logs_contain("Discarding segment"));
}

#[tokio::test]
async fn inconsistent_flags_are_discarded() {
    let config = config();
    let mut ctx = established();
    let mut fin_retry = FinRetry::default();
    let mut host = ScriptedHost::default();
    host.push(
        SegmentBuilder::new(301)
            .ack(16)
            .fin()
            .build(b"x".to_vec())
            .unwrap(),
    );
    host.push(SegmentBuilder::new(301).syn().ack(16).control());
    host.push(ack(9999, 3072));

    let before = ctx.clone();
    for _ in 0..3 {
        iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    }
    assert_eq!(ctx, before);
    assert!(host.delivered.is_empty());
    assert!(host.sent.is_empty());
    assert!(!host.peer_finished);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_leave_state_alone() {
    let config = config();
    let mut ctx = established();
    let mut fin_retry = FinRetry::default();
    let mut host = ScriptedHost {
        send_error: Some(TransportError::Io(std::io::ErrorKind::WouldBlock)),
        close_requested: true,
        ..Default::default()
    };
    host.write(b"lost");

    let before = ctx.clone();
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(ctx, before);
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(ctx.state(), State::Established);

    // The failed FIN is held back until the deadline, even once the
    // substrate recovers
    host.send_error = None;
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert!(!host.interests.last().unwrap().close_requested());
    assert_eq!(ctx.state(), State::Established);
    assert!(host.take_sent().is_empty());

    tokio::time::advance(config.event_timeout).await;
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(ctx.state(), State::FinSent);
    assert!(host.take_sent()[0].header.flags.fin());
}

#[tokio::test(start_paused = true)]
async fn fin_is_abandoned_on_a_disconnected_substrate() {
    let config = config();
    let mut ctx = established();
    let mut fin_retry = FinRetry::default();
    let mut host = ScriptedHost {
        send_error: Some(TransportError::Disconnected),
        close_requested: true,
        ..Default::default()
    };

    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert_eq!(ctx.state(), State::Established);

    host.send_error = None;
    tokio::time::advance(config.event_timeout * 10).await;
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert!(!host.interests.last().unwrap().close_requested());
    assert_eq!(ctx.state(), State::Established);
    assert!(host.take_sent().is_empty());
}

#[tokio::test]
async fn window_reopening_is_announced() {
    let config = config();
    let mut ctx = established();
    let mut fin_retry = FinRetry::default();
    let mut host = ScriptedHost {
        buffered: 3000,
        ..Default::default()
    };

    host.push(data(301, b"abc"));
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    let sent = host.take_sent();
    assert_eq!(sent[0].header.window, 69);

    // The application drains its buffer
    host.buffered = 0;
    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    let sent = host.take_sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].header.flags.ack());
    assert_eq!(sent[0].header.ack, 304);
    assert_eq!(sent[0].header.window, 3072);

    iterate(&mut host, &mut ctx, &mut fin_retry, &config).await;
    assert!(host.take_sent().is_empty());
}

#[tokio::test]
async fn full_passive_lifecycle() {
    let mut host = ScriptedHost {
        close_requested: true,
        ..Default::default()
    };
    host.push(SegmentBuilder::new(PEER_ISS).syn().window(3072).control());
    host.push(SegmentBuilder::new(PEER_ISS + 1).ack(16).window(3072).control());
    host.push(data(301, b"hi"));
    host.push(fin(303, b""));
    host.push(ack(17, 3072));

    run(&mut host, Role::Passive, &config()).await.unwrap();

    assert_eq!(host.unblocked, Some(Ok(())));
    assert_eq!(host.delivered, b"hi");
    assert!(host.peer_finished);
    let sent = host.take_sent();
    assert!(sent[0].header.flags.syn() && sent[0].header.flags.ack());
    assert!(sent.iter().any(|segment| segment.header.flags.fin()));
    assert_eq!(sent.last().unwrap().header.ack, 304);
}
