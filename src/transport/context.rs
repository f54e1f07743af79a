use super::{ProtocolViolation, State};
use crate::{
    config::Config,
    seq::{seq_gt, seq_leq},
};

// The local sequence space:
//
//   acked    |  in flight   |  sendable    |  blocked
// -----------+--------------+--------------+-----------
//      last_ack_byte   sequence_num   last_ack_byte
//                                     + min(cwnd, swnd)

/// The protocol state of one connection. Owned exclusively by the task that
/// drives the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    state: State,
    /// Chosen once at creation, validates the handshake ACK
    initial_sequence_num: u32,
    /// Next sequence number to assign to outgoing data
    sequence_num: u32,
    /// Highest sequence number sent so far
    last_sent_byte: u32,
    /// Highest cumulative acknowledgment received from the peer
    last_ack_byte: u32,
    /// Next sequence number expected from the peer
    receive_next: u32,
    /// Room this side offers the peer, from receive buffer occupancy
    advertised_window_size: u16,
    /// The window carried on the most recent segment this side sent
    last_advertised: u16,
    /// The peer's last advertised window
    sender_window_size: u16,
    /// Static cap on bytes in flight
    congestion_window_size: u16,
    /// Receive capacity when the application has consumed everything
    receive_capacity: u16,
    /// The sequence number the local FIN occupies, once sent
    local_fin: Option<u32>,
    local_fin_acked: bool,
    peer_fin_received: bool,
}

impl Context {
    /// Creates the context for a connection whose handshake has yet to run.
    pub fn new(initial_sequence_num: u32, config: &Config) -> Self {
        Self {
            state: State::HandshakeInProgress,
            initial_sequence_num,
            sequence_num: initial_sequence_num,
            last_sent_byte: initial_sequence_num,
            last_ack_byte: initial_sequence_num,
            receive_next: 0,
            advertised_window_size: config.window_size,
            last_advertised: config.window_size,
            sender_window_size: config.window_size,
            congestion_window_size: config.window_size,
            receive_capacity: config.window_size,
            local_fin: None,
            local_fin_acked: false,
            peer_fin_received: false,
        }
    }

    /// Records a completed handshake. The SYN consumed the initial sequence
    /// number, so data starts one past it.
    pub fn establish(&mut self, peer_initial_sequence_num: u32) {
        self.sequence_num = self.initial_sequence_num.wrapping_add(1);
        self.last_ack_byte = self.sequence_num;
        self.last_sent_byte = self.initial_sequence_num;
        self.receive_next = peer_initial_sequence_num.wrapping_add(1);
        self.state = State::Established;
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn initial_sequence_num(&self) -> u32 {
        self.initial_sequence_num
    }

    pub fn sequence_num(&self) -> u32 {
        self.sequence_num
    }

    pub fn last_sent_byte(&self) -> u32 {
        self.last_sent_byte
    }

    pub fn last_ack_byte(&self) -> u32 {
        self.last_ack_byte
    }

    pub fn receive_next(&self) -> u32 {
        self.receive_next
    }

    pub fn advertised_window_size(&self) -> u16 {
        self.advertised_window_size
    }

    pub fn sender_window_size(&self) -> u16 {
        self.sender_window_size
    }

    pub fn congestion_window_size(&self) -> u16 {
        self.congestion_window_size
    }

    pub fn local_fin_acked(&self) -> bool {
        self.local_fin_acked
    }

    pub fn peer_fin_received(&self) -> bool {
        self.peer_fin_received
    }

    /// Sequence numbers sent but not yet acknowledged, a sent FIN included
    pub fn bytes_in_flight(&self) -> u32 {
        self.sequence_num.wrapping_sub(self.last_ack_byte)
    }

    /// How much more the congestion window lets this side put in flight.
    /// Shrinks by every byte sent and grows back by exactly the newly
    /// acknowledged amount.
    pub fn send_credit(&self) -> u32 {
        (self.congestion_window_size as u32).saturating_sub(self.bytes_in_flight())
    }

    /// The number of application bytes that may go into the next segment
    pub fn send_quota(&self, max_payload_len: usize) -> usize {
        if !self.state.can_send() {
            return 0;
        }
        let window = self.congestion_window_size.min(self.sender_window_size) as u32;
        let open = window.saturating_sub(self.bytes_in_flight()) as usize;
        open.min(max_payload_len)
    }

    /// Takes the peer's advertised window without acknowledging anything,
    /// as on the handshake segments that establish the connection.
    pub fn set_sender_window(&mut self, window: u16) {
        self.sender_window_size = window;
    }

    /// Accounts for `len` application bytes transmitted at `sequence_num`.
    pub fn record_sent(&mut self, len: usize) {
        self.sequence_num = self.sequence_num.wrapping_add(len as u32);
        self.last_sent_byte = self.sequence_num.wrapping_sub(1);
    }

    /// Accounts for a FIN transmitted at `sequence_num` and returns its
    /// sequence number. Returns `None` without touching anything when the
    /// local side has already closed.
    pub fn record_local_close(&mut self) -> Option<u32> {
        let next = self.state.after_local_close()?;
        let fin = self.sequence_num;
        self.local_fin = Some(fin);
        self.sequence_num = fin.wrapping_add(1);
        self.last_sent_byte = fin;
        self.state = next;
        Some(fin)
    }

    /// Applies an inbound acknowledgment and the window it carries. Returns
    /// the number of newly acknowledged sequence numbers; duplicates and
    /// stale acknowledgments retire nothing.
    pub fn on_ack(&mut self, ack: u32, window: u16) -> Result<u32, ProtocolViolation> {
        if seq_gt(ack, self.sequence_num) {
            Err(ProtocolViolation::AckOfUnsentData {
                ack,
                next: self.sequence_num,
            })?
        }

        self.sender_window_size = window;

        if seq_leq(ack, self.last_ack_byte) {
            return Ok(0);
        }
        let newly_acked = ack.wrapping_sub(self.last_ack_byte);
        self.last_ack_byte = ack;

        if let Some(fin) = self.local_fin {
            if seq_gt(ack, fin) {
                self.local_fin_acked = true;
            }
        }
        Ok(newly_acked)
    }

    /// Applies an in-order data segment and returns the cumulative
    /// acknowledgment for it.
    pub fn on_peer_data(&mut self, seq: u32, payload_len: usize) -> u32 {
        self.receive_next = seq.wrapping_add(payload_len as u32);
        self.receive_next
    }

    /// Applies the peer's FIN and returns the acknowledgment for it. The FIN
    /// occupies one sequence number past the payload. A repeated FIN is
    /// acknowledged again without moving the state.
    pub fn on_peer_fin(&mut self, seq: u32, payload_len: usize) -> u32 {
        if let Some(next) = self.state.after_peer_fin() {
            self.state = next;
            self.peer_fin_received = true;
        }
        self.receive_next = seq.wrapping_add(payload_len as u32).wrapping_add(1);
        self.receive_next
    }

    /// Recomputes the advertised window from the bytes the application has
    /// not consumed yet.
    pub fn refresh_advertised_window(&mut self, app_buffered: usize) {
        let buffered = app_buffered.min(u16::MAX as usize) as u16;
        self.advertised_window_size = self.receive_capacity.saturating_sub(buffered);
    }

    /// Notes the window carried on a segment that was just sent.
    pub fn note_advertised(&mut self, window: u16) {
        self.last_advertised = window;
    }

    /// Whether the peer was last told a window too small for a full segment
    /// and room has opened since.
    pub fn needs_window_update(&self, max_payload_len: usize) -> bool {
        let threshold = max_payload_len.min(self.receive_capacity as usize);
        (self.last_advertised as usize) < threshold
            && self.advertised_window_size as usize >= threshold
    }

    /// Both directions are finished and the local FIN is acknowledged.
    pub fn is_done(&self) -> bool {
        self.state == State::Closed && self.local_fin_acked && self.peer_fin_received
    }
}
