/// The state of an STCP connection. States only move down the diagram below;
/// CLOSED is terminal.
///
/// ```text
///                     +------------------------+
///                     | HANDSHAKE IN PROGRESS  |
///                     +------------------------+
///                                 |  SYN, SYN+ACK, ACK
///                                 V
///                          +-------------+
///                          | ESTABLISHED |
///                          +-------------+
///                 CLOSE     |           |    rcv FIN
///                -------   /             \   -------
///                snd FIN  /               \  snd ACK
///                        V                 V
///              +----------+             +--------------+
///              | FIN SENT |             | FIN RECEIVED |
///              +----------+             +--------------+
///                        \                 /
///               rcv FIN   \               /   CLOSE
///               -------    \             /   -------
///               snd ACK     V           V    snd FIN
///                          +-------------+
///                          |   CLOSED    |
///                          +-------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// SYN sent or awaited; no data may flow yet.
    HandshakeInProgress,
    /// An open connection; data flows in both directions.
    Established,
    /// The local application closed; waiting for the peer's FIN. The peer
    /// may still send data.
    FinSent,
    /// The peer finished sending; the local application may still send.
    FinReceived,
    /// Both directions have exchanged FINs.
    Closed,
}

impl State {
    /// The state after the local application closes, if closing is legal here
    pub const fn after_local_close(self) -> Option<Self> {
        match self {
            Self::Established => Some(Self::FinSent),
            Self::FinReceived => Some(Self::Closed),
            Self::HandshakeInProgress | Self::FinSent | Self::Closed => None,
        }
    }

    /// The state after the peer's FIN arrives, if a FIN is news here
    pub const fn after_peer_fin(self) -> Option<Self> {
        match self {
            Self::Established => Some(Self::FinReceived),
            Self::FinSent => Some(Self::Closed),
            Self::HandshakeInProgress | Self::FinReceived | Self::Closed => None,
        }
    }

    /// Whether application data may still be sent
    pub const fn can_send(self) -> bool {
        matches!(self, Self::Established | Self::FinReceived)
    }

    /// Whether the peer may still send data
    pub const fn can_receive(self) -> bool {
        matches!(self, Self::Established | Self::FinSent)
    }
}
