//! A byte-stream handle over an STCP connection.
//!
//! Each [`StcpStream`] owns a connection task that runs
//! [`transport::run`](crate::transport::run) against a [`SocketHost`]. The
//! handle and the task talk over channels, so the stream can be used from any
//! task while the connection itself stays single-threaded.

use crate::{
    transport::{self, Role, SetupError},
    Config,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use thiserror::Error as ThisError;
use tokio::{
    sync::{
        mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
        oneshot, Notify,
    },
    task::JoinHandle,
};
use tracing::debug;

mod link;
pub use link::{Datagram, MemoryLink, UdpLink};

mod socket_host;
pub use socket_host::SocketHost;

/// What the application asks of its connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    Write(Vec<u8>),
    Close,
}

/// What the connection hands back to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Delivery {
    Data(Vec<u8>),
    Eof,
}

/// Bytes handed to the application that it has not read yet. Reading wakes
/// the connection so a window that had closed is reopened right away.
#[derive(Debug, Default)]
pub(crate) struct Unread {
    bytes: AtomicUsize,
    consumed: Notify,
}

impl Unread {
    pub(crate) fn delivered(&self, len: usize) {
        self.bytes.fetch_add(len, Ordering::AcqRel);
    }

    pub(crate) fn consume(&self, len: usize) {
        self.bytes.fetch_sub(len, Ordering::AcqRel);
        self.consumed.notify_one();
    }

    /// Wakes the connection without changing the count
    pub(crate) fn wake(&self) {
        self.consumed.notify_one();
    }

    pub(crate) fn get(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    /// Resolves after the next `consume` or `wake`, or at once if one
    /// happened since the last call.
    pub(crate) async fn consumed(&self) {
        self.consumed.notified().await
    }
}

/// An established, bidirectional STCP byte stream.
#[derive(Debug)]
pub struct StcpStream {
    requests: UnboundedSender<Request>,
    deliveries: UnboundedReceiver<Delivery>,
    unread: Arc<Unread>,
    task: JoinHandle<Result<(), SetupError>>,
    closed: bool,
    eof: bool,
}

impl StcpStream {
    /// Actively opens a connection over `link`, returning once the handshake
    /// has finished.
    pub async fn connect<D: Datagram + 'static>(link: D, config: Config) -> Result<Self, StreamError> {
        Self::open(link, Role::Active, config).await
    }

    /// Waits on `link` for a peer to connect, returning once the handshake
    /// has finished.
    pub async fn accept<D: Datagram + 'static>(link: D, config: Config) -> Result<Self, StreamError> {
        Self::open(link, Role::Passive, config).await
    }

    async fn open<D: Datagram + 'static>(
        link: D,
        role: Role,
        config: Config,
    ) -> Result<Self, StreamError> {
        let (request_send, request_recv) = unbounded_channel();
        let (delivery_send, delivery_recv) = unbounded_channel();
        let (established_send, established_recv) = oneshot::channel();
        let unread = Arc::new(Unread::default());

        let mut host = SocketHost::new(
            link,
            request_recv,
            delivery_send,
            unread.clone(),
            established_send,
        );
        let task = tokio::spawn(async move { transport::run(&mut host, role, &config).await });

        match established_recv.await {
            Ok(Ok(())) => Ok(Self {
                requests: request_send,
                deliveries: delivery_recv,
                unread,
                task,
                closed: false,
                eof: false,
            }),
            Ok(Err(e)) => Err(StreamError::Setup(e)),
            Err(_) => Err(StreamError::Task),
        }
    }

    /// Queues `data` to be sent to the peer.
    pub fn write(&self, data: impl Into<Vec<u8>>) -> Result<(), StreamError> {
        if self.closed {
            Err(StreamError::Closed)?
        }
        self.requests
            .send(Request::Write(data.into()))
            .map_err(|_| StreamError::Closed)
    }

    /// Waits for the next chunk from the peer. Returns `None` once the peer
    /// has finished and everything it sent has been read.
    pub async fn read(&mut self) -> Option<Vec<u8>> {
        if self.eof {
            return None;
        }
        match self.deliveries.recv().await {
            Some(Delivery::Data(data)) => {
                self.unread.consume(data.len());
                Some(data)
            }
            Some(Delivery::Eof) | None => {
                self.eof = true;
                None
            }
        }
    }

    /// Reads until the peer finishes.
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut out = vec![];
        while let Some(chunk) = self.read().await {
            out.extend(chunk);
        }
        out
    }

    /// Tells the peer this side will send nothing more. Data already
    /// written is sent first. Reading keeps working.
    pub fn close(&mut self) -> Result<(), StreamError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Application closed the stream");
        self.requests
            .send(Request::Close)
            .map_err(|_| StreamError::Closed)
    }

    /// Closes the stream if it is still open and waits for the connection to
    /// shut down completely. Anything the peer sends that has not been read
    /// is discarded and no longer holds the receive window shut.
    pub async fn finish(mut self) -> Result<(), StreamError> {
        // A connection task that already exited is reported below
        let _ = self.close();
        drop(self.deliveries);
        self.unread.wake();
        self.task.await.map_err(|_| StreamError::Task)??;
        Ok(())
    }
}

/// Errors from the stream handle
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum StreamError {
    #[error("The stream is closed for writing")]
    Closed,
    #[error("Connection setup failed: {0}")]
    Setup(#[from] SetupError),
    #[error("The connection task ended unexpectedly")]
    Task,
}
