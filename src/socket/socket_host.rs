use super::{Datagram, Delivery, Request, Unread};
use crate::{
    host::TransportError,
    transport::SetupError,
    Events, Host,
};
use async_trait::async_trait;
use std::{collections::VecDeque, sync::Arc};
use tokio::{
    sync::{
        mpsc::{UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    time::{sleep_until, Instant},
};
use tracing::{debug, trace};

/// Connects a transport to a [`Datagram`] link and to the channels of an
/// [`StcpStream`](super::StcpStream).
///
/// At most one inbound datagram is held back so readiness can be reported
/// without the transport having asked for the segment yet.
pub struct SocketHost<D> {
    link: D,
    link_down: bool,
    inbound: Option<Result<Vec<u8>, TransportError>>,
    requests: UnboundedReceiver<Request>,
    requests_open: bool,
    outbox: VecDeque<u8>,
    close_requested: bool,
    deliveries: UnboundedSender<Delivery>,
    unread: Arc<Unread>,
    established: Option<oneshot::Sender<Result<(), SetupError>>>,
}

impl<D: Datagram> SocketHost<D> {
    pub(crate) fn new(
        link: D,
        requests: UnboundedReceiver<Request>,
        deliveries: UnboundedSender<Delivery>,
        unread: Arc<Unread>,
        established: oneshot::Sender<Result<(), SetupError>>,
    ) -> Self {
        Self {
            link,
            link_down: false,
            inbound: None,
            requests,
            requests_open: true,
            outbox: VecDeque::new(),
            close_requested: false,
            deliveries,
            unread,
            established: Some(established),
        }
    }

    fn ready(&self) -> Events {
        let mut ready = Events::empty();
        if !self.outbox.is_empty() {
            ready.insert(Events::APP_DATA);
        }
        // Close only surfaces once everything written before it is out
        if self.close_requested && self.outbox.is_empty() {
            ready.insert(Events::APP_CLOSE_REQUESTED);
        }
        if self.inbound.is_some() {
            ready.insert(Events::NETWORK_DATA);
        }
        ready
    }

    fn handle_request(&mut self, request: Option<Request>) {
        match request {
            Some(Request::Write(data)) => self.outbox.extend(data),
            Some(Request::Close) => self.close_requested = true,
            None => {
                debug!("Stream handle dropped, closing");
                self.requests_open = false;
                self.close_requested = true;
            }
        }
    }
}

#[async_trait]
impl<D: Datagram> Host for SocketHost<D> {
    async fn wait_for_event(&mut self, interest: Events, deadline: Instant) -> Events {
        loop {
            let ready = self.ready() & interest;
            if !ready.is_empty() {
                return ready;
            }

            let poll_link =
                interest.network_data() && self.inbound.is_none() && !self.link_down;
            tokio::select! {
                request = self.requests.recv(), if self.requests_open => {
                    self.handle_request(request);
                }
                datagram = self.link.recv(), if poll_link => {
                    if datagram == Err(TransportError::Disconnected) {
                        debug!("Link disconnected");
                        self.link_down = true;
                    }
                    self.inbound = Some(datagram);
                }
                _ = self.unread.consumed() => {
                    trace!("Application read, waking to reopen the window");
                    return Events::empty();
                }
                _ = sleep_until(deadline) => return Events::empty(),
            }
        }
    }

    async fn send_segment(&mut self, segment: &[u8]) -> Result<usize, TransportError> {
        self.link.send(segment).await
    }

    async fn receive_segment(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let datagram = self.inbound.take().ok_or(TransportError::NotConnected)??;
        if datagram.len() > buf.len() {
            Err(TransportError::Truncated {
                expected: datagram.len(),
                sent: buf.len(),
            })?
        }
        buf[..datagram.len()].copy_from_slice(&datagram);
        Ok(datagram.len())
    }

    fn app_read(&mut self, max: usize) -> Vec<u8> {
        let len = max.min(self.outbox.len());
        self.outbox.drain(..len).collect()
    }

    fn app_write(&mut self, data: &[u8]) {
        if self.deliveries.send(Delivery::Data(data.to_vec())).is_ok() {
            self.unread.delivered(data.len());
        } else {
            trace!(len = data.len(), "Nobody is reading, discarding");
        }
    }

    fn app_buffered(&self) -> usize {
        // Whatever is left once the reader is gone will never be consumed
        if self.deliveries.is_closed() {
            0
        } else {
            self.unread.get()
        }
    }

    fn notify_peer_finished(&mut self) {
        let _ = self.deliveries.send(Delivery::Eof);
    }

    fn unblock_application(&mut self, outcome: Result<(), SetupError>) {
        if let Some(established) = self.established.take() {
            let _ = established.send(outcome);
        }
    }
}
