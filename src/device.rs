//! Command/response correlation.
//!
//! [`Device`] owns the link and the queue of outstanding requests. It writes
//! queued requests out, matches each incoming status or response to the
//! command it answers by command id and sequence number, and hands AECs to
//! whoever is listening.

use heapless::Vec;

use crate::cmd_req::{CmdReqError, CommandRequest, RequestId, RequestOwner, RequestState, SourceCommand};
use crate::commands::{Aec, Elements, Message, STATUS_OK};
use crate::link::Link;

/// Requests that may be outstanding at once.
pub const REQUEST_QUEUE_DEPTH: usize = 6;
/// Largest message we accept from the network controller.
pub const RX_BUFFER_SIZE: usize = 640;

/// Status of one command.
#[derive(Debug, Copy, Clone)]
pub struct CommandStatus<'a> {
    pub cmd_id: u16,
    pub seq: u16,
    pub status: u16,
    pub source: SourceCommand<'a>,
}

impl<'a> CommandStatus<'a> {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Response to one command.
#[derive(Debug, Copy, Clone)]
pub struct Response<'a> {
    pub cmd_id: u16,
    pub rsp_id: u16,
    pub elems: Elements<'a>,
    pub source: SourceCommand<'a>,
}

/// Progress of a request, reported to its owner.
///
/// For each request: one `TxComplete` once it is on the wire, any number of
/// `CmdStatus` and `Response` events, then exactly one `StatusComplete`
/// after which the request is gone.
#[derive(Debug, Copy, Clone)]
pub enum RequestEvent<'a> {
    TxComplete,
    CmdStatus(CommandStatus<'a>),
    Response(Response<'a>),
    StatusComplete { num_cmds: u8, num_errors: u8 },
}

/// Receives everything the transport dispatches. Requests may be submitted
/// through the `requests` argument, which is how chunked operations carry
/// on from inside their own events.
pub trait EventHandler {
    fn request_event(
        &mut self,
        requests: &mut Requests,
        owner: RequestOwner,
        id: RequestId,
        event: RequestEvent<'_>,
    );

    fn aec(&mut self, requests: &mut Requests, aec: &Aec<'_>);
}

/// Queue of requests accepted by the transport.
pub struct Requests {
    queue: Vec<CommandRequest, REQUEST_QUEUE_DEPTH>,
    /// Requests taken out of the queue while their events are dispatched.
    /// Their slots stay reserved so they can always be put back.
    detached: usize,
    next_seq: u16,
    next_id: u16,
    open: bool,
    bus_error: bool,
}

impl Requests {
    fn new() -> Self {
        Requests {
            queue: Vec::new(),
            detached: 0,
            next_seq: 0,
            next_id: 0,
            open: false,
            bus_error: false,
        }
    }

    /// Accepts a request for sending. It goes out on the next poll.
    pub fn transmit(&mut self, mut req: CommandRequest) -> Result<RequestId, CmdReqError> {
        if !self.open {
            return Err(CmdReqError::Closed);
        }

        if self.bus_error {
            return Err(CmdReqError::BusError);
        }

        if req.state() != RequestState::Building {
            return Err(CmdReqError::NotBuilding);
        }

        if req.is_empty() {
            return Err(CmdReqError::Empty);
        }

        if self.queue.len() + self.detached >= REQUEST_QUEUE_DEPTH {
            return Err(CmdReqError::QueueFull);
        }

        let id = RequestId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        req.accept(id, &mut self.next_seq);

        trace!(
            "queued request {} with {} commands",
            id.0,
            req.num_commands()
        );

        self.queue.push(req).map_err(|_| CmdReqError::QueueFull)?;
        Ok(id)
    }

    /// Builds a request with `build` and transmits it.
    pub fn submit(
        &mut self,
        owner: RequestOwner,
        max_commands: usize,
        payload_len: usize,
        build: impl FnOnce(&mut CommandRequest) -> Result<(), CmdReqError>,
    ) -> Result<RequestId, CmdReqError> {
        let mut req = CommandRequest::new(owner, max_commands, payload_len)?;
        build(&mut req)?;
        self.transmit(req)
    }

    /// Requests accepted but not yet complete.
    pub fn pending(&self) -> usize {
        self.queue.len() + self.detached
    }

    pub fn has_bus_error(&self) -> bool {
        self.bus_error
    }

    fn take(&mut self, idx: usize) -> CommandRequest {
        self.detached += 1;
        self.queue.remove(idx)
    }

    fn restore(&mut self, idx: usize, req: CommandRequest) {
        self.detached -= 1;
        let idx = core::cmp::min(idx, self.queue.len());
        if self.queue.insert(idx, req).is_err() {
            error!("request queue overflow, dropping request");
        }
    }

    fn retire(&mut self) {
        self.detached -= 1;
    }

    fn find(&self, id: u16, seq: u16) -> Option<(usize, usize)> {
        self.queue
            .iter()
            .enumerate()
            .find_map(|(idx, req)| req.find(id, seq).map(|cmd| (idx, cmd)))
    }
}

/// The transport: a [`Link`] plus the request queue.
pub struct Device<L> {
    link: L,
    requests: Requests,
    rx: [u8; RX_BUFFER_SIZE],
    /// Most messages read per poll, so a chatty device can’t starve the
    /// caller’s main loop.
    rx_budget: usize,
}

impl<L: Link> Device<L> {
    /// The device starts closed.
    pub fn new(link: L, rx_budget: usize) -> Self {
        Device {
            link,
            requests: Requests::new(),
            rx: [0; RX_BUFFER_SIZE],
            rx_budget,
        }
    }

    /// Accepts requests again, clearing any bus error.
    pub fn open(&mut self) {
        self.requests.open = true;
        self.requests.bus_error = false;
    }

    pub fn is_open(&self) -> bool {
        self.requests.open
    }

    /// Completes every outstanding request with all of its commands in error
    /// and stops accepting new ones.
    pub fn close<H: EventHandler>(&mut self, handler: &mut H) {
        self.requests.open = false;
        Self::flush(&mut self.requests, handler);
    }

    pub fn transmit(&mut self, req: CommandRequest) -> Result<RequestId, CmdReqError> {
        self.requests.transmit(req)
    }

    pub fn requests(&mut self) -> &mut Requests {
        &mut self.requests
    }

    pub fn link(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn release(self) -> L {
        self.link
    }

    /// One turn of the driver task: send what is queued, then dispatch what
    /// the device has sent.
    pub fn poll<H: EventHandler>(&mut self, handler: &mut H) {
        self.send_queued(handler);

        for _ in 0..self.rx_budget {
            match self.link.read_message(&mut self.rx) {
                Ok(len) => Self::dispatch(&self.rx[..len], &mut self.requests, handler),
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(_err)) => {
                    warn!("dropping message, link read failed");
                    break;
                }
            }
        }

        // Requests queued by the handlers above go out now rather than on
        // the next poll.
        self.send_queued(handler);
    }

    fn send_queued<H: EventHandler>(&mut self, handler: &mut H) {
        let mut idx = 0;

        while idx < self.requests.queue.len() {
            if self.requests.queue[idx].state() != RequestState::Queued {
                idx += 1;
                continue;
            }

            let mut written = Ok(());
            for msg in self.requests.queue[idx].messages() {
                written = self.link.write_message(msg);
                if written.is_err() {
                    break;
                }
            }

            if written.is_err() {
                error!("link write failed, failing all requests");
                self.requests.bus_error = true;
                Self::flush(&mut self.requests, handler);
                return;
            }

            let mut req = self.requests.take(idx);
            req.set_state(RequestState::InFlight);
            handler.request_event(
                &mut self.requests,
                req.owner(),
                req.id(),
                RequestEvent::TxComplete,
            );
            self.requests.restore(idx, req);

            idx += 1;
        }
    }

    fn flush<H: EventHandler>(requests: &mut Requests, handler: &mut H) {
        while !requests.queue.is_empty() {
            let mut req = requests.take(0);
            let num_cmds = req.num_commands() as u8;
            req.set_state(RequestState::Complete);

            handler.request_event(
                requests,
                req.owner(),
                req.id(),
                RequestEvent::StatusComplete {
                    num_cmds,
                    num_errors: num_cmds,
                },
            );

            requests.retire();
        }
    }

    fn dispatch<H: EventHandler>(msg: &[u8], requests: &mut Requests, handler: &mut H) {
        let message = match Message::parse(msg) {
            Some(message) => message,
            None => {
                warn!("dropping malformed message of {} bytes", msg.len());
                return;
            }
        };

        match message {
            Message::Aec(aec) => {
                trace!("aec {}", aec.id);
                handler.aec(requests, &aec);
            }

            Message::Status { id, seq, status } => {
                let (idx, cmd) = match requests.find(id, seq) {
                    Some(found) => found,
                    None => {
                        debug!("no request for status of {}/{}", id, seq);
                        return;
                    }
                };

                let mut req = requests.take(idx);
                req.record_status(cmd, status);

                if let Some(source) = req.source(cmd) {
                    handler.request_event(
                        requests,
                        req.owner(),
                        req.id(),
                        RequestEvent::CmdStatus(CommandStatus {
                            cmd_id: id,
                            seq,
                            status,
                            source,
                        }),
                    );
                }

                if req.all_statuses_received() {
                    req.set_state(RequestState::Complete);
                    handler.request_event(
                        requests,
                        req.owner(),
                        req.id(),
                        RequestEvent::StatusComplete {
                            num_cmds: req.num_commands() as u8,
                            num_errors: req.num_errors(),
                        },
                    );
                    requests.retire();
                } else {
                    requests.restore(idx, req);
                }
            }

            Message::Response {
                id,
                seq,
                rsp_id,
                elems,
            } => {
                let (idx, cmd) = match requests.find(id, seq) {
                    Some(found) => found,
                    None => {
                        debug!("no request for response to {}/{}", id, seq);
                        return;
                    }
                };

                let req = requests.take(idx);
                if let Some(source) = req.source(cmd) {
                    handler.request_event(
                        requests,
                        req.owner(),
                        req.id(),
                        RequestEvent::Response(Response {
                            cmd_id: id,
                            rsp_id,
                            elems,
                            source,
                        }),
                    );
                }
                requests.restore(idx, req);
            }
        }
    }
}
