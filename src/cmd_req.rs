//! Command requests: a batch of commands sent to the network controller
//! together and completed together.

use heapless::Vec;

use crate::commands::{parse_request, CommandId, Elements, MsgType, SendParam, REQ_HEADER_LEN};

/// Largest encoded request, all commands included. Sized so one NVM write
/// chunk fits with room to spare.
pub const REQUEST_BUFFER_SIZE: usize = 640;
/// Most commands one request may carry.
pub const MAX_COMMANDS_PER_REQUEST: usize = 8;
/// Buffer reserved per command on top of the caller's payload estimate.
/// Covers the request header and a handful of integer parameters.
pub const COMMAND_ALLOWANCE: usize = 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CmdReqError {
    /// `max_commands` was zero or too large, or the buffer it needs doesn’t
    /// fit in [`REQUEST_BUFFER_SIZE`].
    InvalidSize,
    /// The request already holds as many commands as it was created for.
    TooManyCommands,
    /// The command doesn’t fit in what’s left of the request buffer.
    NoSpace,
    /// The request has already been handed to the transport.
    NotBuilding,
    /// Transmitting a request with no commands in it.
    Empty,
    /// The transport’s queue of outstanding requests is full.
    QueueFull,
    /// The transport is closed.
    Closed,
    /// A write to the link failed. The transport refuses new requests until
    /// it is reopened.
    BusError,
}

/// Who gets told about a request’s progress. Replaces a callback pointer and
/// context: the driver routes each request’s events to its owner.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestOwner {
    Nvm,
    Assoc,
    Sta,
    Bss,
    Sntp,
    Ble,
    Wifi,
    /// A request built by the application. The tag is passed back with each
    /// of its events.
    User(u16),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestState {
    /// Commands may still be added.
    Building,
    /// Accepted by the transport, not yet written to the link.
    Queued,
    /// Written to the link, waiting for statuses.
    InFlight,
    /// Every command has a status. The request is dropped after its
    /// `StatusComplete` event.
    Complete,
}

/// Handle the transport assigns to a request when it accepts it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestId(pub u16);

#[derive(Debug, Copy, Clone)]
struct CommandSlot {
    start: usize,
    len: usize,
    id: u16,
    seq: u16,
    status: Option<u16>,
}

/// The parameters of a command that was sent, handed back alongside its
/// status or response so continuation logic can see what was asked for.
#[derive(Debug, Copy, Clone)]
pub struct SourceCommand<'a> {
    /// Position of the command within its request.
    pub index: u8,
    pub id: u16,
    pub params: Elements<'a>,
}

impl<'a> SourceCommand<'a> {
    pub fn command(&self) -> Option<CommandId> {
        CommandId::from_u16(self.id)
    }
}

/// A batch of encoded commands.
///
/// Created with a fixed command count and payload estimate, filled with the
/// encoder methods (`nvmwr`, `wsta`, …), then moved into the transport with
/// `transmit`. The transport owns it from then on and drops it once every
/// command has a status, so a request can never be sent twice.
pub struct CommandRequest {
    owner: RequestOwner,
    state: RequestState,
    id: RequestId,
    max_commands: usize,
    capacity: usize,
    buf: Vec<u8, REQUEST_BUFFER_SIZE>,
    cmds: Vec<CommandSlot, MAX_COMMANDS_PER_REQUEST>,
    num_errors: u8,
}

impl CommandRequest {
    /// Reserves room for `max_commands` commands and `payload_len` bytes of
    /// variable-sized parameter data (strings, byte arrays).
    pub fn new(
        owner: RequestOwner,
        max_commands: usize,
        payload_len: usize,
    ) -> Result<Self, CmdReqError> {
        if max_commands == 0 || max_commands > MAX_COMMANDS_PER_REQUEST {
            return Err(CmdReqError::InvalidSize);
        }

        let capacity = payload_len
            .checked_add(max_commands * COMMAND_ALLOWANCE)
            .filter(|capacity| *capacity <= REQUEST_BUFFER_SIZE)
            .ok_or(CmdReqError::InvalidSize)?;

        Ok(CommandRequest {
            owner,
            state: RequestState::Building,
            id: RequestId(0),
            max_commands,
            capacity,
            buf: Vec::new(),
            cmds: Vec::new(),
            num_errors: 0,
        })
    }

    /// Appends one command. The sequence number is filled in later, when the
    /// transport accepts the request.
    pub fn push_command(
        &mut self,
        id: impl Into<u16>,
        params: &[SendParam],
    ) -> Result<(), CmdReqError> {
        if self.state != RequestState::Building {
            return Err(CmdReqError::NotBuilding);
        }

        if self.cmds.len() >= self.max_commands {
            return Err(CmdReqError::TooManyCommands);
        }

        if params.len() > u8::MAX as usize {
            return Err(CmdReqError::NoSpace);
        }

        let len = REQ_HEADER_LEN + params.iter().map(SendParam::encoded_len).sum::<usize>();
        if self.buf.len() + len > self.capacity {
            return Err(CmdReqError::NoSpace);
        }

        let id = id.into();
        let start = self.buf.len();
        let [id_h, id_l] = id.to_be_bytes();

        let written = self
            .buf
            .extend_from_slice(&[MsgType::Request as u8, id_h, id_l, 0, 0, params.len() as u8])
            .map_err(|_| CmdReqError::NoSpace)
            .and_then(|_| params.iter().try_for_each(|p| p.write_to(&mut self.buf)));

        if let Err(err) = written {
            self.buf.truncate(start);
            return Err(err);
        }

        self.cmds
            .push(CommandSlot {
                start,
                len,
                id,
                seq: 0,
                status: None,
            })
            .map_err(|_| CmdReqError::TooManyCommands)
    }

    pub fn owner(&self) -> RequestOwner {
        self.owner
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Only meaningful once the transport has accepted the request.
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn num_commands(&self) -> usize {
        self.cmds.len()
    }

    pub fn num_errors(&self) -> u8 {
        self.num_errors
    }

    /// Encoded size so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    /// Stamps the request as queued, giving each command the next sequence
    /// number.
    pub(crate) fn accept(&mut self, id: RequestId, next_seq: &mut u16) {
        for slot in self.cmds.iter_mut() {
            slot.seq = *next_seq;
            *next_seq = next_seq.wrapping_add(1);

            let [seq_h, seq_l] = slot.seq.to_be_bytes();
            self.buf[slot.start + 3] = seq_h;
            self.buf[slot.start + 4] = seq_l;
        }

        self.id = id;
        self.state = RequestState::Queued;
    }

    pub(crate) fn set_state(&mut self, state: RequestState) {
        self.state = state;
    }

    /// The encoded commands, one message each, in order.
    pub(crate) fn messages(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.cmds
            .iter()
            .map(move |slot| &self.buf[slot.start..slot.start + slot.len])
    }

    /// Finds the in-flight command a status or response belongs to.
    pub(crate) fn find(&self, id: u16, seq: u16) -> Option<usize> {
        if self.state != RequestState::InFlight {
            return None;
        }

        self.cmds
            .iter()
            .position(|slot| slot.id == id && slot.seq == seq && slot.status.is_none())
    }

    pub(crate) fn record_status(&mut self, idx: usize, status: u16) {
        if let Some(slot) = self.cmds.get_mut(idx) {
            slot.status = Some(status);
            if status != crate::commands::STATUS_OK {
                self.num_errors = self.num_errors.saturating_add(1);
            }
        }
    }

    pub(crate) fn all_statuses_received(&self) -> bool {
        self.cmds.iter().all(|slot| slot.status.is_some())
    }

    pub fn source(&self, idx: usize) -> Option<SourceCommand<'_>> {
        let slot = self.cmds.get(idx)?;
        let (id, _, params) = parse_request(&self.buf[slot.start..slot.start + slot.len])?;

        Some(SourceCommand {
            index: idx as u8,
            id,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_zero_and_oversized_requests() {
        assert_eq!(
            CommandRequest::new(RequestOwner::Nvm, 0, 0).err(),
            Some(CmdReqError::InvalidSize)
        );
        assert_eq!(
            CommandRequest::new(RequestOwner::Nvm, MAX_COMMANDS_PER_REQUEST + 1, 0).err(),
            Some(CmdReqError::InvalidSize)
        );
        assert_eq!(
            CommandRequest::new(RequestOwner::Nvm, 1, REQUEST_BUFFER_SIZE).err(),
            Some(CmdReqError::InvalidSize)
        );
        assert_eq!(
            CommandRequest::new(RequestOwner::User(1), 1, usize::MAX).err(),
            Some(CmdReqError::InvalidSize)
        );
        assert!(CommandRequest::new(RequestOwner::Nvm, 1, 512).is_ok());
    }

    #[test]
    fn encodes_header_and_params() {
        let mut req = CommandRequest::new(RequestOwner::Nvm, 1, 0).unwrap();
        req.nvmer(2, 3).unwrap();

        let msg: std::vec::Vec<&[u8]> = req.messages().collect();
        assert_eq!(
            msg,
            [&[0x01, 0x14, 0x01, 0x00, 0x00, 0x02, 0x02, 0x00, 0x01, 0x02, 0x02, 0x00, 0x01, 0x03][..]]
        );
    }

    #[test]
    fn stops_at_max_commands() {
        let mut req = CommandRequest::new(RequestOwner::Ble, 1, 0).unwrap();
        req.bleinit().unwrap();

        assert_eq!(req.bleinit(), Err(CmdReqError::TooManyCommands));
        assert_eq!(req.num_commands(), 1);
    }

    #[test]
    fn rejects_commands_past_the_payload_estimate() {
        let mut req = CommandRequest::new(RequestOwner::Nvm, 1, 16).unwrap();
        let data = [0u8; 64];

        assert_eq!(req.nvmwr(0, &data), Err(CmdReqError::NoSpace));
        assert!(req.is_empty());
        assert_eq!(req.len(), 0);
    }

    #[test]
    fn accepted_request_refuses_more_commands_and_numbers_each_command() {
        let mut req = CommandRequest::new(RequestOwner::User(7), 2, 0).unwrap();
        req.wsta(true).unwrap();
        req.assoc(1).unwrap();

        let mut seq = 0xFFFF;
        req.accept(RequestId(3), &mut seq);

        assert_eq!(req.state(), RequestState::Queued);
        assert_eq!(req.wsta(false), Err(CmdReqError::NotBuilding));
        assert_eq!(seq, 1);

        let seqs: std::vec::Vec<u16> = req
            .messages()
            .map(|m| u16::from_be_bytes([m[3], m[4]]))
            .collect();
        assert_eq!(seqs, [0xFFFF, 0]);
    }

    #[test]
    fn statuses_are_matched_once() {
        let mut req = CommandRequest::new(RequestOwner::Nvm, 2, 0).unwrap();
        req.nvmc(1, SendParam::Uint(0)).unwrap();
        req.nvmchk(0, 16).unwrap();
        let mut seq = 10;
        req.accept(RequestId(1), &mut seq);

        // Not in flight yet.
        assert_eq!(req.find(0x1400, 10), None);
        req.set_state(RequestState::InFlight);

        assert_eq!(req.find(0x1403, 11), Some(1));
        req.record_status(1, 5);
        assert_eq!(req.find(0x1403, 11), None);
        assert!(!req.all_statuses_received());

        req.record_status(0, 0);
        assert!(req.all_statuses_received());
        assert_eq!(req.num_errors(), 1);

        let source = req.source(1).unwrap();
        assert_eq!(source.command(), Some(CommandId::Nvmchk));
        assert_eq!(source.params.get(1).and_then(|e| e.as_uint()), Some(16));
    }
}
