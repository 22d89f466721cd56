use crate::cmd_req::{RequestId, RequestOwner};
use crate::commands::{param, Aec, AecId, CommandId, SendParam};
use crate::device::{RequestEvent, Requests};
use crate::link::Link;
use crate::{Error, Winc, WincEvents};

/// Largest chunk sent in one write or read command.
pub const NVM_MAX_CHUNK: u32 = 512;

/// Layout of the network controller’s user NVM area. Offsets passed to the
/// `nvm_*` calls are relative to its start.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NvmGeometry {
    pub sector_size: u32,
    pub num_sectors: u8,
}

impl NvmGeometry {
    pub fn size(&self) -> u32 {
        self.sector_size.saturating_mul(self.num_sectors as u32)
    }

    /// At least one non-empty sector, and every offset fits in a `u32`.
    pub fn is_valid(&self) -> bool {
        self.sector_size != 0
            && self.num_sectors != 0
            && self.sector_size.checked_mul(self.num_sectors as u32).is_some()
    }

    fn contains(&self, offset: u32, length: u32) -> bool {
        match offset.checked_add(length) {
            Some(end) => end <= self.size(),
            None => false,
        }
    }
}

impl Default for NvmGeometry {
    fn default() -> Self {
        NvmGeometry {
            sector_size: 4096,
            num_sectors: 64,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvmOperation {
    Erase,
    Write,
    Read,
    Check,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CheckMode {
    Crc16 = 0,
    Sha1 = 1,
    Sha224 = 2,
    Sha256 = 3,
    Sha384 = 4,
    Sha512 = 5,
}

impl CheckMode {
    pub fn from_u8(mode: u8) -> Option<Self> {
        match mode {
            0 => Some(CheckMode::Crc16),
            1 => Some(CheckMode::Sha1),
            2 => Some(CheckMode::Sha224),
            3 => Some(CheckMode::Sha256),
            4 => Some(CheckMode::Sha384),
            5 => Some(CheckMode::Sha512),
            _ => None,
        }
    }

    /// Length of the digest in bytes.
    pub fn digest_len(self) -> usize {
        match self {
            CheckMode::Crc16 => 2,
            CheckMode::Sha1 => 20,
            CheckMode::Sha224 => 28,
            CheckMode::Sha256 => 32,
            CheckMode::Sha384 => 48,
            CheckMode::Sha512 => 64,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CheckValue<'a> {
    Crc16(u16),
    Hash(&'a [u8]),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CheckResult<'a> {
    pub offset: u32,
    pub length: u32,
    pub mode: CheckMode,
    pub value: CheckValue<'a>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NvmEvent<'a> {
    /// One chunk of an [`nvm_read`](crate::Winc::nvm_read). Chunks arrive in
    /// order and together cover the requested range.
    ReadChunk { offset: u32, data: &'a [u8] },
    /// The whole range of an [`nvm_read_into`](crate::Winc::nvm_read_into),
    /// once its last chunk has landed. Followed by `Done(Read)`.
    ReadComplete { offset: u32, data: &'a [u8] },
    /// Result of an [`nvm_check`](crate::Winc::nvm_check), followed by
    /// `Done(Check)`.
    Checked(CheckResult<'a>),
    Done(NvmOperation),
    Failed(NvmOperation),
}

pub(crate) struct NvmState {
    geometry: NvmGeometry,
    operation: Option<NvmOperation>,
    /// The request whose events move the operation along. Events from older
    /// requests of the same operation are ignored.
    current: Option<RequestId>,
    source: &'static [u8],
    /// Destination of a buffered read. Chunks land at their offset from
    /// `start`.
    sink: Option<&'static mut [u8]>,
    /// A finished read's buffer, until the caller takes it back.
    returned: Option<&'static mut [u8]>,
    /// Where the operation began.
    start: u32,
    /// Next offset, relative to the start of the NVM area.
    offset: u32,
    /// Bytes still to write or read.
    remaining: u32,
    /// Index into `source` of the next byte to write.
    position: usize,
}

impl NvmState {
    pub(crate) fn new(geometry: NvmGeometry) -> Self {
        NvmState {
            geometry,
            operation: None,
            current: None,
            source: &[],
            sink: None,
            returned: None,
            start: 0,
            offset: 0,
            remaining: 0,
            position: 0,
        }
    }

    /// State for the next open. A finished read's buffer can still be taken
    /// back.
    pub(crate) fn reopened(&mut self, geometry: NvmGeometry) -> Self {
        NvmState {
            returned: self.returned.take(),
            ..NvmState::new(geometry)
        }
    }

    /// Writes never cross a sector boundary.
    fn write_chunk_len(&self, offset: u32, remaining: u32) -> u32 {
        let to_boundary = match offset.checked_rem(self.geometry.sector_size) {
            Some(into_sector) => self.geometry.sector_size - into_sector,
            None => u32::MAX,
        };

        remaining.min(NVM_MAX_CHUNK).min(to_boundary)
    }

    fn read_chunk_len(&self, remaining: u32) -> u32 {
        remaining.min(NVM_MAX_CHUNK)
    }

    fn begin(&mut self, operation: NvmOperation, id: RequestId, offset: u32, length: u32) {
        self.operation = Some(operation);
        self.current = Some(id);
        self.start = offset;
        self.offset = offset;
        self.remaining = length;
        self.position = 0;
    }

    fn finish<E: WincEvents + ?Sized>(&mut self, events: &mut E, event: NvmEvent<'_>) {
        self.operation = None;
        self.current = None;
        self.source = &[];

        if let Some(sink) = self.sink.take() {
            if matches!(event, NvmEvent::Done(NvmOperation::Read)) {
                events.on_nvm(NvmEvent::ReadComplete {
                    offset: self.start,
                    data: &*sink,
                });
            }
            self.returned = Some(sink);
        }

        events.on_nvm(event);
    }

    /// Copies a chunk into the buffered read's destination. `false` if the
    /// chunk falls outside it.
    fn store(&mut self, offset: u32, data: &[u8]) -> bool {
        let sink = match self.sink.as_deref_mut() {
            Some(sink) => sink,
            None => return false,
        };

        let at = match offset.checked_sub(self.start) {
            Some(at) => at as usize,
            None => return false,
        };
        let end = match at.checked_add(data.len()) {
            Some(end) => end,
            None => return false,
        };

        match sink.get_mut(at..end) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    fn submit_write(&mut self, requests: &mut Requests) -> Result<RequestId, Error> {
        let len = self.write_chunk_len(self.offset, self.remaining) as usize;
        let data = self
            .source
            .get(self.position..self.position + len)
            .ok_or(Error::InvalidArg)?;
        let offset = self.offset;

        Ok(requests.submit(RequestOwner::Nvm, 1, len, |req| req.nvmwr(offset, data))?)
    }

    fn submit_read(&mut self, requests: &mut Requests) -> Result<RequestId, Error> {
        let len = self.read_chunk_len(self.remaining);
        let offset = self.offset;

        Ok(requests.submit(RequestOwner::Nvm, 1, 0, |req| req.nvmrd(offset, len))?)
    }

    /// Moves a write or read past the `done` bytes that just completed, then
    /// sends the next chunk or finishes.
    fn advance<E: WincEvents + ?Sized>(
        &mut self,
        requests: &mut Requests,
        operation: NvmOperation,
        done: u32,
        events: &mut E,
    ) {
        if done == 0 || done > self.remaining {
            warn!("nvm chunk of {} bytes with {} remaining", done, self.remaining);
            self.finish(events, NvmEvent::Failed(operation));
            return;
        }

        self.offset += done;
        self.position += done as usize;
        self.remaining -= done;

        if self.remaining == 0 {
            self.finish(events, NvmEvent::Done(operation));
            return;
        }

        let next = match operation {
            NvmOperation::Write => self.submit_write(requests),
            _ => self.submit_read(requests),
        };

        match next {
            Ok(id) => self.current = Some(id),
            Err(_) => self.finish(events, NvmEvent::Failed(operation)),
        }
    }

    pub(crate) fn request_event<E: WincEvents + ?Sized>(
        &mut self,
        requests: &mut Requests,
        id: RequestId,
        event: &RequestEvent<'_>,
        events: &mut E,
    ) {
        let operation = match self.operation {
            Some(operation) if self.current == Some(id) => operation,
            _ => return,
        };

        match event {
            RequestEvent::TxComplete => {}

            RequestEvent::CmdStatus(status) => {
                if !status.is_ok() {
                    warn!("nvm command {} failed: {}", status.cmd_id, status.status);
                    self.finish(events, NvmEvent::Failed(operation));
                    return;
                }

                if operation == NvmOperation::Write
                    && status.source.command() == Some(CommandId::Nvmwr)
                {
                    // The chunk length is whatever the command asked for.
                    let written = status
                        .source
                        .params
                        .get(1)
                        .and_then(|e| e.as_uint())
                        .unwrap_or(0);

                    self.advance(requests, operation, written, events);
                }
            }

            RequestEvent::Response(rsp) => {
                if operation != NvmOperation::Read || rsp.cmd_id != CommandId::Nvmrd as u16 {
                    return;
                }

                let offset = rsp.elems.get(0).and_then(|e| e.as_uint());
                let data = rsp.elems.get(2).map(|e| e.as_bytes());

                match (offset, data) {
                    (Some(offset), Some(data)) => {
                        if self.sink.is_none() {
                            events.on_nvm(NvmEvent::ReadChunk { offset, data });
                        } else if !self.store(offset, data) {
                            warn!("nvm read chunk at {} outside the buffer", offset);
                            self.finish(events, NvmEvent::Failed(operation));
                            return;
                        }
                        self.advance(requests, operation, data.len() as u32, events);
                    }
                    _ => {
                        warn!("malformed nvm read response");
                        self.finish(events, NvmEvent::Failed(operation));
                    }
                }
            }

            RequestEvent::StatusComplete { num_errors, .. } => {
                // Flushed without ever seeing a status.
                if *num_errors > 0 {
                    self.finish(events, NvmEvent::Failed(operation));
                }
            }
        }
    }

    pub(crate) fn aec<E: WincEvents + ?Sized>(&mut self, aec: &Aec<'_>, events: &mut E) {
        let operation = match self.operation {
            Some(operation) => operation,
            None => {
                debug!("nvm aec {} with nothing in progress", aec.id);
                return;
            }
        };

        match (aec.kind(), operation) {
            (Some(AecId::NvmError), _) => {
                warn!("nvm error aec");
                self.finish(events, NvmEvent::Failed(operation));
            }

            (Some(AecId::NvmErased), NvmOperation::Erase) => {
                self.finish(events, NvmEvent::Done(NvmOperation::Erase));
            }

            (Some(AecId::NvmCheck), NvmOperation::Check) => match parse_check(aec) {
                Some(result) => {
                    events.on_nvm(NvmEvent::Checked(result));
                    self.finish(events, NvmEvent::Done(NvmOperation::Check));
                }
                None => {
                    warn!("malformed nvm check aec");
                    self.finish(events, NvmEvent::Failed(NvmOperation::Check));
                }
            },

            _ => debug!("nvm aec {} doesn't match operation", aec.id),
        }
    }
}

fn parse_check<'a>(aec: &Aec<'a>) -> Option<CheckResult<'a>> {
    if aec.elems.len() != 4 {
        return None;
    }

    let offset = aec.elems.get(0)?.as_uint()?;
    let length = aec.elems.get(1)?.as_uint()?;
    let mode = CheckMode::from_u8(aec.elems.get(2)?.as_uint()? as u8)?;
    let value = aec.elems.get(3)?;

    let value = match mode {
        CheckMode::Crc16 => CheckValue::Crc16(value.as_uint()? as u16),
        _ if value.data.len() == mode.digest_len() => CheckValue::Hash(value.as_bytes()),
        _ => return None,
    };

    Some(CheckResult {
        offset,
        length,
        mode,
        value,
    })
}

impl<L: Link> Winc<L> {
    pub fn nvm_geometry(&self) -> NvmGeometry {
        self.state.nvm.geometry
    }

    pub fn nvm_is_busy(&self) -> bool {
        self.state.nvm.operation.is_some()
    }

    /// Only one NVM operation runs at a time.
    fn nvm_ready(&self) -> Result<(), Error> {
        self.ensure_open()?;

        if self.nvm_is_busy() {
            return Err(Error::RequestError);
        }

        Ok(())
    }

    /// Erases `num_sectors` whole sectors starting at `start_sector`.
    pub fn nvm_erase_sector(&mut self, start_sector: u8, num_sectors: u8) -> Result<(), Error> {
        self.nvm_ready()?;

        let geometry = self.state.nvm.geometry;
        if num_sectors == 0 || start_sector as u32 + num_sectors as u32 > geometry.num_sectors as u32 {
            return Err(Error::InvalidArg);
        }

        let id = self.send(RequestOwner::Nvm, 1, 0, |req| {
            req.nvmer(start_sector, num_sectors)
        })?;

        // Erase finishes on an AEC, so there's no range to track.
        self.state.nvm.begin(NvmOperation::Erase, id, 0, 0);

        Ok(())
    }

    /// Writes `data` at `offset`. The data has to stay put until the write is
    /// `Done`, since later chunks are read from it as earlier ones complete.
    /// The target range must already be erased.
    pub fn nvm_write(&mut self, offset: u32, data: &'static [u8]) -> Result<(), Error> {
        self.nvm_ready()?;

        let length = u32::try_from(data.len()).map_err(|_| Error::InvalidArg)?;
        if length == 0 || !self.state.nvm.geometry.contains(offset, length) {
            return Err(Error::InvalidArg);
        }

        let nvm = &mut self.state.nvm;
        nvm.source = data;
        nvm.offset = offset;
        nvm.remaining = length;
        nvm.position = 0;

        match nvm.submit_write(self.device.requests()) {
            Ok(id) => {
                nvm.begin(NvmOperation::Write, id, offset, length);
                Ok(())
            }
            Err(err) => {
                nvm.source = &[];
                Err(err)
            }
        }
    }

    /// Reads `length` bytes from `offset`, delivered as
    /// [`NvmEvent::ReadChunk`]s.
    pub fn nvm_read(&mut self, offset: u32, length: u32) -> Result<(), Error> {
        self.nvm_start_read(offset, length)
    }

    /// Reads `buf.len()` bytes from `offset` into `buf`, reported once as
    /// [`NvmEvent::ReadComplete`] when the last chunk has landed. Get the
    /// buffer back afterwards with
    /// [`nvm_take_read_buffer`](Self::nvm_take_read_buffer). If the read
    /// can't start, the buffer comes straight back with the error.
    pub fn nvm_read_into(
        &mut self,
        offset: u32,
        buf: &'static mut [u8],
    ) -> Result<(), (Error, &'static mut [u8])> {
        let length = match u32::try_from(buf.len()) {
            Ok(length) => length,
            Err(_) => return Err((Error::InvalidArg, buf)),
        };

        match self.nvm_start_read(offset, length) {
            Ok(()) => {
                self.state.nvm.sink = Some(buf);
                Ok(())
            }
            Err(err) => Err((err, buf)),
        }
    }

    /// The buffer of the last [`nvm_read_into`](Self::nvm_read_into), once it
    /// is `Done` or `Failed`. It stays claimable across
    /// [`close`](Self::close).
    pub fn nvm_take_read_buffer(&mut self) -> Option<&'static mut [u8]> {
        self.state.nvm.returned.take()
    }

    fn nvm_start_read(&mut self, offset: u32, length: u32) -> Result<(), Error> {
        self.nvm_ready()?;

        if length == 0 || !self.state.nvm.geometry.contains(offset, length) {
            return Err(Error::InvalidArg);
        }

        let nvm = &mut self.state.nvm;
        nvm.offset = offset;
        nvm.remaining = length;

        let id = nvm.submit_read(self.device.requests())?;
        nvm.begin(NvmOperation::Read, id, offset, length);

        Ok(())
    }

    /// Asks the network controller for a CRC or hash over a range.
    pub fn nvm_check(&mut self, offset: u32, length: u32, mode: CheckMode) -> Result<(), Error> {
        self.nvm_ready()?;

        if length == 0 || !self.state.nvm.geometry.contains(offset, length) {
            return Err(Error::InvalidArg);
        }

        let id = self.send(RequestOwner::Nvm, 2, 0, |req| {
            req.nvmc(param::NVMC_CHECK_MODE, SendParam::Uint(mode as u32))?;
            req.nvmchk(offset, length)
        })?;

        self.state.nvm.begin(NvmOperation::Check, id, offset, length);

        Ok(())
    }
}
