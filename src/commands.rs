pub mod assoc;
pub mod ble;
pub mod bss;
pub mod nvm;
pub mod sntp;
pub mod sta;

use heapless::Vec;

use crate::cmd_req::{CmdReqError, CommandRequest};
use crate::MacAddress;

/// Every message starts with its type, a 16-bit command or event id and a
/// 16-bit sequence number, all big-endian.
pub const MSG_HEADER_LEN: usize = 5;
/// Request header: the common header plus the parameter count.
pub const REQ_HEADER_LEN: usize = MSG_HEADER_LEN + 1;
/// Response and AEC header: the common header, the response id and the
/// element count.
pub const RSP_HEADER_LEN: usize = MSG_HEADER_LEN + 3;
/// Status header: the common header and the 16-bit status.
pub const STATUS_LEN: usize = MSG_HEADER_LEN + 2;
/// Each parameter or element is a type byte and a 16-bit length before its
/// data.
pub const TLV_HEADER_LEN: usize = 3;
/// Responses carrying more elements than this are dropped.
pub const MAX_ELEMS: usize = 10;

/// Status value for a command the network controller accepted.
pub const STATUS_OK: u16 = 0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    Request = 0x01,
    Response = 0x02,
    Status = 0x03,
    /// Asynchronous event code. Sent by the network controller on its own,
    /// not in reply to a particular command.
    Aec = 0x04,
}

impl MsgType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(MsgType::Request),
            0x02 => Some(MsgType::Response),
            0x03 => Some(MsgType::Status),
            0x04 => Some(MsgType::Aec),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
/// Commands the driver sends to the network controller. The high byte of
/// each id is its module group.
pub enum CommandId {
    /// Sets a Wi-Fi configuration parameter, e.g. the station MAC address.
    Wific = 0x0100,
    /// Sets a station connection parameter: SSID, channel, security type or
    /// credentials.
    Wstac = 0x0A00,
    /// Connects (1) or disconnects (0) the station using the parameters set
    /// with `Wstac`.
    Wsta = 0x0A01,
    /// Queries an association. Responds with the association id, the peer
    /// address and the current RSSI.
    Assoc = 0x0B00,
    /// Sets a scan parameter.
    Wscnc = 0x0C00,
    /// Starts a scan. Results arrive as `ScanResult` AECs, followed by a
    /// single `ScanDone`.
    Wscn = 0x0C01,
    /// Sets an SNTP client parameter.
    Sntpc = 0x1100,
    /// Sets an NVM parameter, e.g. the check mode used by `Nvmchk`.
    Nvmc = 0x1400,
    /// Erases whole sectors. Completion is reported with an `NvmErased` AEC.
    Nvmer = 0x1401,
    /// Writes one chunk. Parameters are offset, length and data.
    Nvmwr = 0x1402,
    /// Checks a range. The CRC or hash arrives as an `NvmCheck` AEC.
    Nvmchk = 0x1403,
    /// Reads one chunk. Responds with offset, length and data.
    Nvmrd = 0x1404,
    /// Sets a BLE parameter, e.g. whether BLE is restricted.
    Blec = 0x1800,
    /// Initialises the BLE stack.
    Bleinit = 0x1801,
}

impl CommandId {
    pub fn from_u16(id: u16) -> Option<Self> {
        use CommandId::*;

        [
            Wific, Wstac, Wsta, Assoc, Wscnc, Wscn, Sntpc, Nvmc, Nvmer, Nvmwr, Nvmchk, Nvmrd, Blec,
            Bleinit,
        ]
        .iter()
        .copied()
        .find(|cmd| *cmd as u16 == id)
    }
}

impl From<CommandId> for u16 {
    fn from(cmd: CommandId) -> u16 {
        cmd as u16
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u16)]
/// Asynchronous event codes.
pub enum AecId {
    /// Station link is up. Elements: association id, BSSID, channel.
    StaLinkUp = 0x0A80,
    /// Station link is down. Elements: association id.
    StaLinkDown = 0x0A81,
    /// Station connection attempt failed. Elements: error code.
    StaError = 0x0A82,
    /// One scanned BSS. Elements: RSSI, security type, channel, BSSID, SSID.
    ScanResult = 0x0C80,
    /// Scan finished. Elements: number of BSSs found.
    ScanDone = 0x0C81,
    /// Sector erase finished.
    NvmErased = 0x1480,
    /// Check finished. Elements: offset, length, mode, CRC or hash.
    NvmCheck = 0x1481,
    /// An NVM operation failed on the device side.
    NvmError = 0x1482,
}

impl AecId {
    pub fn from_u16(id: u16) -> Option<Self> {
        use AecId::*;

        [
            StaLinkUp,
            StaLinkDown,
            StaError,
            ScanResult,
            ScanDone,
            NvmErased,
            NvmCheck,
            NvmError,
        ]
        .iter()
        .copied()
        .find(|aec| *aec as u16 == id)
    }
}

impl From<AecId> for u16 {
    fn from(aec: AecId) -> u16 {
        aec as u16
    }
}

/// Sub-parameter ids for the configuration commands (`Wific`, `Wstac`,
/// `Wscnc`, `Sntpc`, `Nvmc`, `Blec`). Each configuration command carries the
/// sub-parameter id followed by its value.
pub mod param {
    pub const WIFIC_MAC_ADDR: u8 = 1;

    pub const WSTAC_SSID: u8 = 1;
    pub const WSTAC_SEC_TYPE: u8 = 2;
    pub const WSTAC_CREDENTIALS: u8 = 3;
    pub const WSTAC_CHANNEL: u8 = 4;

    pub const WSCNC_CHANNEL: u8 = 1;

    pub const SNTPC_ENABLED: u8 = 1;
    pub const SNTPC_STATIC: u8 = 2;
    pub const SNTPC_SVR_ADDR: u8 = 3;

    pub const NVMC_CHECK_MODE: u8 = 1;

    pub const BLEC_RESTRICT: u8 = 1;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ParamType {
    Integer = 0x01,
    UnsignedInteger = 0x02,
    Bool = 0x03,
    String = 0x04,
    ByteArray = 0x05,
    MacAddress = 0x06,
}

impl From<ParamType> for u8 {
    fn from(ty: ParamType) -> u8 {
        ty as u8
    }
}

/// A command parameter, encoded as a TLV when the command is added to a
/// request.
#[derive(Debug, Copy, Clone)]
pub enum SendParam<'a> {
    /// Signed integer, sent in the narrowest of 1, 2 or 4 bytes.
    Int(i32),
    /// Unsigned integer, sent in the narrowest of 1, 2 or 4 bytes.
    Uint(u32),
    Bool(bool),
    Str(&'a str),
    Bytes(&'a [u8]),
    Mac(MacAddress),
}

impl<'a> SendParam<'a> {
    fn ty(&self) -> ParamType {
        match self {
            SendParam::Int(_) => ParamType::Integer,
            SendParam::Uint(_) => ParamType::UnsignedInteger,
            SendParam::Bool(_) => ParamType::Bool,
            SendParam::Str(_) => ParamType::String,
            SendParam::Bytes(_) => ParamType::ByteArray,
            SendParam::Mac(_) => ParamType::MacAddress,
        }
    }

    fn data_len(&self) -> usize {
        match *self {
            SendParam::Int(v) => {
                if i8::try_from(v).is_ok() {
                    1
                } else if i16::try_from(v).is_ok() {
                    2
                } else {
                    4
                }
            }
            SendParam::Uint(v) => {
                if v <= 0xFF {
                    1
                } else if v <= 0xFFFF {
                    2
                } else {
                    4
                }
            }
            SendParam::Bool(_) => 1,
            SendParam::Str(s) => s.len(),
            SendParam::Bytes(b) => b.len(),
            SendParam::Mac(_) => 6,
        }
    }

    /// Bytes this parameter takes up on the wire, TLV header included.
    pub fn encoded_len(&self) -> usize {
        TLV_HEADER_LEN + self.data_len()
    }

    pub(crate) fn write_to<const N: usize>(&self, out: &mut Vec<u8, N>) -> Result<(), CmdReqError> {
        let len = self.data_len();
        if len > u16::MAX as usize {
            return Err(CmdReqError::NoSpace);
        }

        let mut push = |bytes: &[u8]| out.extend_from_slice(bytes).map_err(|_| CmdReqError::NoSpace);

        push(&[self.ty().into()])?;
        push(&(len as u16).to_be_bytes())?;

        match *self {
            SendParam::Int(v) => {
                let bytes = v.to_be_bytes();
                push(&bytes[4 - len..])
            }
            SendParam::Uint(v) => {
                let bytes = v.to_be_bytes();
                push(&bytes[4 - len..])
            }
            SendParam::Bool(b) => push(&[b as u8]),
            SendParam::Str(s) => push(s.as_bytes()),
            SendParam::Bytes(b) => push(b),
            SendParam::Mac(mac) => push(&mac.0),
        }
    }
}

/// One parameter or element as received, still in wire form.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Elem<'a> {
    pub ty: u8,
    pub data: &'a [u8],
}

impl<'a> Elem<'a> {
    pub fn as_uint(&self) -> Option<u32> {
        match *self.data {
            [a] => Some(a as u32),
            [a, b] => Some(u16::from_be_bytes([a, b]) as u32),
            [a, b, c, d] => Some(u32::from_be_bytes([a, b, c, d])),
            _ => None,
        }
    }

    /// Reads the element as a signed integer, sign-extending narrow values.
    pub fn as_int(&self) -> Option<i32> {
        match *self.data {
            [a] => Some(a as i8 as i32),
            [a, b] => Some(i16::from_be_bytes([a, b]) as i32),
            [a, b, c, d] => Some(i32::from_be_bytes([a, b, c, d])),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self.data {
            [b] => Some(b != 0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        core::str::from_utf8(self.data).ok()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn as_mac(&self) -> Option<MacAddress> {
        <[u8; 6]>::try_from(self.data).ok().map(MacAddress)
    }
}

/// The TLV list of a request, response or AEC. Construction validates that
/// every element fits, so lookups never read past the message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Elements<'a> {
    count: u8,
    bytes: &'a [u8],
}

impl<'a> Elements<'a> {
    pub fn parse(count: u8, bytes: &'a [u8]) -> Option<Self> {
        let mut rest = bytes;

        for _ in 0..count {
            let (_, tail) = split_tlv(rest)?;
            rest = tail;
        }

        Some(Elements { count, bytes })
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, idx: usize) -> Option<Elem<'a>> {
        self.iter().nth(idx)
    }

    pub fn iter(&self) -> ElementsIter<'a> {
        ElementsIter {
            remaining: self.count,
            bytes: self.bytes,
        }
    }
}

impl<'a> IntoIterator for Elements<'a> {
    type Item = Elem<'a>;
    type IntoIter = ElementsIter<'a>;

    fn into_iter(self) -> ElementsIter<'a> {
        self.iter()
    }
}

pub struct ElementsIter<'a> {
    remaining: u8,
    bytes: &'a [u8],
}

impl<'a> Iterator for ElementsIter<'a> {
    type Item = Elem<'a>;

    fn next(&mut self) -> Option<Elem<'a>> {
        if self.remaining == 0 {
            return None;
        }

        let (elem, rest) = split_tlv(self.bytes)?;
        self.remaining -= 1;
        self.bytes = rest;
        Some(elem)
    }
}

fn split_tlv(bytes: &[u8]) -> Option<(Elem<'_>, &[u8])> {
    if bytes.len() < TLV_HEADER_LEN {
        return None;
    }

    let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
    let end = TLV_HEADER_LEN + len;
    if bytes.len() < end {
        return None;
    }

    Some((
        Elem {
            ty: bytes[0],
            data: &bytes[TLV_HEADER_LEN..end],
        },
        &bytes[end..],
    ))
}

/// Asynchronous event as received from the network controller.
#[derive(Debug, Copy, Clone)]
pub struct Aec<'a> {
    pub id: u16,
    pub elems: Elements<'a>,
}

impl<'a> Aec<'a> {
    pub fn kind(&self) -> Option<AecId> {
        AecId::from_u16(self.id)
    }
}

/// A decoded message from the network controller.
#[derive(Debug, Copy, Clone)]
pub enum Message<'a> {
    Status {
        id: u16,
        seq: u16,
        status: u16,
    },
    Response {
        id: u16,
        seq: u16,
        rsp_id: u16,
        elems: Elements<'a>,
    },
    Aec(Aec<'a>),
}

impl<'a> Message<'a> {
    /// Decodes one message. Returns `None` for anything truncated, of an
    /// unknown type, or carrying more than [`MAX_ELEMS`] elements.
    pub fn parse(msg: &'a [u8]) -> Option<Self> {
        if msg.len() < MSG_HEADER_LEN {
            return None;
        }

        let ty = MsgType::from_u8(msg[0])?;
        let id = u16::from_be_bytes([msg[1], msg[2]]);
        let seq = u16::from_be_bytes([msg[3], msg[4]]);

        match ty {
            MsgType::Status => {
                if msg.len() < STATUS_LEN {
                    return None;
                }

                Some(Message::Status {
                    id,
                    seq,
                    status: u16::from_be_bytes([msg[5], msg[6]]),
                })
            }

            MsgType::Response | MsgType::Aec => {
                if msg.len() < RSP_HEADER_LEN {
                    return None;
                }

                let rsp_id = u16::from_be_bytes([msg[5], msg[6]]);
                let count = msg[7];
                if count as usize > MAX_ELEMS {
                    return None;
                }

                let elems = Elements::parse(count, &msg[RSP_HEADER_LEN..])?;

                if ty == MsgType::Aec {
                    Some(Message::Aec(Aec { id: rsp_id, elems }))
                } else {
                    Some(Message::Response {
                        id,
                        seq,
                        rsp_id,
                        elems,
                    })
                }
            }

            // The network controller never sends requests to the host.
            MsgType::Request => None,
        }
    }
}

/// Splits an encoded request message into its command id, sequence number
/// and parameters.
pub(crate) fn parse_request(msg: &[u8]) -> Option<(u16, u16, Elements<'_>)> {
    if msg.len() < REQ_HEADER_LEN || msg[0] != MsgType::Request as u8 {
        return None;
    }

    let id = u16::from_be_bytes([msg[1], msg[2]]);
    let seq = u16::from_be_bytes([msg[3], msg[4]]);
    let elems = Elements::parse(msg[5], &msg[REQ_HEADER_LEN..])?;

    Some((id, seq, elems))
}

/// One encoder per command. Each appends a single command to the request.
impl CommandRequest {
    pub fn wific_mac_address(&mut self, mac: MacAddress) -> Result<(), CmdReqError> {
        self.push_command(
            CommandId::Wific,
            &[SendParam::Uint(param::WIFIC_MAC_ADDR as u32), SendParam::Mac(mac)],
        )
    }

    pub fn wstac(&mut self, id: u8, value: SendParam) -> Result<(), CmdReqError> {
        self.push_command(CommandId::Wstac, &[SendParam::Uint(id as u32), value])
    }

    pub fn wsta(&mut self, connect: bool) -> Result<(), CmdReqError> {
        self.push_command(CommandId::Wsta, &[SendParam::Uint(connect as u32)])
    }

    pub fn assoc(&mut self, assoc_id: u16) -> Result<(), CmdReqError> {
        self.push_command(CommandId::Assoc, &[SendParam::Uint(assoc_id as u32)])
    }

    pub fn wscnc(&mut self, id: u8, value: SendParam) -> Result<(), CmdReqError> {
        self.push_command(CommandId::Wscnc, &[SendParam::Uint(id as u32), value])
    }

    pub fn wscn(&mut self, active: bool) -> Result<(), CmdReqError> {
        self.push_command(CommandId::Wscn, &[SendParam::Uint(active as u32)])
    }

    pub fn sntpc(&mut self, id: u8, value: SendParam) -> Result<(), CmdReqError> {
        self.push_command(CommandId::Sntpc, &[SendParam::Uint(id as u32), value])
    }

    pub fn nvmc(&mut self, id: u8, value: SendParam) -> Result<(), CmdReqError> {
        self.push_command(CommandId::Nvmc, &[SendParam::Uint(id as u32), value])
    }

    pub fn nvmer(&mut self, start_sector: u8, num_sectors: u8) -> Result<(), CmdReqError> {
        self.push_command(
            CommandId::Nvmer,
            &[
                SendParam::Uint(start_sector as u32),
                SendParam::Uint(num_sectors as u32),
            ],
        )
    }

    pub fn nvmwr(&mut self, offset: u32, data: &[u8]) -> Result<(), CmdReqError> {
        self.push_command(
            CommandId::Nvmwr,
            &[
                SendParam::Uint(offset),
                SendParam::Uint(data.len() as u32),
                SendParam::Bytes(data),
            ],
        )
    }

    pub fn nvmchk(&mut self, offset: u32, length: u32) -> Result<(), CmdReqError> {
        self.push_command(
            CommandId::Nvmchk,
            &[SendParam::Uint(offset), SendParam::Uint(length)],
        )
    }

    pub fn nvmrd(&mut self, offset: u32, length: u32) -> Result<(), CmdReqError> {
        self.push_command(
            CommandId::Nvmrd,
            &[SendParam::Uint(offset), SendParam::Uint(length)],
        )
    }

    pub fn blec(&mut self, id: u8, value: SendParam) -> Result<(), CmdReqError> {
        self.push_command(CommandId::Blec, &[SendParam::Uint(id as u32), value])
    }

    pub fn bleinit(&mut self) -> Result<(), CmdReqError> {
        self.push_command(CommandId::Bleinit, &[])
    }
}
