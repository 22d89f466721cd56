use heapless::String;
use serde::{Deserialize, Serialize};

use crate::cmd_req::RequestOwner;
use crate::commands::assoc::AssocState;
use crate::commands::{param, Aec, AecId, CommandId, SendParam};
use crate::device::RequestEvent;
use crate::link::Link;
use crate::{AssocHandle, Error, Winc, WincEvents};

/// Connect on whichever channel the BSS is found.
pub const CHANNEL_ANY: u8 = 255;

pub const SSID_MAX_LEN: usize = 32;
pub const PASSPHRASE_MAX_LEN: usize = 64;

/// The network to join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BssContext {
    pub ssid: String<SSID_MAX_LEN>,
    pub channel: u8,
}

impl BssContext {
    pub fn new(ssid: &str, channel: u8) -> Result<Self, Error> {
        if ssid.is_empty() || !is_valid_channel(channel) {
            return Err(Error::InvalidArg);
        }

        Ok(BssContext {
            ssid: String::try_from(ssid).map_err(|_| Error::InvalidArg)?,
            channel,
        })
    }
}

impl Default for BssContext {
    fn default() -> Self {
        BssContext {
            ssid: String::new(),
            channel: CHANNEL_ANY,
        }
    }
}

pub fn is_valid_channel(channel: u8) -> bool {
    (1..=13).contains(&channel) || channel == CHANNEL_ANY
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum AuthType {
    Open = 1,
    /// Accepted here so stored settings round-trip, but never connected
    /// with.
    Wep = 2,
    WpaWpa2Mixed = 3,
    Wpa2 = 4,
}

impl AuthType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AuthType::Open),
            2 => Some(AuthType::Wep),
            3 => Some(AuthType::WpaWpa2Mixed),
            4 => Some(AuthType::Wpa2),
            _ => None,
        }
    }
}

/// How to authenticate with the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub auth_type: AuthType,
    pub passphrase: String<PASSPHRASE_MAX_LEN>,
}

impl AuthContext {
    pub fn open() -> Self {
        AuthContext {
            auth_type: AuthType::Open,
            passphrase: String::new(),
        }
    }

    /// A WPA passphrase is 8 to 63 printable ASCII characters, or exactly 64
    /// hex digits. Open networks take no passphrase.
    pub fn new(auth_type: AuthType, passphrase: &str) -> Result<Self, Error> {
        let valid = match auth_type {
            AuthType::Open => passphrase.is_empty(),
            AuthType::Wep => true,
            AuthType::WpaWpa2Mixed | AuthType::Wpa2 => is_valid_passphrase(passphrase),
        };

        if !valid {
            return Err(Error::InvalidArg);
        }

        Ok(AuthContext {
            auth_type,
            passphrase: String::try_from(passphrase).map_err(|_| Error::InvalidArg)?,
        })
    }
}

impl Default for AuthContext {
    fn default() -> Self {
        AuthContext::open()
    }
}

fn is_valid_passphrase(passphrase: &str) -> bool {
    match passphrase.len() {
        8..=63 => passphrase.bytes().all(|b| (0x20..=0x7E).contains(&b)),
        64 => passphrase.bytes().all(|b| b.is_ascii_hexdigit()),
        _ => false,
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(AssocHandle),
}

pub(crate) struct StaState {
    state: ConnectionState,
}

impl Default for StaState {
    fn default() -> Self {
        StaState {
            state: ConnectionState::Disconnected,
        }
    }
}

impl StaState {
    fn change<E: WincEvents + ?Sized>(&mut self, state: ConnectionState, events: &mut E) {
        if self.state != state {
            self.state = state;
            events.on_connstate_changed(state);
        }
    }

    pub(crate) fn request_event<E: WincEvents + ?Sized>(
        &mut self,
        event: &RequestEvent<'_>,
        events: &mut E,
    ) {
        match event {
            RequestEvent::CmdStatus(status) if status.source.command() == Some(CommandId::Wsta) => {
                let connect = status.source.params.get(0).and_then(|e| e.as_bool());

                match (connect, status.is_ok()) {
                    (Some(true), false) => {
                        warn!("connect rejected: {}", status.status);
                        self.change(ConnectionState::Disconnected, events);
                    }
                    // Abandoning an attempt gets no link down.
                    (Some(false), true) if self.state == ConnectionState::Connecting => {
                        self.change(ConnectionState::Disconnected, events);
                    }
                    _ => {}
                }
            }

            RequestEvent::StatusComplete { num_errors, .. } => {
                if *num_errors > 0 && self.state == ConnectionState::Connecting {
                    self.change(ConnectionState::Disconnected, events);
                }
            }

            _ => {}
        }
    }

    pub(crate) fn aec<E: WincEvents + ?Sized>(
        &mut self,
        assoc: &mut AssocState,
        aec: &Aec<'_>,
        events: &mut E,
    ) {
        match aec.kind() {
            Some(AecId::StaLinkUp) => {
                let id = match aec.elems.get(0).and_then(|e| e.as_uint()) {
                    Some(id) => id as u16,
                    None => {
                        warn!("link up without association id");
                        return;
                    }
                };
                let peer = aec.elems.get(1).and_then(|e| e.as_mac());

                info!("station link up, association {}", id);
                let handle = assoc.link_up(id, peer);
                self.change(ConnectionState::Connected(handle), events);
            }

            Some(AecId::StaLinkDown) => {
                info!("station link down");
                assoc.link_down();
                self.change(ConnectionState::Disconnected, events);
            }

            Some(AecId::StaError) => {
                let code = aec.elems.get(0).and_then(|e| e.as_uint()).unwrap_or(0);
                warn!("station error {}", code);
                assoc.link_down();
                self.change(ConnectionState::Disconnected, events);
            }

            _ => {}
        }
    }
}

impl<L: Link> Winc<L> {
    pub fn sta_state(&self) -> ConnectionState {
        self.state.sta.state
    }

    /// Joins a network. Progress arrives through
    /// [`WincEvents::on_connstate_changed`].
    pub fn sta_connect(&mut self, bss: &BssContext, auth: &AuthContext) -> Result<(), Error> {
        self.ensure_open()?;

        if auth.auth_type == AuthType::Wep {
            return Err(Error::OperationNotSupported);
        }

        if bss.ssid.is_empty() || !is_valid_channel(bss.channel) {
            return Err(Error::InvalidArg);
        }

        if self.state.sta.state != ConnectionState::Disconnected {
            return Err(Error::RequestError);
        }

        let payload = bss.ssid.len() + auth.passphrase.len();
        self.send(RequestOwner::Sta, 5, payload, |req| {
            req.wstac(param::WSTAC_SSID, SendParam::Str(bss.ssid.as_str()))?;
            req.wstac(param::WSTAC_CHANNEL, SendParam::Uint(bss.channel as u32))?;
            req.wstac(param::WSTAC_SEC_TYPE, SendParam::Uint(auth.auth_type as u32))?;
            if auth.auth_type != AuthType::Open {
                req.wstac(param::WSTAC_CREDENTIALS, SendParam::Str(auth.passphrase.as_str()))?;
            }
            req.wsta(true)
        })?;

        self.state.sta.state = ConnectionState::Connecting;
        Ok(())
    }

    /// Leaves the network, or abandons a connection attempt.
    pub fn sta_disconnect(&mut self) -> Result<(), Error> {
        self.ensure_open()?;

        if self.state.sta.state == ConnectionState::Disconnected {
            return Err(Error::RequestError);
        }

        self.send(RequestOwner::Sta, 1, 0, |req| req.wsta(false))?;
        Ok(())
    }
}
