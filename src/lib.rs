//! This library drives WINC-class Wi-Fi/BLE network controllers from a host
//! microcontroller.
//!
//! The network controller takes batched command requests over a serial link
//! and answers each command with a status, sometimes a response, and now and
//! then an unsolicited asynchronous event (AEC). See the [`Winc`] struct.
//!
//! Nothing here blocks. Calls either return a cached value, or send a request
//! and return; results come back through [`WincEvents`] when the main loop
//! calls [`Winc::task`]. An interrupt handler only needs to set an
//! [`EventSignal`]:
//!
//! ```ignore
//! static SIGNAL: EventSignal = EventSignal::new();
//!
//! // In the network controller's interrupt handler:
//! SIGNAL.signal();
//!
//! // In the main loop:
//! if SIGNAL.take() {
//!     winc.task(&mut app);
//! }
//! ```
//!
//! Logging goes through `defmt` or `log`, picked with the feature of the same
//! name.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

mod chip_select;
pub mod cmd_req;
pub mod commands;
pub mod console;
pub mod device;
mod events;
pub mod link;
pub mod profile;
mod util;

use serde::{Deserialize, Serialize};

use cmd_req::{CmdReqError, CommandRequest, RequestId, RequestOwner};
use commands::{assoc::AssocState, ble::BleState, bss::BssState, nvm::NvmState, sta::StaState};
use device::Device;

pub use commands::{
    assoc::{AssocHandle, RssiQuery},
    bss::{BssInfo, MAX_SCAN_RESULTS},
    nvm::{CheckMode, CheckResult, CheckValue, NvmEvent, NvmGeometry, NvmOperation, NVM_MAX_CHUNK},
    sntp::SNTP_SERVER_MAX_LEN,
    sta::{AuthContext, AuthType, BssContext, ConnectionState, CHANNEL_ANY},
};
pub use events::WincEvents;
pub use link::{Link, SpiLink, SpiLinkError};
pub use util::signal::EventSignal;

/// Status codes for the public API.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The driver hasn’t been opened, or has been closed.
    NotOpen,
    /// An argument was out of range or malformed.
    InvalidArg,
    /// The request couldn’t be built or sent, the network controller rejected
    /// it, or another operation of the same kind is still outstanding.
    RequestError,
    /// There is no association to operate on.
    NotConnected,
    /// The network controller or this driver doesn’t do that.
    OperationNotSupported,
}

impl From<CmdReqError> for Error {
    fn from(err: CmdReqError) -> Self {
        debug!("request failed: {}", err as u8);
        Error::RequestError
    }
}

/// Outcome of a call that may have to ask the network controller.
#[must_use]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fetch<T> {
    /// The value was cached.
    Ready(T),
    /// A request is on its way; the value arrives through [`WincEvents`].
    Pending,
}

impl<T> Fetch<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Fetch::Ready(value) => Some(value),
            Fetch::Pending => None,
        }
    }
}

/// 48-bit IEEE MAC address.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MacAddress(pub [u8; 6]);

impl core::fmt::Display for MacAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}", a, b, c, d, e, g)
    }
}

impl core::str::FromStr for MacAddress {
    type Err = Error;

    /// Parses six colon-separated hex octets.
    fn from_str(s: &str) -> Result<Self, Error> {
        let mut mac = [0u8; 6];
        let mut octets = s.split(':');

        for byte in mac.iter_mut() {
            let octet = octets.next().ok_or(Error::InvalidArg)?;
            if octet.len() != 2 || !octet.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(Error::InvalidArg);
            }
            *byte = u8::from_str_radix(octet, 16).map_err(|_| Error::InvalidArg)?;
        }

        if octets.next().is_some() {
            return Err(Error::InvalidArg);
        }

        Ok(MacAddress(mac))
    }
}

/// Driver settings.
#[derive(Debug, Copy, Clone)]
pub struct Config {
    pub nvm_geometry: NvmGeometry,
    /// Most messages [`Winc::task`] reads from the link per call.
    pub rx_budget: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            nvm_geometry: NvmGeometry::default(),
            rx_budget: 8,
        }
    }
}

/// Per-instance state of every feature module.
pub(crate) struct State {
    pub(crate) nvm: NvmState,
    pub(crate) assoc: AssocState,
    pub(crate) sta: StaState,
    pub(crate) bss: BssState,
    pub(crate) ble: BleState,
    pub(crate) mac_address: Option<MacAddress>,
}

impl State {
    fn new(config: &Config) -> Self {
        State {
            nvm: NvmState::new(config.nvm_geometry),
            assoc: AssocState::default(),
            sta: StaState::default(),
            bss: BssState::default(),
            ble: BleState::default(),
            mac_address: None,
        }
    }

    fn reopened(&mut self, config: &Config) -> Self {
        State {
            nvm: self.nvm.reopened(config.nvm_geometry),
            ble: self.ble.reopened(),
            ..State::new(config)
        }
    }
}

/// Driver for one network controller.
///
/// Feature calls live in `impl` blocks alongside their modules: `nvm_*`,
/// `assoc_*`, `sta_*`, `bss_*`, `sntp_*` and `ble_*`. All of them return
/// `Error::NotOpen` until [`open`](Self::open) has been called.
///
/// Call [`task`](Self::task) whenever the link may have something for us;
/// every callback into [`WincEvents`] happens from inside it.
pub struct Winc<L: Link> {
    pub(crate) device: Device<L>,
    pub(crate) state: State,
    config: Config,
}

impl<L: Link> Winc<L> {
    /// Fails with `InvalidArg` if the NVM geometry is empty or larger than
    /// the 32-bit offset space.
    pub fn new(link: L, config: Config) -> Result<Self, Error> {
        if !config.nvm_geometry.is_valid() {
            return Err(Error::InvalidArg);
        }

        Ok(Winc {
            device: Device::new(link, config.rx_budget),
            state: State::new(&config),
            config,
        })
    }

    pub fn open(&mut self) {
        if !self.device.is_open() {
            info!("opening driver");
            self.device.open();
        }
    }

    /// Fails every outstanding request, reporting each through `events`, and
    /// forgets feature state. An initialised BLE stack stays initialised, and
    /// a finished [`nvm_read_into`](Self::nvm_read_into) buffer can still be
    /// taken back.
    pub fn close<E: WincEvents + ?Sized>(&mut self, events: &mut E) {
        info!("closing driver");
        self.device.close(&mut events::Dispatch {
            state: &mut self.state,
            events,
        });
        self.state = self.state.reopened(&self.config);
    }

    pub fn is_open(&self) -> bool {
        self.device.is_open()
    }

    /// Sends queued requests and dispatches whatever the network controller
    /// has sent.
    pub fn task<E: WincEvents + ?Sized>(&mut self, events: &mut E) {
        self.device.poll(&mut events::Dispatch {
            state: &mut self.state,
            events,
        });
    }

    /// Starts a request of the application’s own. Its events arrive through
    /// [`WincEvents::on_request_event`] with `tag`.
    pub fn request(
        &self,
        tag: u16,
        max_commands: usize,
        payload_len: usize,
    ) -> Result<CommandRequest, Error> {
        self.ensure_open()?;
        CommandRequest::new(RequestOwner::User(tag), max_commands, payload_len)
            .map_err(|_| Error::InvalidArg)
    }

    pub fn transmit(&mut self, req: CommandRequest) -> Result<RequestId, Error> {
        self.ensure_open()?;
        Ok(self.device.transmit(req)?)
    }

    /// Sets the station MAC address. It reads back from
    /// [`mac_address`](Self::mac_address) once the network controller has
    /// accepted it.
    pub fn mac_address_set(&mut self, mac: MacAddress) -> Result<(), Error> {
        self.ensure_open()?;
        self.send(RequestOwner::Wifi, 1, 0, |req| req.wific_mac_address(mac))?;
        Ok(())
    }

    pub fn mac_address(&self) -> Option<MacAddress> {
        self.state.mac_address
    }

    pub fn link(&mut self) -> &mut L {
        self.device.link()
    }

    pub fn release(self) -> L {
        self.device.release()
    }

    pub(crate) fn ensure_open(&self) -> Result<(), Error> {
        if self.device.is_open() {
            Ok(())
        } else {
            Err(Error::NotOpen)
        }
    }

    pub(crate) fn send(
        &mut self,
        owner: RequestOwner,
        max_commands: usize,
        payload_len: usize,
        build: impl FnOnce(&mut CommandRequest) -> Result<(), CmdReqError>,
    ) -> Result<RequestId, Error> {
        Ok(self
            .device
            .requests()
            .submit(owner, max_commands, payload_len, build)?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::device::testing::MockLink;
    use crate::{Config, Winc};

    pub fn make_winc() -> Winc<MockLink> {
        let mut winc = Winc::new(MockLink::default(), Config::default()).unwrap();
        winc.open();
        winc
    }
}
