use crate::cmd_req::RequestOwner;
use crate::commands::{param, SendParam};
use crate::device::RequestEvent;
use crate::link::Link;
use crate::{Error, Winc};

pub const SNTP_SERVER_MAX_LEN: usize = 64;

/// Settings are fire-and-forget; a rejection is only logged.
pub(crate) fn request_event(event: &RequestEvent<'_>) {
    if let RequestEvent::CmdStatus(status) = event {
        if !status.is_ok() {
            warn!("sntp setting rejected: {}", status.status);
        }
    }
}

impl<L: Link> Winc<L> {
    pub fn sntp_enable_set(&mut self, enable: bool) -> Result<(), Error> {
        self.sntp_set(param::SNTPC_ENABLED, SendParam::Bool(enable), 0)
    }

    /// A static server is used as given. Otherwise the address may be
    /// replaced by one learnt from DHCP.
    pub fn sntp_static_set(&mut self, use_static: bool) -> Result<(), Error> {
        self.sntp_set(param::SNTPC_STATIC, SendParam::Bool(use_static), 0)
    }

    /// Host name or dotted IPv4 address of the server.
    pub fn sntp_server_address_set(&mut self, address: &str) -> Result<(), Error> {
        self.ensure_open()?;

        if address.is_empty() || address.len() > SNTP_SERVER_MAX_LEN {
            return Err(Error::InvalidArg);
        }

        self.sntp_set(param::SNTPC_SVR_ADDR, SendParam::Str(address), address.len())
    }

    fn sntp_set(&mut self, id: u8, value: SendParam, payload_len: usize) -> Result<(), Error> {
        self.ensure_open()?;
        self.send(RequestOwner::Sntp, 1, payload_len, |req| req.sntpc(id, value))?;
        Ok(())
    }
}
