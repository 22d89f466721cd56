use crate::cmd_req::RequestOwner;
use crate::commands::CommandId;
use crate::device::RequestEvent;
use crate::link::Link;
use crate::{Error, Fetch, MacAddress, Winc, WincEvents};

/// Names one association. Handles from an earlier association stay distinct
/// even if the network controller reuses its association id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AssocHandle {
    id: u16,
    generation: u16,
}

impl AssocHandle {
    /// The network controller’s id for the association.
    pub fn id(&self) -> u16 {
        self.id
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RssiQuery {
    /// Return the last known RSSI without asking the network controller.
    Cached,
    /// Ask the network controller; the answer arrives through
    /// [`WincEvents::on_rssi`].
    Refresh,
}

#[derive(Debug, Copy, Clone)]
struct AssocInfo {
    handle: AssocHandle,
    peer: Option<MacAddress>,
    rssi: Option<i8>,
}

#[derive(Default)]
pub(crate) struct AssocState {
    info: Option<AssocInfo>,
    connected: bool,
    generation: u16,
    rssi_pending: bool,
    peer_pending: bool,
}

impl AssocState {
    pub(crate) fn link_up(&mut self, id: u16, peer: Option<MacAddress>) -> AssocHandle {
        self.generation = self.generation.wrapping_add(1);

        let handle = AssocHandle {
            id,
            generation: self.generation,
        };

        self.info = Some(AssocInfo {
            handle,
            peer,
            rssi: None,
        });
        self.connected = true;
        self.rssi_pending = false;
        self.peer_pending = false;

        handle
    }

    pub(crate) fn link_down(&mut self) {
        self.connected = false;
        self.rssi_pending = false;
        self.peer_pending = false;
    }

    fn lookup(&mut self, handle: AssocHandle) -> Result<&mut AssocInfo, Error> {
        match self.info.as_mut() {
            None => Err(Error::NotConnected),
            Some(info) if info.handle != handle => Err(Error::RequestError),
            Some(info) => Ok(info),
        }
    }

    pub(crate) fn request_event<E: WincEvents + ?Sized>(
        &mut self,
        event: &RequestEvent<'_>,
        events: &mut E,
    ) {
        match event {
            RequestEvent::Response(rsp) if rsp.cmd_id == CommandId::Assoc as u16 => {
                let id = rsp.elems.get(0).and_then(|e| e.as_uint());
                let peer = rsp.elems.get(1).and_then(|e| e.as_mac());
                let rssi = rsp
                    .elems
                    .get(2)
                    .and_then(|e| e.as_int())
                    .map(|rssi| rssi.clamp(-128, 0) as i8);

                let info = match self.info.as_mut() {
                    Some(info) if self.connected && Some(info.handle.id as u32) == id => info,
                    _ => {
                        debug!("assoc response for a stale association");
                        return;
                    }
                };

                if let Some(peer) = peer {
                    info.peer = Some(peer);
                    if self.peer_pending {
                        self.peer_pending = false;
                        events.on_peer_address(info.handle, peer);
                    }
                }

                if let Some(rssi) = rssi {
                    info.rssi = Some(rssi);
                    if self.rssi_pending {
                        self.rssi_pending = false;
                        events.on_rssi(info.handle, rssi);
                    }
                }
            }

            RequestEvent::StatusComplete { num_errors, .. } => {
                if *num_errors > 0 {
                    warn!("assoc query failed");
                }
                // Whatever wasn’t answered by now won’t be.
                self.rssi_pending = false;
                self.peer_pending = false;
            }

            _ => {}
        }
    }
}

impl<L: Link> Winc<L> {
    /// The peer’s MAC address: cached, or asked for if the association is
    /// still up.
    pub fn assoc_peer_address(&mut self, handle: AssocHandle) -> Result<Fetch<MacAddress>, Error> {
        self.ensure_open()?;

        let connected = self.state.assoc.connected;
        let info = self.state.assoc.lookup(handle)?;

        if let Some(peer) = info.peer {
            return Ok(Fetch::Ready(peer));
        }

        if !connected {
            return Err(Error::RequestError);
        }

        self.send(RequestOwner::Assoc, 1, 0, |req| req.assoc(handle.id))?;
        self.state.assoc.peer_pending = true;

        Ok(Fetch::Pending)
    }

    pub fn assoc_rssi(&mut self, handle: AssocHandle, query: RssiQuery) -> Result<Fetch<i8>, Error> {
        self.ensure_open()?;

        let connected = self.state.assoc.connected;
        let info = self.state.assoc.lookup(handle)?;

        // Nothing is reported for a link that's down, cached or not.
        if !connected {
            return Err(Error::RequestError);
        }

        match query {
            RssiQuery::Cached => info.rssi.map(Fetch::Ready).ok_or(Error::RequestError),

            RssiQuery::Refresh => {
                if !self.state.assoc.rssi_pending {
                    self.send(RequestOwner::Assoc, 1, 0, |req| req.assoc(handle.id))?;
                    self.state.assoc.rssi_pending = true;
                }

                Ok(Fetch::Pending)
            }
        }
    }

    pub fn assoc_disconnect(&mut self, handle: AssocHandle) -> Result<(), Error> {
        self.ensure_open()?;

        let connected = self.state.assoc.connected;
        self.state.assoc.lookup(handle)?;

        if !connected {
            return Err(Error::RequestError);
        }

        self.send(RequestOwner::Sta, 1, 0, |req| req.wsta(false))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{AecId, SendParam};
    use crate::device::testing::MockLink;
    use crate::events::testing::{Event, Recorder};
    use crate::testing::make_winc;
    use crate::ConnectionState;

    const PEER: MacAddress = MacAddress([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);

    fn link_up(winc: &mut Winc<MockLink>, rec: &mut Recorder, id: u32) -> AssocHandle {
        winc.link().push_aec(
            AecId::StaLinkUp as u16,
            &[SendParam::Uint(id), SendParam::Mac(PEER), SendParam::Uint(6)],
        );
        winc.task(rec);

        match winc.sta_state() {
            ConnectionState::Connected(handle) => handle,
            other => panic!("not connected: {:?}", other),
        }
    }

    fn link_down(winc: &mut Winc<MockLink>, rec: &mut Recorder, id: u32) {
        winc.link()
            .push_aec(AecId::StaLinkDown as u16, &[SendParam::Uint(id)]);
        winc.task(rec);
    }

    #[test]
    fn rssi_follows_cache_and_connection_rules() {
        let mut winc = make_winc();
        let mut rec = Recorder::default();
        let handle = link_up(&mut winc, &mut rec, 1);

        // Nothing cached yet.
        assert_eq!(winc.assoc_rssi(handle, RssiQuery::Cached), Err(Error::RequestError));

        assert_eq!(winc.assoc_rssi(handle, RssiQuery::Refresh), Ok(Fetch::Pending));
        winc.task(&mut rec);

        let cmds = winc.link().take_sent();
        assert_eq!(cmds[0].id, CommandId::Assoc as u16);
        assert_eq!(cmds[0].uint(0), 1);

        winc.link().push_response(
            &cmds[0],
            &[SendParam::Uint(1), SendParam::Mac(PEER), SendParam::Int(-61)],
        );
        winc.link().push_status(&cmds[0], 0);
        winc.task(&mut rec);

        assert_eq!(rec.events.last(), Some(&Event::Rssi(handle, -61)));
        assert_eq!(winc.assoc_rssi(handle, RssiQuery::Cached), Ok(Fetch::Ready(-61)));

        link_down(&mut winc, &mut rec, 1);
        assert_eq!(winc.assoc_rssi(handle, RssiQuery::Cached), Err(Error::RequestError));
        assert_eq!(winc.assoc_rssi(handle, RssiQuery::Refresh), Err(Error::RequestError));
        assert!(winc.link().take_sent().is_empty());
    }

    #[test]
    fn rssi_is_clamped_to_range() {
        let mut winc = make_winc();
        let mut rec = Recorder::default();
        let handle = link_up(&mut winc, &mut rec, 3);

        for (reported, expected) in [(-300, -128), (12, 0), (-128, -128)] {
            assert_eq!(winc.assoc_rssi(handle, RssiQuery::Refresh), Ok(Fetch::Pending));
            winc.task(&mut rec);

            let cmds = winc.link().take_sent();
            winc.link().push_response(
                &cmds[0],
                &[SendParam::Uint(3), SendParam::Mac(PEER), SendParam::Int(reported)],
            );
            winc.link().push_status(&cmds[0], 0);
            winc.task(&mut rec);

            assert_eq!(rec.events.last(), Some(&Event::Rssi(handle, expected)));
        }
    }

    #[test]
    fn handles_are_checked() {
        let mut winc = make_winc();
        let mut rec = Recorder::default();

        let unknown = AssocHandle { id: 1, generation: 1 };
        assert_eq!(winc.assoc_rssi(unknown, RssiQuery::Cached), Err(Error::NotConnected));
        assert_eq!(winc.assoc_peer_address(unknown), Err(Error::NotConnected));

        let first = link_up(&mut winc, &mut rec, 1);
        link_down(&mut winc, &mut rec, 1);
        let second = link_up(&mut winc, &mut rec, 1);

        assert_ne!(first, second);
        assert_eq!(first.id(), second.id());
        assert_eq!(winc.assoc_rssi(first, RssiQuery::Refresh), Err(Error::RequestError));
        assert_eq!(winc.assoc_disconnect(first), Err(Error::RequestError));
        assert_eq!(winc.assoc_peer_address(second), Ok(Fetch::Ready(PEER)));
    }

    #[test]
    fn peer_address_is_queried_when_unknown() {
        let mut winc = make_winc();
        let mut rec = Recorder::default();

        winc.link()
            .push_aec(AecId::StaLinkUp as u16, &[SendParam::Uint(2)]);
        winc.task(&mut rec);
        let handle = match winc.sta_state() {
            ConnectionState::Connected(handle) => handle,
            other => panic!("not connected: {:?}", other),
        };

        assert_eq!(winc.assoc_peer_address(handle), Ok(Fetch::Pending));
        winc.task(&mut rec);

        let cmds = winc.link().take_sent();
        winc.link().push_response(
            &cmds[0],
            &[SendParam::Uint(2), SendParam::Mac(PEER), SendParam::Int(-40)],
        );
        winc.link().push_status(&cmds[0], 0);
        winc.task(&mut rec);

        assert_eq!(rec.events.last(), Some(&Event::PeerAddress(handle, PEER)));
        assert_eq!(winc.assoc_peer_address(handle), Ok(Fetch::Ready(PEER)));

        // The RSSI came along with it.
        assert_eq!(winc.assoc_rssi(handle, RssiQuery::Cached), Ok(Fetch::Ready(-40)));
    }

    #[test]
    fn disconnect_needs_a_live_association() {
        let mut winc = make_winc();
        let mut rec = Recorder::default();
        let handle = link_up(&mut winc, &mut rec, 1);

        assert_eq!(winc.assoc_disconnect(handle), Ok(()));
        winc.task(&mut rec);
        let cmds = winc.link().take_sent();
        assert_eq!(cmds[0].id, CommandId::Wsta as u16);
        assert_eq!(cmds[0].uint(0), 0);

        link_down(&mut winc, &mut rec, 1);
        assert_eq!(winc.assoc_disconnect(handle), Err(Error::RequestError));

        winc.close(&mut rec);
        assert_eq!(winc.assoc_disconnect(handle), Err(Error::NotOpen));
    }
}
