use crate::cmd_req::{RequestId, RequestOwner};
use crate::commands::{self, AecId, Aec};
use crate::device::{EventHandler, RequestEvent, Requests};
use crate::{AssocHandle, BssInfo, ConnectionState, NvmEvent, State};

/// Callbacks from [`Winc::task`](crate::Winc::task).
///
/// Every method has an empty default, so implement only what you need. `()`
/// ignores everything.
pub trait WincEvents {
    /// Progress of the outstanding NVM operation. Each operation ends with
    /// exactly one `Done` or `Failed`.
    fn on_nvm(&mut self, _event: NvmEvent<'_>) {}

    fn on_connstate_changed(&mut self, _state: ConnectionState) {}

    /// Reply to [`assoc_rssi`](crate::Winc::assoc_rssi) with
    /// [`RssiQuery::Refresh`](crate::RssiQuery::Refresh). Always in
    /// `-128..=0`.
    fn on_rssi(&mut self, _handle: AssocHandle, _rssi: i8) {}

    fn on_peer_address(&mut self, _handle: AssocHandle, _address: crate::MacAddress) {}

    fn on_scan_result(&mut self, _bss: &BssInfo) {}

    fn on_scan_done(&mut self, _num_bss: u8) {}

    /// BLE was stopped by the driver because starting it failed.
    fn on_ble_state(&mut self, _started: bool) {}

    /// Progress of a request made with [`Winc::request`](crate::Winc::request).
    fn on_request_event(&mut self, _tag: u16, _id: RequestId, _event: &RequestEvent<'_>) {}

    /// Every AEC, after the driver has handled it.
    fn on_aec(&mut self, _aec: &Aec<'_>) {}
}

impl WincEvents for () {}

/// Routes transport events to the feature modules, and from there to the
/// application.
pub(crate) struct Dispatch<'a, E: ?Sized> {
    pub(crate) state: &'a mut State,
    pub(crate) events: &'a mut E,
}

impl<'a, E: WincEvents + ?Sized> EventHandler for Dispatch<'a, E> {
    fn request_event(
        &mut self,
        requests: &mut Requests,
        owner: RequestOwner,
        id: RequestId,
        event: RequestEvent<'_>,
    ) {
        let state = &mut *self.state;

        match owner {
            RequestOwner::Nvm => state.nvm.request_event(requests, id, &event, self.events),
            RequestOwner::Assoc => state.assoc.request_event(&event, self.events),
            RequestOwner::Sta => state.sta.request_event(&event, self.events),
            RequestOwner::Bss => state.bss.request_event(&event, self.events),
            RequestOwner::Sntp => commands::sntp::request_event(&event),
            RequestOwner::Ble => state.ble.request_event(requests, &event, self.events),
            RequestOwner::Wifi => {
                if let RequestEvent::CmdStatus(status) = event {
                    if status.is_ok() {
                        state.mac_address = status.source.params.get(1).and_then(|e| e.as_mac());
                    }
                }
            }
            RequestOwner::User(tag) => self.events.on_request_event(tag, id, &event),
        }
    }

    fn aec(&mut self, _requests: &mut Requests, aec: &Aec<'_>) {
        let state = &mut *self.state;

        match aec.kind() {
            Some(AecId::StaLinkUp) | Some(AecId::StaLinkDown) | Some(AecId::StaError) => {
                state.sta.aec(&mut state.assoc, aec, self.events)
            }
            Some(AecId::ScanResult) | Some(AecId::ScanDone) => state.bss.aec(aec, self.events),
            Some(AecId::NvmErased) | Some(AecId::NvmCheck) | Some(AecId::NvmError) => {
                state.nvm.aec(aec, self.events)
            }
            None => trace!("unhandled aec {}", aec.id),
        }

        self.events.on_aec(aec);
    }
}
