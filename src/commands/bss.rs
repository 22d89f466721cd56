use heapless::{String, Vec};

use crate::cmd_req::RequestOwner;
use crate::commands::sta::{is_valid_channel, SSID_MAX_LEN};
use crate::commands::{param, Aec, AecId, SendParam};
use crate::device::RequestEvent;
use crate::link::Link;
use crate::{AuthType, Error, MacAddress, Winc, WincEvents};

/// Results kept from one scan. Later ones are still reported, just not kept.
pub const MAX_SCAN_RESULTS: usize = 16;

/// One network found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BssInfo {
    pub ssid: String<SSID_MAX_LEN>,
    pub bssid: MacAddress,
    pub channel: u8,
    pub rssi: i8,
    /// `None` for security types this driver doesn’t know.
    pub auth_type: Option<AuthType>,
}

impl BssInfo {
    fn parse(aec: &Aec<'_>) -> Option<Self> {
        let rssi = aec.elems.get(0)?.as_int()?.clamp(-128, 0) as i8;
        let sec_type = aec.elems.get(1)?.as_uint()?;
        let channel = aec.elems.get(2)?.as_uint()? as u8;
        let bssid = aec.elems.get(3)?.as_mac()?;

        // Hidden networks come with an empty SSID.
        let ssid = match aec.elems.get(4) {
            Some(elem) => String::try_from(elem.as_str()?).ok()?,
            None => String::new(),
        };

        Some(BssInfo {
            ssid,
            bssid,
            channel,
            rssi,
            auth_type: AuthType::from_u8(sec_type as u8),
        })
    }
}

#[derive(Default)]
pub(crate) struct BssState {
    results: Vec<BssInfo, MAX_SCAN_RESULTS>,
    scanning: bool,
}

impl BssState {
    fn finish<E: WincEvents + ?Sized>(&mut self, num_bss: u8, events: &mut E) {
        self.scanning = false;
        events.on_scan_done(num_bss);
    }

    pub(crate) fn request_event<E: WincEvents + ?Sized>(
        &mut self,
        event: &RequestEvent<'_>,
        events: &mut E,
    ) {
        if let RequestEvent::StatusComplete { num_errors, .. } = event {
            if *num_errors > 0 && self.scanning {
                warn!("scan request failed");
                self.finish(self.results.len() as u8, events);
            }
        }
    }

    pub(crate) fn aec<E: WincEvents + ?Sized>(&mut self, aec: &Aec<'_>, events: &mut E) {
        if !self.scanning {
            debug!("scan aec {} while not scanning", aec.id);
            return;
        }

        match aec.kind() {
            Some(AecId::ScanResult) => {
                let bss = match BssInfo::parse(aec) {
                    Some(bss) => bss,
                    None => {
                        warn!("malformed scan result");
                        return;
                    }
                };

                events.on_scan_result(&bss);

                if self.results.push(bss).is_err() {
                    debug!("scan result list full");
                }
            }

            Some(AecId::ScanDone) => {
                let num_bss = aec
                    .elems
                    .get(0)
                    .and_then(|e| e.as_uint())
                    .unwrap_or(self.results.len() as u32);

                self.finish(num_bss.min(u8::MAX as u32) as u8, events);
            }

            _ => {}
        }
    }
}

impl<L: Link> Winc<L> {
    /// Scans one channel, or every channel with
    /// [`CHANNEL_ANY`](crate::CHANNEL_ANY). Active scans send probe
    /// requests; passive ones only listen for beacons.
    pub fn bss_scan_start(&mut self, channel: u8, active: bool) -> Result<(), Error> {
        self.ensure_open()?;

        if !is_valid_channel(channel) {
            return Err(Error::InvalidArg);
        }

        if self.state.bss.scanning {
            return Err(Error::RequestError);
        }

        self.send(RequestOwner::Bss, 2, 0, |req| {
            req.wscnc(param::WSCNC_CHANNEL, SendParam::Uint(channel as u32))?;
            req.wscn(active)
        })?;

        self.state.bss.results.clear();
        self.state.bss.scanning = true;

        Ok(())
    }

    pub fn bss_is_scanning(&self) -> bool {
        self.state.bss.scanning
    }

    /// Networks found by the current or last scan.
    pub fn bss_results(&self) -> &[BssInfo] {
        &self.state.bss.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandId;
    use crate::device::testing::MockLink;
    use crate::events::testing::{Event, Recorder};
    use crate::testing::make_winc;

    fn push_result(winc: &mut Winc<MockLink>, ssid: &str, channel: u32, last_octet: u8) {
        winc.link().push_aec(
            AecId::ScanResult as u16,
            &[
                SendParam::Int(-55),
                SendParam::Uint(AuthType::Wpa2 as u32),
                SendParam::Uint(channel),
                SendParam::Mac(MacAddress([2, 0, 0, 0, 0, last_octet])),
                SendParam::Str(ssid),
            ],
        );
    }

    #[test]
    fn scan_collects_results_until_done() {
        let mut winc = make_winc();
        let mut rec = Recorder::default();

        winc.bss_scan_start(6, true).unwrap();
        assert_eq!(winc.bss_scan_start(6, true), Err(Error::RequestError));
        winc.task(&mut rec);

        let cmds = winc.link().take_sent();
        assert_eq!(cmds[0].id, CommandId::Wscnc as u16);
        assert_eq!(cmds[0].uint(1), 6);
        assert_eq!((cmds[1].id, cmds[1].uint(0)), (CommandId::Wscn as u16, 1));

        push_result(&mut winc, "home", 6, 1);
        push_result(&mut winc, "", 6, 2);
        winc.link()
            .push_aec(AecId::ScanDone as u16, &[SendParam::Uint(2)]);
        winc.task(&mut rec);

        assert_eq!(
            rec.events,
            [
                Event::ScanResult("home".into(), 6),
                Event::ScanResult("".into(), 6),
                Event::ScanDone(2),
            ]
        );
        assert!(!winc.bss_is_scanning());

        let results = winc.bss_results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rssi, -55);
        assert_eq!(results[0].auth_type, Some(AuthType::Wpa2));
        assert_eq!(results[1].bssid, MacAddress([2, 0, 0, 0, 0, 2]));
    }

    #[test]
    fn results_beyond_capacity_are_reported_but_not_kept() {
        let mut winc = make_winc();
        let mut rec = Recorder::default();

        winc.bss_scan_start(crate::CHANNEL_ANY, false).unwrap();
        winc.task(&mut rec);

        for i in 0..MAX_SCAN_RESULTS as u8 + 2 {
            push_result(&mut winc, "net", 1, i);
            winc.task(&mut rec);
        }

        assert_eq!(rec.events.len(), MAX_SCAN_RESULTS + 2);
        assert_eq!(winc.bss_results().len(), MAX_SCAN_RESULTS);
    }

    #[test]
    fn failed_request_ends_the_scan() {
        let mut winc = make_winc();
        let mut rec = Recorder::default();

        winc.bss_scan_start(1, true).unwrap();
        winc.task(&mut rec);

        let cmds = winc.link().take_sent();
        winc.link().push_status(&cmds[0], 0);
        winc.link().push_status(&cmds[1], 5);
        winc.task(&mut rec);

        assert_eq!(rec.events, [Event::ScanDone(0)]);
        assert!(winc.bss_scan_start(1, true).is_ok());
    }

    #[test]
    fn invalid_channel_is_rejected() {
        let mut winc = make_winc();
        assert_eq!(winc.bss_scan_start(14, true), Err(Error::InvalidArg));
        assert!(!winc.bss_is_scanning());
    }
}
