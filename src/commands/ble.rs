use crate::cmd_req::RequestOwner;
use crate::commands::{param, CommandId, SendParam};
use crate::device::{RequestEvent, Requests};
use crate::link::Link;
use crate::{Error, Winc, WincEvents};

#[derive(Default)]
pub(crate) struct BleState {
    active: bool,
    /// The BLE stack only needs initialising once, and stays initialised
    /// across close and open.
    initialized: bool,
}

impl BleState {
    /// Restricted again after a close, without forgetting the init.
    pub(crate) fn reopened(&self) -> Self {
        BleState {
            active: false,
            initialized: self.initialized,
        }
    }

    pub(crate) fn request_event<E: WincEvents + ?Sized>(
        &mut self,
        requests: &mut Requests,
        event: &RequestEvent<'_>,
        events: &mut E,
    ) {
        let status = match event {
            RequestEvent::CmdStatus(status) => status,
            _ => return,
        };

        match status.source.command() {
            Some(CommandId::Bleinit) if status.is_ok() => {
                info!("ble initialised");
                self.initialized = true;
            }

            Some(CommandId::Bleinit) => {
                warn!("ble init failed: {}", status.status);
                if !self.active {
                    return;
                }

                self.active = false;
                let restricted = requests.submit(RequestOwner::Ble, 1, 0, |req| {
                    req.blec(param::BLEC_RESTRICT, SendParam::Bool(true))
                });
                if restricted.is_err() {
                    error!("couldn't restrict ble again");
                }

                events.on_ble_state(false);
            }

            Some(CommandId::Blec) if !status.is_ok() => {
                let restrict = status.source.params.get(1).and_then(|e| e.as_bool());
                warn!("ble restriction change rejected: {}", status.status);

                if restrict == Some(false) && self.active {
                    self.active = false;
                    events.on_ble_state(false);
                }
            }

            _ => {}
        }
    }
}

impl<L: Link> Winc<L> {
    /// Lifts the BLE restriction, initialising the BLE stack the first time.
    pub fn ble_start(&mut self) -> Result<(), Error> {
        self.ensure_open()?;

        if self.state.ble.active {
            return Ok(());
        }

        let init = !self.state.ble.initialized;
        self.send(RequestOwner::Ble, 2, 0, |req| {
            req.blec(param::BLEC_RESTRICT, SendParam::Bool(false))?;
            if init {
                req.bleinit()?;
            }
            Ok(())
        })?;

        self.state.ble.active = true;
        Ok(())
    }

    pub fn ble_stop(&mut self) -> Result<(), Error> {
        self.ensure_open()?;

        if !self.state.ble.active {
            return Ok(());
        }

        self.send(RequestOwner::Ble, 1, 0, |req| {
            req.blec(param::BLEC_RESTRICT, SendParam::Bool(true))
        })?;

        self.state.ble.active = false;
        Ok(())
    }

    pub fn ble_is_started(&self) -> bool {
        self.state.ble.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::{Event, Recorder};
    use crate::testing::make_winc;

    #[test]
    fn stack_is_initialised_only_once() {
        let mut winc = make_winc();
        let mut rec = Recorder::default();

        winc.ble_start().unwrap();
        assert!(winc.ble_is_started());
        winc.task(&mut rec);

        let cmds = winc.link().take_sent();
        assert_eq!(cmds.len(), 2);
        assert_eq!(
            (cmds[0].id, cmds[0].uint(0), cmds[0].uint(1)),
            (CommandId::Blec as u16, param::BLEC_RESTRICT as u32, 0)
        );
        assert_eq!(cmds[1].id, CommandId::Bleinit as u16);

        winc.link().push_status(&cmds[0], 0);
        winc.link().push_status(&cmds[1], 0);
        winc.task(&mut rec);

        winc.ble_stop().unwrap();
        assert!(!winc.ble_is_started());
        winc.ble_start().unwrap();
        winc.task(&mut rec);

        let cmds = winc.link().take_sent();
        let ids: std::vec::Vec<u16> = cmds.iter().map(|c| c.id).collect();
        assert_eq!(ids, [CommandId::Blec as u16, CommandId::Blec as u16]);
        assert_eq!(cmds[0].uint(1), 1);
        assert_eq!(cmds[1].uint(1), 0);
        assert!(rec.events.is_empty());
    }

    #[test]
    fn init_failure_rolls_back() {
        let mut winc = make_winc();
        let mut rec = Recorder::default();

        winc.ble_start().unwrap();
        winc.task(&mut rec);

        let cmds = winc.link().take_sent();
        winc.link().push_status(&cmds[0], 0);
        winc.link().push_status(&cmds[1], 4);
        winc.task(&mut rec);

        assert!(!winc.ble_is_started());
        assert_eq!(rec.events, [Event::Ble(false)]);

        // Restricted again, and the next start retries the init.
        let cmds = winc.link().take_sent();
        assert_eq!((cmds[0].id, cmds[0].uint(1)), (CommandId::Blec as u16, 1));

        winc.ble_start().unwrap();
        winc.task(&mut rec);
        let cmds = winc.link().take_sent();
        assert_eq!(cmds.last().map(|c| c.id), Some(CommandId::Bleinit as u16));
    }

    #[test]
    fn init_survives_close() {
        let mut winc = make_winc();
        let mut rec = Recorder::default();

        winc.ble_start().unwrap();
        winc.task(&mut rec);
        let cmds = winc.link().take_sent();
        winc.link().push_status(&cmds[0], 0);
        winc.link().push_status(&cmds[1], 0);
        winc.task(&mut rec);

        winc.close(&mut rec);
        assert!(!winc.ble_is_started());
        winc.open();

        winc.ble_start().unwrap();
        winc.task(&mut rec);
        let cmds = winc.link().take_sent();
        assert_eq!(cmds.len(), 1);
        assert_eq!((cmds[0].id, cmds[0].uint(1)), (CommandId::Blec as u16, 0));
    }

    #[test]
    fn stop_and_start_are_idempotent() {
        let mut winc = make_winc();
        let mut rec = Recorder::default();

        winc.ble_stop().unwrap();
        winc.task(&mut rec);
        assert!(winc.link().take_sent().is_empty());

        winc.ble_start().unwrap();
        winc.ble_start().unwrap();
        winc.task(&mut rec);
        assert_eq!(winc.link().take_sent().len(), 2);
    }
}
