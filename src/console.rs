//! The `wlan` shell commands.
//!
//! [`Console`] keeps a working copy of the Wi-Fi settings. `wlan set …`
//! edits it, `wlan config …` moves it to and from a [`ProfileSlot`], and
//! `wlan apply config` connects with it. Feed it one line at a time:
//!
//! ```ignore
//! console.execute("wlan set ssid home", &mut winc, &mut slot, &mut uart)?;
//! ```

use core::fmt::Write;

use crate::commands::sta::is_valid_channel;
use crate::link::Link;
use crate::profile::{self, ProfileSlot, WifiProfile};
use crate::{AuthContext, AuthType, ConnectionState, Error, Fetch, MacAddress, RssiQuery, Winc};

const HELP: &str = "\
wlan set ssid <SSID>                 - sets the SSID
wlan set channel <CHANNEL>           - sets the channel, 1 to 13 or 255 for any
wlan set authentication <TYPE>       - 1 open, 2 WEP, 3 WPA/WPA2, 4 WPA2
wlan set passphrase <PASSPHRASE>     - sets the passphrase
wlan set macaddr <MACADDR>           - sets the MAC address, 11:22:33:44:55:66
wlan get ssid|channel|authentication - shows the working settings
wlan get macaddr                     - shows the MAC address
wlan get rssi                        - shows the RSSI of the associated AP
wlan start scan <CHANNEL>            - scans one channel, or 255 for all
wlan config save|read|clear          - saved settings
wlan apply config                    - connects with the working settings
";

#[derive(Default)]
pub struct Console {
    profile: WifiProfile,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from previously saved settings.
    pub fn with_profile(profile: WifiProfile) -> Self {
        Console { profile }
    }

    /// The working settings.
    pub fn profile(&self) -> &WifiProfile {
        &self.profile
    }

    /// Runs one command line. Errors only come from `out`.
    pub fn execute<L, S, W>(
        &mut self,
        line: &str,
        winc: &mut Winc<L>,
        slot: &mut S,
        out: &mut W,
    ) -> core::fmt::Result
    where
        L: Link,
        S: ProfileSlot,
        W: Write,
    {
        let mut args = line.split_whitespace();

        match args.next() {
            Some("wlanhelp") => out.write_str(HELP),
            Some("wlan") => match (args.next(), args.next()) {
                (Some("set"), what) => self.set(what, args.next(), winc, out),
                (Some("get"), what) => self.get(what, winc, out),
                (Some("start"), Some("scan")) => Self::scan(args.next(), winc, out),
                (Some("config"), what) => self.config(what, slot, out),
                (Some("apply"), Some("config")) => self.apply(winc, out),
                _ => writeln!(out, "Unknown wlan command, try wlanhelp"),
            },
            Some(other) => writeln!(out, "Unknown command {}", other),
            None => Ok(()),
        }
    }

    fn set<L: Link, W: Write>(
        &mut self,
        what: Option<&str>,
        value: Option<&str>,
        winc: &mut Winc<L>,
        out: &mut W,
    ) -> core::fmt::Result {
        let (what, value) = match (what, value) {
            (Some(what), Some(value)) => (what, value),
            (Some(what), None) => return writeln!(out, "Usage: wlan set {} <VALUE>", what),
            _ => return writeln!(out, "Usage: wlan set ssid|channel|authentication|passphrase|macaddr <VALUE>"),
        };

        match what {
            "ssid" => match heapless::String::try_from(value) {
                Ok(ssid) => {
                    self.profile.bss.ssid = ssid;
                    Ok(())
                }
                Err(_) => writeln!(out, "ERROR: SSID is at most 32 bytes"),
            },

            "channel" => match value.parse::<u8>() {
                Ok(channel) if is_valid_channel(channel) => {
                    self.profile.bss.channel = channel;
                    Ok(())
                }
                _ => writeln!(out, "ERROR: Set the channel between 1 and 13, or 255"),
            },

            "authentication" => match value.parse::<u8>().ok().and_then(AuthType::from_u8) {
                Some(auth_type) => {
                    self.profile.auth.auth_type = auth_type;
                    if auth_type == AuthType::Open {
                        self.profile.auth.passphrase.clear();
                    }
                    Ok(())
                }
                None => writeln!(out, "ERROR: Authentication type is 1 to 4"),
            },

            // Checked against the authentication type on apply.
            "passphrase" => match heapless::String::try_from(value) {
                Ok(passphrase) => {
                    self.profile.auth.passphrase = passphrase;
                    Ok(())
                }
                Err(_) => writeln!(out, "ERROR: Passphrase is at most 64 bytes"),
            },

            "macaddr" => match value.parse::<MacAddress>() {
                Ok(mac) => match winc.mac_address_set(mac) {
                    Ok(()) => Ok(()),
                    Err(err) => writeln!(out, "ERROR: Unable to set MAC address: {:?}", err),
                },
                Err(_) => writeln!(out, "ERROR: MAC address is expected as 11:22:33:44:55:66"),
            },

            other => writeln!(out, "Unknown setting {}", other),
        }
    }

    fn get<L: Link, W: Write>(
        &self,
        what: Option<&str>,
        winc: &mut Winc<L>,
        out: &mut W,
    ) -> core::fmt::Result {
        match what {
            Some("ssid") => writeln!(out, "SSID: {}", self.profile.bss.ssid),
            Some("channel") => writeln!(out, "Channel: {}", self.profile.bss.channel),
            Some("authentication") => {
                writeln!(out, "Authentication: {}", self.profile.auth.auth_type as u8)
            }
            Some("macaddr") => match winc.mac_address() {
                Some(mac) => writeln!(out, "MAC address: {}", mac),
                None => writeln!(out, "MAC address not set"),
            },
            Some("rssi") => {
                let handle = match winc.sta_state() {
                    ConnectionState::Connected(handle) => handle,
                    _ => return writeln!(out, "Device is not associated yet!"),
                };

                match winc.assoc_rssi(handle, RssiQuery::Refresh) {
                    Ok(Fetch::Ready(rssi)) => writeln!(out, "RSSI: {}", rssi),
                    Ok(Fetch::Pending) => writeln!(out, "RSSI requested"),
                    Err(err) => writeln!(out, "ERROR: Unable to get RSSI: {:?}", err),
                }
            }
            _ => writeln!(out, "Usage: wlan get ssid|channel|authentication|macaddr|rssi"),
        }
    }

    fn scan<L: Link, W: Write>(
        channel: Option<&str>,
        winc: &mut Winc<L>,
        out: &mut W,
    ) -> core::fmt::Result {
        let channel = match channel.and_then(|c| c.parse::<u8>().ok()) {
            Some(channel) if is_valid_channel(channel) => channel,
            _ => return writeln!(out, "Usage: wlan start scan <CHANNEL>, 1 to 13 or 255 for all"),
        };

        match winc.bss_scan_start(channel, true) {
            Ok(()) => writeln!(out, "Scanning"),
            Err(err) => writeln!(out, "ERROR: Unable to start scan: {:?}", err),
        }
    }

    fn config<S: ProfileSlot, W: Write>(
        &mut self,
        what: Option<&str>,
        slot: &mut S,
        out: &mut W,
    ) -> core::fmt::Result {
        match what {
            Some("save") => match profile::save(slot, &self.profile) {
                Ok(()) => writeln!(out, "Saved configuration"),
                Err(err) => writeln!(out, "ERROR: Unable to save configuration: {:?}", err),
            },

            Some("clear") => match profile::clear(slot) {
                Ok(()) => writeln!(out, "Cleared saved configuration"),
                Err(err) => writeln!(out, "ERROR: Unable to clear configuration: {:?}", err),
            },

            Some("read") => match profile::load(slot) {
                Ok(Some(saved)) => {
                    writeln!(out, "SSID: {}", saved.bss.ssid)?;
                    writeln!(out, "SSID length: {}", saved.bss.ssid.len())?;
                    writeln!(out, "Channel: {}", saved.bss.channel)?;
                    self.profile = saved;
                    Ok(())
                }
                Ok(None) => writeln!(out, "No saved configuration"),
                Err(err) => writeln!(out, "ERROR: Unable to read configuration: {:?}", err),
            },

            _ => writeln!(out, "Usage: wlan config save|read|clear"),
        }
    }

    fn apply<L: Link, W: Write>(&self, winc: &mut Winc<L>, out: &mut W) -> core::fmt::Result {
        let auth = match AuthContext::new(self.profile.auth.auth_type, &self.profile.auth.passphrase) {
            Ok(auth) => auth,
            Err(_) => return writeln!(out, "ERROR: Passphrase doesn't suit the authentication type"),
        };

        match winc.sta_connect(&self.profile.bss, &auth) {
            Ok(()) => writeln!(out, "Connecting to {}", self.profile.bss.ssid),
            Err(Error::InvalidArg) => writeln!(out, "ERROR: Set the SSID and channel first"),
            Err(err) => writeln!(out, "ERROR: Unable to connect: {:?}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::string::String;

    use super::*;
    use crate::commands::{param, AecId, CommandId, SendParam};
    use crate::device::testing::MockLink;
    use crate::events::testing::Recorder;
    use crate::profile::testing::MemSlot;
    use crate::testing::make_winc;

    struct Shell {
        console: Console,
        winc: Winc<MockLink>,
        slot: MemSlot,
    }

    impl Shell {
        fn new() -> Self {
            Shell {
                console: Console::new(),
                winc: make_winc(),
                slot: MemSlot::default(),
            }
        }

        fn run(&mut self, line: &str) -> String {
            let mut out = String::new();
            self.console
                .execute(line, &mut self.winc, &mut self.slot, &mut out)
                .unwrap();
            out
        }
    }

    #[test]
    fn settings_are_edited_and_shown() {
        let mut shell = Shell::new();

        assert_eq!(shell.run("wlan set ssid home"), "");
        assert_eq!(shell.run("wlan set channel 6"), "");
        assert_eq!(shell.run("wlan set authentication 4"), "");
        assert_eq!(shell.run("wlan set passphrase letmein99"), "");

        assert_eq!(shell.run("wlan get ssid"), "SSID: home\n");
        assert_eq!(shell.run("wlan get channel"), "Channel: 6\n");
        assert_eq!(shell.run("wlan get authentication"), "Authentication: 4\n");
        assert_eq!(shell.console.profile().auth.passphrase.as_str(), "letmein99");

        assert!(shell.run("wlan set channel 14").starts_with("ERROR"));
        assert!(shell.run("wlan set authentication 9").starts_with("ERROR"));
        assert_eq!(shell.console.profile().bss.channel, 6);
    }

    #[test]
    fn config_round_trips_through_the_slot() {
        let mut shell = Shell::new();

        assert_eq!(shell.run("wlan config read"), "No saved configuration\n");

        shell.run("wlan set ssid lab");
        shell.run("wlan set channel 11");
        assert_eq!(shell.run("wlan config save"), "Saved configuration\n");

        shell.run("wlan set ssid elsewhere");
        assert_eq!(
            shell.run("wlan config read"),
            "SSID: lab\nSSID length: 3\nChannel: 11\n"
        );
        assert_eq!(shell.console.profile().bss.ssid.as_str(), "lab");

        shell.run("wlan config clear");
        assert_eq!(shell.run("wlan config read"), "No saved configuration\n");
    }

    #[test]
    fn apply_connects_with_working_settings() {
        let mut shell = Shell::new();
        let mut rec = Recorder::default();

        assert!(shell.run("wlan apply config").starts_with("ERROR"));

        shell.run("wlan set ssid home");
        shell.run("wlan set authentication 3");
        shell.run("wlan set passphrase short");
        assert!(shell.run("wlan apply config").starts_with("ERROR"));

        shell.run("wlan set passphrase longenough");
        assert_eq!(shell.run("wlan apply config"), "Connecting to home\n");

        shell.winc.task(&mut rec);
        let cmds = shell.winc.link().take_sent();
        assert_eq!(cmds[0].uint(0), param::WSTAC_SSID as u32);
        assert_eq!(cmds.last().map(|c| c.id), Some(CommandId::Wsta as u16));
    }

    #[test]
    fn rssi_needs_an_association() {
        let mut shell = Shell::new();
        let mut rec = Recorder::default();

        assert_eq!(shell.run("wlan get rssi"), "Device is not associated yet!\n");

        shell.winc.link().push_aec(
            AecId::StaLinkUp as u16,
            &[SendParam::Uint(1), SendParam::Mac(MacAddress([2; 6]))],
        );
        shell.winc.task(&mut rec);

        assert_eq!(shell.run("wlan get rssi"), "RSSI requested\n");
        shell.winc.task(&mut rec);
        assert_eq!(shell.winc.link().take_sent()[0].id, CommandId::Assoc as u16);
    }

    #[test]
    fn scan_and_macaddr_reach_the_driver() {
        let mut shell = Shell::new();
        let mut rec = Recorder::default();

        assert!(shell.run("wlan start scan").starts_with("Usage"));
        assert_eq!(shell.run("wlan start scan 255"), "Scanning\n");
        assert!(shell.run("wlan set macaddr 11:22:33").starts_with("ERROR"));
        assert_eq!(shell.run("wlan set macaddr 02:00:00:00:00:01"), "");

        shell.winc.task(&mut rec);
        let ids: std::vec::Vec<u16> = shell.winc.link().take_sent().iter().map(|c| c.id).collect();
        assert_eq!(
            ids,
            [
                CommandId::Wscnc as u16,
                CommandId::Wscn as u16,
                CommandId::Wific as u16
            ]
        );
    }

    #[test]
    fn unknown_input_is_reported() {
        let mut shell = Shell::new();

        assert!(shell.run("wlanhelp").contains("wlan apply config"));
        assert_eq!(shell.run(""), "");
        assert_eq!(shell.run("reboot"), "Unknown command reboot\n");
        assert_eq!(shell.run("wlan dance"), "Unknown wlan command, try wlanhelp\n");
    }
}
