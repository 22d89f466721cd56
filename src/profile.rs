//! The saved Wi-Fi settings: one network and its credentials, kept in a
//! single slot of non-volatile storage.
//!
//! The slot holds a little-endian `u16` length followed by that many bytes of
//! `postcard`-encoded [`WifiProfile`]. An erased slot reads back as all
//! `0xFF`, so a length of `0xFFFF` means there is nothing saved.

use serde::{Deserialize, Serialize};

use crate::{AuthContext, BssContext};

/// Room for the longest SSID and passphrase with their length prefixes.
pub const PROFILE_MAX_LEN: usize = 128;

const LEN_PREFIX: usize = 2;
const ERASED: u16 = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WifiProfile {
    pub bss: BssContext,
    pub auth: AuthContext,
}

/// Storage for one saved profile, e.g. a flash page or an EEPROM region.
pub trait ProfileSlot {
    type Error: core::fmt::Debug;

    /// Fills `buf` from the start of the slot.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Writes `data` at the start of the slot. The slot has been erased
    /// first.
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Sets the whole slot back to `0xFF`.
    fn erase(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum ProfileError<E> {
    /// The slot itself failed.
    Slot(E),
    /// The profile doesn’t fit in [`PROFILE_MAX_LEN`] bytes.
    Encode,
    /// The slot holds something that isn’t a profile.
    Corrupt,
}

/// Replaces the saved profile. There’s no journal: losing power part way
/// through leaves the slot erased or corrupt.
pub fn save<S: ProfileSlot>(slot: &mut S, profile: &WifiProfile) -> Result<(), ProfileError<S::Error>> {
    let mut buf = [0u8; LEN_PREFIX + PROFILE_MAX_LEN];

    let len = postcard::to_slice(profile, &mut buf[LEN_PREFIX..])
        .map_err(|_| ProfileError::Encode)?
        .len();
    buf[..LEN_PREFIX].copy_from_slice(&(len as u16).to_le_bytes());

    slot.erase().map_err(ProfileError::Slot)?;
    slot.write(&buf[..LEN_PREFIX + len])
        .map_err(ProfileError::Slot)?;

    debug!("saved profile, {} bytes", len);
    Ok(())
}

/// The saved profile, or `None` if the slot is erased.
pub fn load<S: ProfileSlot>(slot: &mut S) -> Result<Option<WifiProfile>, ProfileError<S::Error>> {
    let mut buf = [0u8; LEN_PREFIX + PROFILE_MAX_LEN];
    slot.read(&mut buf).map_err(ProfileError::Slot)?;

    let len = u16::from_le_bytes([buf[0], buf[1]]);
    if len == ERASED {
        return Ok(None);
    }

    let len = len as usize;
    if len == 0 || len > PROFILE_MAX_LEN {
        warn!("saved profile has bad length {}", len);
        return Err(ProfileError::Corrupt);
    }

    postcard::from_bytes(&buf[LEN_PREFIX..LEN_PREFIX + len])
        .map(Some)
        .map_err(|_| ProfileError::Corrupt)
}

pub fn clear<S: ProfileSlot>(slot: &mut S) -> Result<(), ProfileError<S::Error>> {
    slot.erase().map_err(ProfileError::Slot)
}

#[cfg(test)]
pub(crate) mod testing {
    use core::convert::Infallible;

    use super::*;

    /// A slot in RAM that starts out erased.
    pub struct MemSlot {
        pub data: [u8; 256],
    }

    impl Default for MemSlot {
        fn default() -> Self {
            MemSlot { data: [0xFF; 256] }
        }
    }

    impl ProfileSlot for MemSlot {
        type Error = Infallible;

        fn read(&mut self, buf: &mut [u8]) -> Result<(), Infallible> {
            buf.copy_from_slice(&self.data[..buf.len()]);
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<(), Infallible> {
            self.data[..data.len()].copy_from_slice(data);
            Ok(())
        }

        fn erase(&mut self) -> Result<(), Infallible> {
            self.data = [0xFF; 256];
            Ok(())
        }
    }
}
