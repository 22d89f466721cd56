//! The serial link to the network controller.
//!
//! The driver only needs whole messages in and out, so anything that can
//! frame messages works as a [`Link`]. [`SpiLink`] is the usual one.

use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_hal::spi::FullDuplex;
use fugit::MillisDurationU32;

use crate::chip_select::{WincChipSelect, WincChipSelectError};
use crate::util::spi_ext::{padding_for, SpiExt};

/// Moves whole messages between the host and the network controller.
pub trait Link {
    type Error: core::fmt::Debug;

    /// Sends one encoded message. A failure here is treated as a bus error:
    /// the driver stops sending and fails every outstanding request.
    fn write_message(&mut self, message: &[u8]) -> Result<(), Self::Error>;

    /// Receives one message into `buf`, returning its length, or
    /// `WouldBlock` if the network controller has nothing to send.
    fn read_message(&mut self, buf: &mut [u8]) -> nb::Result<usize, Self::Error>;
}

/// Opcode for a host-to-device frame.
const FRAME_WRITE: u8 = 0x57;
/// Opcode for a device-to-host frame.
const FRAME_READ: u8 = 0x52;
/// Opcode plus 16-bit length.
const FRAME_HEADER_LEN: usize = 3;

#[derive(Debug)]
pub enum SpiLinkError<SpiError> {
    /// There was an I/O error writing to the CS pin or reading the ready pin.
    ChipSelectPinError,
    /// The ready pin didn’t go high in time after we asked to select the
    /// device.
    ChipSelectTimeout,
    /// There was an I/O error reading the interrupt pin.
    IrqPinError,
    /// Message is too long for the 16-bit frame length.
    MessageTooLong(usize),
    /// The device sent a message longer than the receive buffer. The message
    /// was drained from the bus and dropped.
    Overrun(usize),
    /// There was an error related to the SPI bus itself.
    SpiError(SpiError),
}

impl<SpiError> SpiLinkError<SpiError> {
    /// Convenience function for passing to [`map_err`](core::result::Result::map_err).
    fn spi(err: SpiError) -> SpiLinkError<SpiError> {
        SpiLinkError::SpiError(err)
    }
}

impl<CE, RE, SE> From<WincChipSelectError<CE, RE>> for SpiLinkError<SE> {
    fn from(err: WincChipSelectError<CE, RE>) -> Self {
        match err {
            WincChipSelectError::CsPinError(_) => SpiLinkError::ChipSelectPinError,
            WincChipSelectError::ReadyPinError(_) => SpiLinkError::ChipSelectPinError,
            WincChipSelectError::DeviceReadyTimeout => SpiLinkError::ChipSelectTimeout,
        }
    }
}

/// [`Link`] over SPI.
///
/// You’ll need:
///
/// * A [`FullDuplex`](embedded_hal::spi::FullDuplex) SPI instance. The link
///   owns it, so the bus can’t be shared with other devices.
/// * The CS [`OutputPin`](embedded_hal::digital::v2::OutputPin)
/// * The ready [`InputPin`](embedded_hal::digital::v2::InputPin), which the
///   device drives high when it can take a transfer
/// * The interrupt [`InputPin`](embedded_hal::digital::v2::InputPin), active
///   low, asserted while the device has a message for us
/// * A [`CountDown`](embedded_hal::timer::CountDown) for the ready timeout
///
/// Every frame is an opcode, a big-endian 16-bit length and the message,
/// padded with zeros to a multiple of 4 bytes.
pub struct SpiLink<Spi, CsPin, ReadyPin, IrqPin, Timer>
where
    CsPin: OutputPin,
    ReadyPin: InputPin,
{
    spi: Spi,
    chip_select: WincChipSelect<CsPin, ReadyPin>,
    irq: IrqPin,
    timer: Timer,
}

impl<Spi, SpiError, CsPin, ReadyPin, IrqPin, Timer, TimerTime>
    SpiLink<Spi, CsPin, ReadyPin, IrqPin, Timer>
where
    CsPin: OutputPin,
    ReadyPin: InputPin,
    IrqPin: InputPin,
    SpiError: core::fmt::Debug,
    Spi: FullDuplex<u8, Error = SpiError> + embedded_hal::blocking::spi::Write<u8, Error = SpiError>,
    Timer: embedded_hal::timer::CountDown<Time = TimerTime>,
    TimerTime: From<MillisDurationU32>,
{
    pub fn new(
        spi: Spi,
        cs: CsPin,
        ready: ReadyPin,
        irq: IrqPin,
        timer: Timer,
    ) -> Result<Self, SpiLinkError<SpiError>> {
        Ok(SpiLink {
            spi,
            chip_select: WincChipSelect::new(cs, ready)
                .map_err(|_| SpiLinkError::ChipSelectPinError)?,
            irq,
            timer,
        })
    }

    /// True while the device holds its interrupt line low.
    pub fn has_message(&self) -> Result<bool, SpiLinkError<SpiError>> {
        self.irq.is_low().map_err(|_| SpiLinkError::IrqPinError)
    }

    /// Reports a CS failure from the end of the last transfer.
    fn check_deselect(&mut self) -> Result<(), SpiLinkError<SpiError>> {
        match self.chip_select.take_deselect_err() {
            Some(_) => Err(SpiLinkError::ChipSelectPinError),
            None => Ok(()),
        }
    }
}

impl<Spi, SpiError, CsPin, ReadyPin, IrqPin, Timer, TimerTime> Link
    for SpiLink<Spi, CsPin, ReadyPin, IrqPin, Timer>
where
    CsPin: OutputPin,
    ReadyPin: InputPin,
    IrqPin: InputPin,
    SpiError: core::fmt::Debug,
    Spi: FullDuplex<u8, Error = SpiError> + embedded_hal::blocking::spi::Write<u8, Error = SpiError>,
    Timer: embedded_hal::timer::CountDown<Time = TimerTime>,
    TimerTime: From<MillisDurationU32>,
{
    type Error = SpiLinkError<SpiError>;

    fn write_message(&mut self, message: &[u8]) -> Result<(), Self::Error> {
        if message.len() > u16::MAX as usize {
            return Err(SpiLinkError::MessageTooLong(message.len()));
        }

        {
            let mut spi = self.chip_select.select(&mut self.spi, &mut self.timer)?;

            let [len_h, len_l] = (message.len() as u16).to_be_bytes();
            spi.write(&[FRAME_WRITE, len_h, len_l])
                .map_err(SpiLinkError::spi)?;
            spi.write(message).map_err(SpiLinkError::spi)?;

            let pad = padding_for(FRAME_HEADER_LEN + message.len());
            spi.write(&[0u8; 3][..pad]).map_err(SpiLinkError::spi)?;
        }

        self.check_deselect()
    }

    fn read_message(&mut self, buf: &mut [u8]) -> nb::Result<usize, Self::Error> {
        if !self.has_message()? {
            return Err(nb::Error::WouldBlock);
        }

        let (len, kept) = {
            let mut spi = self
                .chip_select
                .select(&mut self.spi, &mut self.timer)
                .map_err(SpiLinkError::from)?;

            spi.write(&[FRAME_READ]).map_err(SpiLinkError::spi)?;
            let len = u16::from_be_bytes([
                spi.transfer_byte().map_err(SpiLinkError::spi)?,
                spi.transfer_byte().map_err(SpiLinkError::spi)?,
            ]) as usize;

            // We’ll only read up to the buffer’s length, but the rest still
            // has to come off the bus.
            let kept = core::cmp::min(len, buf.len());
            for byte in buf[..kept].iter_mut() {
                *byte = spi.transfer_byte().map_err(SpiLinkError::spi)?;
            }

            spi.skip_bytes(len - kept + padding_for(FRAME_HEADER_LEN + len))
                .map_err(SpiLinkError::spi)?;

            (len, kept)
        };

        self.check_deselect()?;

        if kept < len {
            return Err(nb::Error::Other(SpiLinkError::Overrun(len)));
        }

        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use core::cell::Cell;
    use core::convert::Infallible;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::vec::Vec;

    #[derive(Default)]
    struct MockSpi {
        mosi: Vec<u8>,
        miso: VecDeque<u8>,
    }

    impl FullDuplex<u8> for MockSpi {
        type Error = Infallible;

        fn read(&mut self) -> nb::Result<u8, Infallible> {
            Ok(self.miso.pop_front().unwrap_or(0))
        }

        fn send(&mut self, byte: u8) -> nb::Result<(), Infallible> {
            self.mosi.push(byte);
            Ok(())
        }
    }

    impl embedded_hal::blocking::spi::write::Default<u8> for MockSpi {}

    #[derive(Clone, Default)]
    struct MockPin(Rc<Cell<bool>>);

    impl OutputPin for MockPin {
        type Error = Infallible;

        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0.set(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0.set(true);
            Ok(())
        }
    }

    impl InputPin for MockPin {
        type Error = Infallible;

        fn is_high(&self) -> Result<bool, Infallible> {
            Ok(self.0.get())
        }

        fn is_low(&self) -> Result<bool, Infallible> {
            Ok(!self.0.get())
        }
    }

    /// Runs out after a few polls.
    struct MockTimer(u32);

    impl embedded_hal::timer::CountDown for MockTimer {
        type Time = MillisDurationU32;

        fn start<T: Into<MillisDurationU32>>(&mut self, _count: T) {
            self.0 = 3;
        }

        fn wait(&mut self) -> nb::Result<(), void::Void> {
            if self.0 == 0 {
                Ok(())
            } else {
                self.0 -= 1;
                Err(nb::Error::WouldBlock)
            }
        }
    }

    type TestLink = SpiLink<MockSpi, MockPin, MockPin, MockPin, MockTimer>;

    fn make_link() -> (TestLink, MockPin, MockPin, MockPin) {
        let cs = MockPin::default();
        let ready = MockPin(Rc::new(Cell::new(true)));
        let irq = MockPin(Rc::new(Cell::new(true)));

        let link = SpiLink::new(
            MockSpi::default(),
            cs.clone(),
            ready.clone(),
            irq.clone(),
            MockTimer(0),
        )
        .unwrap();

        (link, cs, ready, irq)
    }

    #[test]
    fn write_frames_and_pads_message() {
        let (mut link, cs, _, _) = make_link();
        assert!(cs.0.get());

        link.write_message(&[0xAA, 0xBB]).unwrap();

        assert_eq!(link.spi.mosi, [FRAME_WRITE, 0x00, 0x02, 0xAA, 0xBB, 0, 0, 0]);
        // Deselected again once the frame is out.
        assert!(cs.0.get());
    }

    #[test]
    fn write_times_out_when_device_is_not_ready() {
        let (mut link, cs, ready, _) = make_link();
        ready.0.set(false);

        match link.write_message(&[1]) {
            Err(SpiLinkError::ChipSelectTimeout) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(link.spi.mosi.is_empty());
        assert!(cs.0.get());
    }

    #[test]
    fn read_would_block_without_interrupt() {
        let (mut link, _, _, _) = make_link();
        let mut buf = [0u8; 8];

        assert!(matches!(
            link.read_message(&mut buf),
            Err(nb::Error::WouldBlock)
        ));
    }

    #[test]
    fn read_returns_one_message() {
        let (mut link, _, _, irq) = make_link();
        irq.0.set(false);
        // Opcode slot, length, payload, then one byte of padding.
        link.spi.miso.extend([0x00, 0x00, 0x04, 1, 2, 3, 4, 0]);

        let mut buf = [0u8; 8];
        let len = link.read_message(&mut buf).unwrap();

        assert_eq!(&buf[..len], &[1, 2, 3, 4]);
        assert_eq!(link.spi.mosi[0], FRAME_READ);
        assert_eq!(link.spi.mosi.len(), 8);
        assert!(link.spi.miso.is_empty());
    }

    #[test]
    fn read_drains_oversized_message() {
        let (mut link, _, _, irq) = make_link();
        irq.0.set(false);
        link.spi.miso.extend([0x00, 0x00, 0x05, 1, 2, 3, 4, 5]);

        let mut buf = [0u8; 2];
        match link.read_message(&mut buf) {
            Err(nb::Error::Other(SpiLinkError::Overrun(5))) => {}
            other => panic!("unexpected {:?}", other),
        }
        assert!(link.spi.miso.is_empty());
    }
}
