use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_hal::timer::CountDown;
use fugit::MillisDurationU32;

#[derive(Debug)]
pub enum WincChipSelectError<CsPinError, ReadyPinError> {
    CsPinError(CsPinError),
    ReadyPinError(ReadyPinError),
    DeviceReadyTimeout,
}

type SelectResult<T, CsPin, ReadyPin> = Result<
    T,
    WincChipSelectError<<CsPin as OutputPin>::Error, <ReadyPin as InputPin>::Error>,
>;

/// Chip select for the network controller, which has to raise its "ready"
/// line before it can be selected.
///
/// Doesn’t arbitrate between several devices on one bus.
pub struct WincChipSelect<CsPin: OutputPin, ReadyPin: InputPin> {
    cs: CsPin,
    ready: ReadyPin,

    /// Deselecting happens in `Selected::drop`, which can’t return an error.
    /// The last failure waits here instead.
    last_deselect_err: Option<CsPin::Error>,
}

impl<CsPin, ReadyPin> WincChipSelect<CsPin, ReadyPin>
where
    CsPin: OutputPin,
    ReadyPin: InputPin,
{
    /// How long the device gets to raise its ready line.
    pub const READY_TIMEOUT_MS: u32 = 1_000;

    /// Starts deselected, with CS high.
    pub fn new(mut cs: CsPin, ready: ReadyPin) -> SelectResult<Self, CsPin, ReadyPin> {
        cs.set_high().map_err(WincChipSelectError::CsPinError)?;

        Ok(WincChipSelect {
            cs,
            ready,
            last_deselect_err: None,
        })
    }

    /// Waits for the ready line, then drives CS low. The returned guard
    /// derefs to the bus and deselects when dropped, so every exit path out
    /// of a transfer releases the device.
    pub fn select<'a, S>(
        &'a mut self,
        spi: &'a mut S,
        timer: &mut impl CountDown<Time = impl From<MillisDurationU32>>,
    ) -> SelectResult<Selected<'a, S, CsPin>, CsPin, ReadyPin> {
        self.wait_for_ready(timer)?;

        self.cs.set_low().map_err(WincChipSelectError::CsPinError)?;

        Ok(Selected {
            spi,
            cs: &mut self.cs,
            deselect_err: &mut self.last_deselect_err,
        })
    }

    pub fn take_deselect_err(&mut self) -> Option<CsPin::Error> {
        self.last_deselect_err.take()
    }

    fn wait_for_ready(
        &mut self,
        timer: &mut impl CountDown<Time = impl From<MillisDurationU32>>,
    ) -> SelectResult<(), CsPin, ReadyPin> {
        timer.start(MillisDurationU32::millis(Self::READY_TIMEOUT_MS));

        loop {
            if self.ready.is_high().map_err(WincChipSelectError::ReadyPinError)? {
                return Ok(());
            }

            match timer.wait() {
                Err(nb::Error::WouldBlock) => continue,
                _ => return Err(WincChipSelectError::DeviceReadyTimeout),
            }
        }
    }
}

/// The bus, borrowed while the device is selected.
pub struct Selected<'a, S, CsPin: OutputPin> {
    spi: &'a mut S,
    cs: &'a mut CsPin,
    deselect_err: &'a mut Option<CsPin::Error>,
}

impl<'a, S, CsPin: OutputPin> Drop for Selected<'a, S, CsPin> {
    fn drop(&mut self) {
        if let Err(err) = self.cs.set_high() {
            *self.deselect_err = Some(err);
        }
    }
}

impl<'a, S, CsPin: OutputPin> core::ops::Deref for Selected<'a, S, CsPin> {
    type Target = S;

    fn deref(&self) -> &S {
        self.spi
    }
}

impl<'a, S, CsPin: OutputPin> core::ops::DerefMut for Selected<'a, S, CsPin> {
    fn deref_mut(&mut self) -> &mut S {
        self.spi
    }
}
