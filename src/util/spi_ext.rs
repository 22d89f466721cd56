use embedded_hal::spi::FullDuplex;
use nb::block;

pub trait SpiExt: FullDuplex<u8> {
    /// Pumps the SPI bus for the next byte by sending a 0 byte and receiving
    /// the response, since all SPI communication is full-duplex.
    fn transfer_byte(&mut self) -> Result<u8, Self::Error> {
        block!(self.send(0u8)).and_then(|_| block!(self.read()))
    }

    /// Clocks `count` bytes off the bus and throws them away.
    fn skip_bytes(&mut self, count: usize) -> Result<(), Self::Error> {
        for _ in 0..count {
            self.transfer_byte()?;
        }

        Ok(())
    }
}

impl<S: FullDuplex<u8>> SpiExt for S {}

/// Bytes of zero padding needed to bring a transfer of `len` bytes up to a
/// multiple of 4.
pub fn padding_for(len: usize) -> usize {
    (4 - len % 4) % 4
}
