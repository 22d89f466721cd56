pub mod signal;
pub mod spi_ext;
