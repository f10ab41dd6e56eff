//! Measurement-card façades and their transport abstractions.
//!
//! The concrete Spectrum-card driver lives outside this crate. The façades
//! only see two narrow traits: [`DacLink`] consumes interleaved replay
//! frames, [`AdcLink`] produces per-gate capture buffers. Everything above
//! the traits (worker threads, gate bookkeeping, amplitude ceilings) is
//! hardware independent and exercised by the tests through mock links.

pub mod rx;
pub mod tx;

pub use rx::RxCard;
pub use tx::TxCard;

use ndarray::Array2;
use thiserror::Error;

/// Opaque failure reported by a card transport. Fatal to the current run.
#[derive(Clone, Debug, Error)]
#[error("device error: {0}")]
pub struct DeviceError(pub String);

impl DeviceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Raw int16 samples of one ADC gate, shaped `[n_coils, n_ro]`. Coil 0
/// carries the phase reference square in bit 15.
pub type RawGate = Array2<i16>;

/// Transmit DMA transport.
///
/// Implementations wrap the vendor driver: `replay` hands one block frame
/// (interleaved `[rf, gx, gy, gz]` int16 samples at the card dwell) to the
/// DMA ring and may block until ring space is available.
pub trait DacLink: Send + 'static {
    fn replay(&mut self, frame: &[i16]) -> Result<(), DeviceError>;

    /// Program the DC offsets of the three gradient channels, in mV.
    fn write_dc_offsets(&mut self, offsets_mv: [f64; 3], high_impedance: bool)
        -> Result<(), DeviceError>;
}

/// Receive DMA transport.
pub trait AdcLink: Send + 'static {
    /// Arm the digitiser and clear its gate ring.
    fn begin(&mut self) -> Result<(), DeviceError>;

    /// Fetch the next completed gate, or `None` while the ring is empty.
    fn next_gate(&mut self) -> Result<Option<RawGate>, DeviceError>;

    /// Halt capture.
    fn end(&mut self) -> Result<(), DeviceError>;
}
