//! Real-time control core of a low-field MRI spectrometer console.
//!
//! Given a block-event pulse sequence (RF pulses, three orthogonal gradient
//! waveforms and ADC acquisition windows), this crate produces the single
//! interleaved int16 sample stream a transmit DAC card replays, and turns the
//! raw sample stream captured by a receive ADC card into demodulated,
//! decimated, phase-corrected complex echoes.
//!
//! The two central subsystems are:
//!
//! * [`sequence::unroller::SequenceUnroller`] - expands block events into a
//!   densely sampled 4-channel interleaved waveform at the card output rate,
//!   folding the digital side channels (ADC gate, phase reference, RF
//!   unblanking) into bit 15 of the gradient samples.
//! * [`acquisition::control::AcquisitionControl`] - orchestrates parallel TX
//!   replay and RX capture, waits on per-gate ADC events and feeds the
//!   captured gates through the DDC pipeline in [`dsp::ddc`].
//!
//! The DAC/ADC hardware is reached through the opaque [`devices::DacLink`]
//! and [`devices::AdcLink`] transports; everything above those traits is
//! hardware independent and unit testable.

pub mod acquisition;
pub mod config;
pub mod devices;
pub mod dsp;
pub mod sequence;

use thiserror::Error as ThisError;

pub use acquisition::control::AcquisitionControl;
pub use acquisition::data::AcquisitionData;
pub use acquisition::parameter::{AcquisitionParameter, Dimensions, ParameterCell};
pub use config::DeviceConfig;
pub use devices::{AdcLink, DacLink, DeviceError, RawGate};
pub use sequence::unrolled::UnrolledSequence;
pub use sequence::unroller::SequenceUnroller;
pub use sequence::{Block, BlockSequence, SequenceHandle, SequenceParser};

/// Full scale of the 16 bit converters as a float.
pub const INT16_MAX: f64 = i16::MAX as f64;

/// Gyromagnetic ratio of 1H in Hz/mT; anchors the Hz/m to mV translation of
/// gradient waveforms together with the GPA gain and coil efficiency.
pub const GAMMA_HZ_PER_MT: f64 = 42.58e3;

/// Error kinds surfaced by the control core.
///
/// Only [`Error::Timeout`] is recoverable: the acquisition control logs it
/// and continues with the gates that arrived. Every other kind aborts the
/// current run after both cards have been stopped and the gradient offsets
/// restored.
#[derive(Debug, ThisError)]
pub enum Error {
    /// Missing calibration or malformed device configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The sequence contains no block events.
    #[error("no block events found")]
    EmptySequence,

    /// A value exceeds a configured output range.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// A block event is malformed for the requested operation.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// An unrolled event does not fit its block budget.
    #[error("block {block}: event needs {needed} samples, block budget is {budget}")]
    BufferOverflow {
        block: usize,
        needed: usize,
        budget: usize,
    },

    /// A gate-length bucket did not collect one row per average.
    #[error("missing averages: got {got:?} rows, expected {expected}")]
    MissingAverage { got: Vec<usize>, expected: usize },

    /// A gate wait deadline passed.
    #[error("timed out after {0:?} waiting for {1} gates")]
    Timeout(std::time::Duration, usize),

    /// Opaque failure reported by a DAC/ADC link.
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Metadata, configuration or array encoding failed.
    #[error("serialisation error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<postcard::Error> for Error {
    fn from(err: postcard::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
