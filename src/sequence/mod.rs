//! Block-event sequence model.
//!
//! A pulse sequence is an ordered list of [`Block`]s, each holding any subset
//! of an RF pulse, three orthogonal gradient events and an ADC window. The
//! sequence *construction* DSL and the `.seq` file grammar live outside this
//! crate; an external [`SequenceParser`] turns files into a [`BlockSequence`]
//! and the core only walks the parsed block tree.

pub mod unrolled;
pub mod unroller;

use std::path::{Path, PathBuf};

use num_complex::Complex64;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Gradient axis designation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive,
)]
#[repr(usize)]
#[serde(rename_all = "lowercase")]
pub enum GradientAxis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl GradientAxis {
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    /// Hardware channel index on the transmit card; RF occupies channel 0.
    pub fn channel(self) -> usize {
        usize::from(self) + 1
    }
}

/// RF pulse event: a complex envelope at its native raster plus timing.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RfPulse {
    /// Delay before the envelope starts, in s.
    pub delay: f64,
    /// Event-level dead time, in s.
    pub dead_time: f64,
    /// Event-level ringdown time, in s.
    pub ringdown_time: f64,
    /// Duration of the shaped envelope, in s.
    pub shape_dur: f64,
    /// Complex envelope samples at the pulse's native raster.
    pub signal: Vec<Complex64>,
    /// Static phase offset in rad.
    pub phase_offset: f64,
    /// Carrier frequency offset in Hz.
    pub freq_offset: f64,
}

/// Shape of a gradient event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum GradientShape {
    /// Linear rise, flat top, linear fall. Times in s, amplitude in Hz/m.
    Trapezoid {
        rise_time: f64,
        flat_time: f64,
        fall_time: f64,
        amplitude: f64,
    },
    /// Arbitrary waveform: values in Hz/m sampled at the time points `tt`.
    Arbitrary {
        shape_dur: f64,
        tt: Vec<f64>,
        waveform: Vec<f64>,
    },
}

/// Gradient event on one axis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradientEvent {
    pub channel: GradientAxis,
    /// Delay before the waveform starts, in s.
    pub delay: f64,
    pub shape: GradientShape,
}

/// ADC acquisition window.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AdcEvent {
    pub delay: f64,
    pub dead_time: f64,
    /// Number of receiver samples in the window.
    pub num_samples: usize,
    /// Receiver dwell time in s.
    pub dwell: f64,
}

/// One sequence block.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Block {
    pub rf: Option<RfPulse>,
    pub gx: Option<GradientEvent>,
    pub gy: Option<GradientEvent>,
    pub gz: Option<GradientEvent>,
    pub adc: Option<AdcEvent>,
    /// Total block duration in s; events shorter than the block are padded
    /// with implicit zeros.
    pub duration: f64,
}

impl Block {
    /// Pure delay block.
    pub fn delay(duration: f64) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    /// The gradient event occupying the given axis slot, if any.
    pub fn gradient(&self, axis: GradientAxis) -> Option<&GradientEvent> {
        match axis {
            GradientAxis::X => self.gx.as_ref(),
            GradientAxis::Y => self.gy.as_ref(),
            GradientAxis::Z => self.gz.as_ref(),
        }
    }
}

/// A parsed block-event sequence.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlockSequence {
    /// Sequence name, used for session folders and logs.
    pub name: String,
    pub blocks: Vec<Block>,
    /// Raw text of the source `.seq` file when read from disk, kept so a run
    /// can persist the sequence next to its data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
}

impl BlockSequence {
    pub fn new(name: impl Into<String>, blocks: Vec<Block>) -> Self {
        Self {
            name: name.into(),
            blocks,
            source_text: None,
        }
    }

    /// Sum of all block durations in s.
    pub fn duration(&self) -> f64 {
        self.blocks.iter().map(|b| b.duration).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// External pulse-sequence parser.
///
/// The `.seq` grammar belongs to the sequence construction tooling; the
/// acquisition control only needs something that maps a file onto a block
/// tree.
pub trait SequenceParser: Send {
    fn parse(&self, path: &Path) -> Result<BlockSequence, Error>;
}

impl<F> SequenceParser for F
where
    F: Fn(&Path) -> Result<BlockSequence, Error> + Send,
{
    fn parse(&self, path: &Path) -> Result<BlockSequence, Error> {
        self(path)
    }
}

/// Sequence argument accepted by the acquisition control: a path to a `.seq`
/// file (resolved through the bound [`SequenceParser`]) or an already parsed
/// block tree.
#[derive(Clone, Debug)]
pub enum SequenceHandle {
    File(PathBuf),
    Parsed(BlockSequence),
}

impl From<BlockSequence> for SequenceHandle {
    fn from(seq: BlockSequence) -> Self {
        Self::Parsed(seq)
    }
}

impl From<PathBuf> for SequenceHandle {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for SequenceHandle {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<&str> for SequenceHandle {
    fn from(path: &str) -> Self {
        Self::File(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_maps_to_hardware_channel() {
        assert_eq!(GradientAxis::X.channel(), 1);
        assert_eq!(GradientAxis::Y.channel(), 2);
        assert_eq!(GradientAxis::Z.channel(), 3);
        assert_eq!(GradientAxis::try_from(2usize).unwrap(), GradientAxis::Z);
    }

    #[test]
    fn duration_sums_blocks() {
        let seq = BlockSequence::new(
            "delays",
            vec![Block::delay(1e-3), Block::delay(2.5e-4)],
        );
        assert!((seq.duration() - 1.25e-3).abs() < 1e-12);
    }
}
