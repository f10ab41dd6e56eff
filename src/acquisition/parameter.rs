//! Acquisition parameters and the shared parameter cell.

use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::sequence::GradientAxis;
use crate::Error;

/// Per-axis value triple.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Dimensions {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The same value on all three axes.
    pub fn splat(value: f64) -> Self {
        Self::new(value, value, value)
    }

    pub fn axis(&self, axis: GradientAxis) -> f64 {
        match axis {
            GradientAxis::X => self.x,
            GradientAxis::Y => self.y,
            GradientAxis::Z => self.z,
        }
    }
}

/// Parameters that define an acquisition.
///
/// An immutable value record: derive changed copies with
/// [`AcquisitionParameter::updated`] and publish them through a
/// [`ParameterCell`]. The controller compares [`AcquisitionParameter::hash`]
/// snapshots to decide whether a cached unrolled sequence is still valid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParameter {
    /// Carrier frequency of the RF pulses in Hz.
    pub larmor_frequency: f64,
    /// Load-dependent scaling of the RF amplitude.
    pub b1_scaling: f64,
    /// Field-of-view offset per axis in m.
    pub fov_offset: Dimensions,
    /// Field-of-view scaling per axis.
    pub fov_scaling: Dimensions,
    /// Gradient DC (shim) offsets per axis in mV.
    pub gradient_offset: Dimensions,
    /// Receiver samples per readout.
    pub adc_samples: usize,
    /// DDC decimation factor along the readout axis.
    pub decimation: usize,
    pub num_averages: usize,
    /// Pause between consecutive averages in s.
    pub averaging_delay: f64,
}

impl Default for AcquisitionParameter {
    fn default() -> Self {
        Self {
            larmor_frequency: 2.0e6,
            b1_scaling: 1.0,
            fov_offset: Dimensions::ZERO,
            fov_scaling: Dimensions::splat(1.0),
            gradient_offset: Dimensions::ZERO,
            adc_samples: 512,
            decimation: 200,
            num_averages: 1,
            averaging_delay: 0.0,
        }
    }
}

impl AcquisitionParameter {
    /// Copy-update: returns a changed copy, leaving `self` untouched.
    pub fn updated(&self, change: impl FnOnce(&mut Self)) -> Self {
        let mut next = self.clone();
        change(&mut next);
        next
    }

    /// Stable content hash over the canonical postcard encoding.
    ///
    /// Equal iff the records are field-wise equal, and stable across
    /// processes, so cached unroll results can be keyed by it.
    pub fn hash(&self) -> Result<ParameterHash, Error> {
        let bytes = postcard::to_allocvec(self)?;
        let digest = Sha256::digest(&bytes);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        Ok(ParameterHash(hash))
    }
}

/// Content hash of an [`AcquisitionParameter`] record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParameterHash([u8; 32]);

/// Guarded copy-on-write cell for acquisition parameters shared between the
/// console surfaces and the controller.
///
/// Readers take an [`Arc`] snapshot at the start of a run; everything in that
/// run (hashing, unrolling, DDC) sees one consistent record regardless of
/// concurrent updates.
#[derive(Debug, Default)]
pub struct ParameterCell {
    inner: RwLock<Arc<AcquisitionParameter>>,
}

impl ParameterCell {
    pub fn new(parameter: AcquisitionParameter) -> Self {
        Self {
            inner: RwLock::new(Arc::new(parameter)),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<AcquisitionParameter> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Publish a changed copy of the current record.
    pub fn update(&self, change: impl FnOnce(&mut AcquisitionParameter)) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let next = guard.updated(change);
        *guard = Arc::new(next);
    }

    /// Replace the record wholesale.
    pub fn replace(&self, parameter: AcquisitionParameter) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(parameter);
    }
}

/// Process-global parameter cell, mirroring the console-wide parameter state.
pub fn global() -> &'static ParameterCell {
    static GLOBAL: OnceLock<ParameterCell> = OnceLock::new();
    GLOBAL.get_or_init(ParameterCell::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = AcquisitionParameter::default();
        let b = AcquisitionParameter::default();
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn hash_differs_per_field() {
        let base = AcquisitionParameter::default();
        let changed = [
            base.updated(|p| p.larmor_frequency += 1.0),
            base.updated(|p| p.b1_scaling = 0.5),
            base.updated(|p| p.fov_scaling.y = 2.0),
            base.updated(|p| p.gradient_offset.z = -10.0),
            base.updated(|p| p.decimation = 100),
            base.updated(|p| p.num_averages = 4),
        ];
        let base_hash = base.hash().unwrap();
        for (k, p) in changed.iter().enumerate() {
            assert_ne!(base_hash, p.hash().unwrap(), "variant {k}");
        }
    }

    #[test]
    fn updated_leaves_the_original_untouched() {
        let base = AcquisitionParameter::default();
        let next = base.updated(|p| p.num_averages = 8);
        assert_eq!(base.num_averages, 1);
        assert_eq!(next.num_averages, 8);
    }

    #[test]
    fn snapshots_are_isolated_from_updates() {
        let cell = ParameterCell::new(AcquisitionParameter::default());
        let before = cell.snapshot();
        cell.update(|p| p.larmor_frequency = 3.3e6);
        let after = cell.snapshot();
        assert_eq!(before.larmor_frequency, 2.0e6);
        assert_eq!(after.larmor_frequency, 3.3e6);
    }
}
