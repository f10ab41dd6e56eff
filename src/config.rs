//! Declarative device configuration.
//!
//! A single YAML file binds the three console components (sequence source,
//! transmit card, receive card) and carries their calibration. The core does
//! not talk to hardware itself; the calibration recorded here is what scales
//! float waveforms into int16 DAC codes and raw ADC codes back into mV.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Error;

/// System-wide RF timing floors.
///
/// Individual RF events may specify longer dead or ringdown times; the
/// unroller always applies the maximum of the event value and these floors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemTimings {
    /// Minimum delay between unblanking the amplifier and the pulse, in s.
    #[serde(default)]
    pub rf_dead_time: f64,
    /// Minimum coil ringdown period after each RF pulse, in s.
    #[serde(default)]
    pub rf_ringdown_time: f64,
}

/// Transmit card calibration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxConfig {
    /// Maximum absolute output per channel in mV, order `[rf, gx, gy, gz]`.
    pub output_limits: [f64; 4],
    /// Gradient power amplifier gain per channel in V/A.
    pub gpa_gain: [f64; 3],
    /// Gradient coil efficiency per channel in mT/m/A.
    pub gradient_efficiency: [f64; 3],
    /// Conversion from sequence RF amplitude to output millivolts.
    pub rf_to_mvolt: f64,
    /// Output sample period of the card in s.
    pub spcm_dwell_time: f64,
    /// Drive the gradient DC offsets against a high-impedance load.
    #[serde(default)]
    pub high_impedance: bool,
}

/// Receive card properties.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RxConfig {
    /// Number of digitiser channels (coils).
    pub num_channels: usize,
    /// Per-channel LSB to mV scaling.
    pub rx_scaling: Vec<f64>,
    /// Sampling period of the digitiser in s.
    pub spcm_dwell_time: f64,
}

/// Top-level configuration binding the console components.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub tx: TxConfig,
    pub rx: RxConfig,
    #[serde(default)]
    pub system: SystemTimings,
    /// Root directory the per-day session folders are created in.
    pub data_storage_path: PathBuf,
}

impl DeviceConfig {
    /// Read and validate a device configuration file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the unroller cannot work with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.tx.output_limits.iter().any(|&l| l <= 0.0) {
            return Err(Error::Config(
                "output limits must be positive for all four channels".into(),
            ));
        }
        if self.tx.gpa_gain.iter().any(|&g| g == 0.0)
            || self.tx.gradient_efficiency.iter().any(|&e| e == 0.0)
        {
            return Err(Error::Config(
                "gpa gain and gradient efficiency must be non-zero for all gradient channels"
                    .into(),
            ));
        }
        if self.tx.spcm_dwell_time <= 0.0 || self.rx.spcm_dwell_time <= 0.0 {
            return Err(Error::Config("card dwell times must be positive".into()));
        }
        if self.rx.num_channels == 0 {
            return Err(Error::Config("receive card needs at least one channel".into()));
        }
        if self.rx.rx_scaling.len() != self.rx.num_channels {
            return Err(Error::Config(format!(
                "rx scaling provides {} factors for {} channels",
                self.rx.rx_scaling.len(),
                self.rx.num_channels
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DeviceConfig {
        DeviceConfig {
            tx: TxConfig {
                output_limits: [200.0, 6000.0, 6000.0, 6000.0],
                gpa_gain: [4.7; 3],
                gradient_efficiency: [0.4e-3; 3],
                rf_to_mvolt: 1.0,
                spcm_dwell_time: 5e-8,
                high_impedance: false,
            },
            rx: RxConfig {
                num_channels: 1,
                rx_scaling: vec![0.2],
                spcm_dwell_time: 5e-8,
            },
            system: SystemTimings::default(),
            data_storage_path: PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn accepts_complete_calibration() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn rejects_missing_output_limit() {
        let mut cfg = config();
        cfg.tx.output_limits[2] = 0.0;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_channel_count_mismatch() {
        let mut cfg = config();
        cfg.rx.num_channels = 2;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn roundtrips_through_yaml() {
        let cfg = config();
        let text = serde_yaml::to_string(&cfg).unwrap();
        let back: DeviceConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.tx.output_limits, cfg.tx.output_limits);
        assert_eq!(back.rx.rx_scaling, cfg.rx.rx_scaling);
    }
}
