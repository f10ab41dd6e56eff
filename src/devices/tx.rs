//! Transmit card façade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::acquisition::parameter::Dimensions;
use crate::config::TxConfig;
use crate::sequence::unrolled::UnrolledSequence;
use crate::Error;

use super::{DacLink, DeviceError};

/// Façade over the transmit card.
///
/// Owns a replay worker that pushes the per-block frames of an
/// [`UnrolledSequence`] into the DAC's DMA ring, and the process-wide
/// gradient DC offset state.
///
/// # Note
///
/// The unrolled sequence is shared read-only with the worker; `stop_operation`
/// always joins the worker, so a card is never torn down mid-DMA.
pub struct TxCard {
    link: Arc<Mutex<Box<dyn DacLink>>>,
    config: TxConfig,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<(), DeviceError>>>,
}

impl TxCard {
    pub fn new(link: impl DacLink, config: TxConfig) -> Self {
        Self {
            link: Arc::new(Mutex::new(Box::new(link))),
            config,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Maximum absolute output per channel in mV, order `[rf, gx, gy, gz]`.
    pub fn output_limits(&self) -> [f64; 4] {
        self.config.output_limits
    }

    /// Begin asynchronous replay of an unrolled sequence.
    pub fn start_operation(&mut self, sequence: &Arc<UnrolledSequence>) -> Result<(), Error> {
        if self.worker.is_some() {
            return Err(Error::Device(DeviceError::new(
                "transmit replay already running",
            )));
        }
        self.stop.store(false, Ordering::SeqCst);

        let link = Arc::clone(&self.link);
        let stop = Arc::clone(&self.stop);
        let sequence = Arc::clone(sequence);
        log::debug!(
            target: "TxCard",
            "starting replay: {} blocks, {} samples per channel",
            sequence.num_blocks(),
            sequence.sample_count()
        );

        self.worker = Some(thread::spawn(move || {
            for frame in sequence.frames() {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let mut link = link
                    .lock()
                    .map_err(|_| DeviceError::new("dac link mutex poisoned"))?;
                link.replay(frame)?;
            }
            Ok(())
        }));
        Ok(())
    }

    /// Stop replay and join the worker. Idempotent.
    pub fn stop_operation(&mut self) -> Result<(), Error> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::Device(DeviceError::new("transmit worker panicked")))
                }
            }
        }
        Ok(())
    }

    /// Program the gradient DC offsets, checking the per-channel ceilings.
    pub fn set_gradient_offsets(
        &mut self,
        offsets: &Dimensions,
        high_impedance: bool,
    ) -> Result<(), Error> {
        let values = [offsets.x, offsets.y, offsets.z];
        for (channel, value) in values.iter().enumerate() {
            let limit = self.config.output_limits[channel + 1];
            if value.abs() > limit {
                return Err(Error::OutOfRange(format!(
                    "gradient offset ({value} mV) exceeds output limit ({limit} mV) of channel {}",
                    channel + 1
                )));
            }
        }
        let mut link = self
            .link
            .lock()
            .map_err(|_| DeviceError::new("dac link mutex poisoned"))?;
        link.write_dc_offsets(values, high_impedance)?;
        log::debug!(target: "TxCard", "gradient offsets set to {values:?} mV");
        Ok(())
    }
}

impl Drop for TxCard {
    fn drop(&mut self) {
        let _ = self.stop_operation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::unrolled::Parts;
    use std::sync::mpsc;

    struct RecordingDac {
        frames: mpsc::Sender<Vec<i16>>,
        offsets: mpsc::Sender<[f64; 3]>,
    }

    impl DacLink for RecordingDac {
        fn replay(&mut self, frame: &[i16]) -> Result<(), DeviceError> {
            self.frames.send(frame.to_vec()).ok();
            Ok(())
        }

        fn write_dc_offsets(
            &mut self,
            offsets_mv: [f64; 3],
            _high_impedance: bool,
        ) -> Result<(), DeviceError> {
            self.offsets.send(offsets_mv).ok();
            Ok(())
        }
    }

    fn config() -> TxConfig {
        TxConfig {
            output_limits: [200.0, 6000.0, 6000.0, 6000.0],
            gpa_gain: [1.0; 3],
            gradient_efficiency: [0.4e-3; 3],
            rf_to_mvolt: 1.0,
            spcm_dwell_time: 5e-8,
            high_impedance: false,
        }
    }

    fn sequence(frames: Vec<Vec<i16>>) -> Arc<UnrolledSequence> {
        let sample_count = frames.iter().map(|f| f.len() / 4).sum();
        Arc::new(UnrolledSequence::from_parts(Parts {
            seq: frames,
            adc_gate: vec![],
            rf_unblanking: vec![],
            reference: vec![],
            sample_count,
            dwell_time: 5e-8,
            larmor_frequency: 2e6,
            duration: sample_count as f64 * 5e-8,
            adc_count: 0,
            rf_to_mvolt: 1.0,
            gpa_gain: [1.0; 3],
            gradient_efficiency: [0.4e-3; 3],
        }))
    }

    #[test]
    fn replays_every_frame_in_order() {
        let (frame_tx, frame_rx) = mpsc::channel();
        let (offset_tx, _) = mpsc::channel();
        let mut card = TxCard::new(
            RecordingDac {
                frames: frame_tx,
                offsets: offset_tx,
            },
            config(),
        );

        let frames = vec![vec![1i16; 8], vec![2i16; 8], vec![3i16; 8]];
        card.start_operation(&sequence(frames.clone())).unwrap();

        let mut replayed = Vec::new();
        for _ in 0..frames.len() {
            replayed.push(
                frame_rx
                    .recv_timeout(std::time::Duration::from_secs(5))
                    .unwrap(),
            );
        }
        card.stop_operation().unwrap();
        assert_eq!(replayed, frames);
    }

    #[test]
    fn offset_ceiling_is_enforced() {
        let (frame_tx, _frame_rx) = mpsc::channel();
        let (offset_tx, offset_rx) = mpsc::channel();
        let mut card = TxCard::new(
            RecordingDac {
                frames: frame_tx,
                offsets: offset_tx,
            },
            config(),
        );

        assert!(matches!(
            card.set_gradient_offsets(&Dimensions::new(0.0, 0.0, 6001.0), false),
            Err(Error::OutOfRange(_))
        ));
        card.set_gradient_offsets(&Dimensions::new(100.0, -200.0, 0.0), false)
            .unwrap();
        assert_eq!(offset_rx.try_recv().unwrap(), [100.0, -200.0, 0.0]);
    }
}
