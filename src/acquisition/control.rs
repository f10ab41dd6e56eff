//! Acquisition control: orchestrates unrolling, TX replay and RX capture.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Local;

use crate::acquisition::data::{AcquisitionData, SequenceInfo};
use crate::acquisition::parameter::{AcquisitionParameter, Dimensions, ParameterCell, ParameterHash};
use crate::config::DeviceConfig;
use crate::devices::{AdcLink, DacLink, DeviceError, RxCard, TxCard};
use crate::dsp::ddc::PostProcessor;
use crate::sequence::unrolled::UnrolledSequence;
use crate::sequence::unroller::SequenceUnroller;
use crate::sequence::{BlockSequence, SequenceHandle, SequenceParser};
use crate::Error;

/// Settle time between arming the receiver and starting replay.
const RX_SETTLE: Duration = Duration::from_millis(10);
/// Head room added to the replay duration for the per-average gate deadline.
const TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Orchestrates one acquisition at a time.
///
/// Owns the two card façades and the unroller. A sequence is set once with
/// [`AcquisitionControl::set_sequence`]; every [`AcquisitionControl::run`]
/// takes a parameter snapshot, re-unrolls only when the parameter hash
/// changed, and drives `num_averages` rounds of RX capture + TX replay
/// followed by the DDC pipeline.
pub struct AcquisitionControl {
    unroller: SequenceUnroller,
    tx: TxCard,
    rx: RxCard,
    parameters: Arc<ParameterCell>,
    parser: Option<Box<dyn SequenceParser>>,
    session_dir: PathBuf,
    sequence: Option<BlockSequence>,
    unrolled: Option<Arc<UnrolledSequence>>,
    param_hash: Option<ParameterHash>,
    high_impedance: bool,
    running: bool,
}

impl AcquisitionControl {
    /// Bind the console components and create the per-day session directory.
    pub fn new(
        config: &DeviceConfig,
        dac: impl DacLink,
        adc: impl AdcLink,
        parameters: Arc<ParameterCell>,
        parser: Option<Box<dyn SequenceParser>>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let session_dir = config
            .data_storage_path
            .join(format!("{}-session", Local::now().format("%Y-%m-%d")));
        fs::create_dir_all(&session_dir)?;
        log::info!(
            target: "AcqCtrl",
            "acquisition control started, session directory {}",
            session_dir.display()
        );

        Ok(Self {
            unroller: SequenceUnroller::new(&config.tx, config.system),
            tx: TxCard::new(dac, config.tx.clone()),
            rx: RxCard::new(adc, config.rx.clone()),
            parameters,
            parser,
            session_dir,
            sequence: None,
            unrolled: None,
            param_hash: None,
            high_impedance: config.tx.high_impedance,
            running: false,
        })
    }

    /// Session directory acquisitions of this control default to.
    pub fn session_dir(&self) -> &PathBuf {
        &self.session_dir
    }

    /// Set the sequence to acquire with and unroll it against the current
    /// parameter snapshot.
    ///
    /// Accepts a parsed [`BlockSequence`] or a `.seq` path resolved through
    /// the bound [`SequenceParser`].
    pub fn set_sequence(&mut self, sequence: impl Into<SequenceHandle>) -> Result<(), Error> {
        let sequence = match sequence.into() {
            SequenceHandle::Parsed(seq) => seq,
            SequenceHandle::File(path) => {
                if path.extension().and_then(|e| e.to_str()) != Some("seq") {
                    return Err(Error::Config(format!(
                        "invalid sequence file {}: expected a .seq file",
                        path.display()
                    )));
                }
                let parser = self
                    .parser
                    .as_ref()
                    .ok_or_else(|| Error::Config("no sequence parser bound".into()))?;
                let mut seq = parser.parse(&path)?;
                if seq.source_text.is_none() {
                    seq.source_text = fs::read_to_string(&path).ok();
                }
                seq
            }
        };

        let params = self.parameters.snapshot();
        log::info!(target: "AcqCtrl", "unrolling sequence: {}", sequence.name);
        let unrolled = Arc::new(self.unroller.unroll(&sequence, &params)?);
        log::info!(target: "AcqCtrl", "sequence duration: {} s", unrolled.duration());

        self.param_hash = Some(params.hash()?);
        self.unrolled = Some(unrolled);
        self.sequence = Some(sequence);
        Ok(())
    }

    /// The cached unrolled sequence, if a sequence is set.
    pub fn unrolled(&self) -> Option<&Arc<UnrolledSequence>> {
        self.unrolled.as_ref()
    }

    /// Run one acquisition job.
    ///
    /// Re-unrolls when the parameter hash changed since the last unroll,
    /// programs the gradient DC offsets, then per average: arm RX, settle,
    /// start TX, wait for the gate count (deadline 5 s + replay duration,
    /// timeouts degrade to a warning), run the DDC pipeline and stop both
    /// cards. Offsets are restored to zero on every path out.
    pub fn run(&mut self) -> Result<AcquisitionData, Error> {
        if self.running {
            return Err(Error::Device(DeviceError::new(
                "acquisition already in progress",
            )));
        }
        if self.sequence.is_none() || self.unrolled.is_none() {
            return Err(Error::Config(
                "no sequence set, call set_sequence to set a sequence first".into(),
            ));
        }

        let params = self.parameters.snapshot();
        let hash = params.hash()?;
        if self.param_hash != Some(hash) {
            // Acquisition parameters changed since the last unroll.
            let unrolled = {
                let sequence = self
                    .sequence
                    .as_ref()
                    .ok_or_else(|| Error::Config("no sequence set".into()))?;
                log::info!(target: "AcqCtrl", "re-unrolling sequence: {}", sequence.name);
                Arc::new(self.unroller.unroll(sequence, &params)?)
            };
            log::info!(target: "AcqCtrl", "sequence duration: {} s", unrolled.duration());
            self.unrolled = Some(unrolled);
            self.param_hash = Some(hash);
        }
        let unrolled = Arc::clone(
            self.unrolled
                .as_ref()
                .ok_or_else(|| Error::Config("no unrolled sequence".into()))?,
        );

        self.running = true;
        let result = self.run_averages(&params, &unrolled);

        // Tear-down happens on every path: restore the offsets and make sure
        // neither card is left running before errors propagate.
        let restore = self
            .tx
            .set_gradient_offsets(&Dimensions::ZERO, self.high_impedance);
        let tx_stop = self.tx.stop_operation();
        let rx_stop = self.rx.stop_operation();
        self.running = false;

        let post = result?;
        restore?;
        tx_stop?;
        rx_stop?;

        // Every gate-length bucket must have collected one row per average.
        let rows = post.rows();
        if rows.is_empty() || rows.iter().any(|&r| r != params.num_averages) {
            return Err(Error::MissingAverage {
                got: rows,
                expected: params.num_averages,
            });
        }

        let (raw, unprocessed) = post.into_parts();
        let sequence = self
            .sequence
            .as_ref()
            .ok_or_else(|| Error::Config("no sequence set".into()))?;
        Ok(AcquisitionData::new(
            raw,
            unprocessed,
            SequenceInfo {
                name: sequence.name.clone(),
                duration: unrolled.duration(),
                text: sequence.source_text.clone(),
            },
            (*params).clone(),
            params.decimation as f64 / self.rx.sample_rate(),
            self.session_dir.clone(),
        ))
    }

    fn run_averages(
        &mut self,
        params: &AcquisitionParameter,
        unrolled: &Arc<UnrolledSequence>,
    ) -> Result<PostProcessor, Error> {
        let mut post = PostProcessor::new();
        let timeout = TIMEOUT_MARGIN + Duration::from_secs_f64(unrolled.duration());
        let f_spcm = self.rx.sample_rate();

        self.tx
            .set_gradient_offsets(&params.gradient_offset, self.high_impedance)?;

        for k in 0..params.num_averages {
            log::info!(target: "AcqCtrl", "acquisition {}/{}", k + 1, params.num_averages);

            self.rx.start_operation()?;
            thread::sleep(RX_SETTLE);
            self.tx.start_operation(unrolled)?;

            let received = self.rx.wait_for_gates(unrolled.adc_count(), timeout);
            if received < unrolled.adc_count() {
                log::warn!(
                    target: "AcqCtrl",
                    "acquisition timeout: only received {}/{} adc events",
                    received,
                    unrolled.adc_count()
                );
            }

            let gates = self.rx.data();
            if !gates.is_empty() {
                post.process(
                    &gates,
                    self.rx.rx_scaling(),
                    params.larmor_frequency,
                    f_spcm,
                    params.decimation,
                )?;
            }

            self.tx.stop_operation()?;
            self.rx.stop_operation()?;

            if params.averaging_delay > 0.0 {
                thread::sleep(Duration::from_secs_f64(params.averaging_delay));
            }
        }
        Ok(post)
    }
}
