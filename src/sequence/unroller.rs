//! Sequence unrolling: block events to interleaved card samples.
//!
//! Every block of duration `d` becomes one frame of `4 · round(d / dwell)`
//! int16 samples in channel order `[rf, gx, gy, gz]`. RF envelopes are
//! resampled to the card raster and mixed onto a carrier whose phase is
//! continuous across the whole sequence; gradients are rasterised in mV and
//! quantised against the per-channel output limits; the ADC gate, phase
//! reference and RF unblanking lines are folded into bit 15 of the three
//! gradient slots.

use std::f64::consts::TAU;

use num_complex::Complex64;

use crate::acquisition::parameter::{AcquisitionParameter, Dimensions};
use crate::config::{SystemTimings, TxConfig};
use crate::dsp;
use crate::sequence::unrolled::{Parts, UnrolledSequence};
use crate::sequence::{AdcEvent, BlockSequence, GradientAxis, GradientEvent, GradientShape, RfPulse};
use crate::{Error, GAMMA_HZ_PER_MT, INT16_MAX};

/// Highest supported carrier frequency.
const MAX_LARMOR_FREQUENCY: f64 = 10e6;

/// Unrolls block-event sequences into spectrum-card replay data.
///
/// Holds the transmit calibration; the per-acquisition knobs (carrier
/// frequency, B1 and FoV scaling, gradient offsets) come in with the
/// [`AcquisitionParameter`] snapshot on every call.
#[derive(Clone, Debug)]
pub struct SequenceUnroller {
    output_limits: [f64; 4],
    gpa_gain: [f64; 3],
    gradient_efficiency: [f64; 3],
    rf_to_mvolt: f64,
    dwell_time: f64,
    f_spcm: f64,
    system: SystemTimings,
}

impl SequenceUnroller {
    pub fn new(tx: &TxConfig, system: SystemTimings) -> Self {
        Self {
            output_limits: tx.output_limits,
            gpa_gain: tx.gpa_gain,
            gradient_efficiency: tx.gradient_efficiency,
            rf_to_mvolt: tx.rf_to_mvolt,
            dwell_time: tx.spcm_dwell_time,
            f_spcm: 1.0 / tx.spcm_dwell_time,
            system,
        }
    }

    /// Unroll `sequence` into interleaved int16 replay data.
    ///
    /// # Errors
    ///
    /// * [`Error::OutOfRange`] - carrier above 10 MHz, an RF or gradient
    ///   amplitude beyond its output limit, or a gradient offset beyond its
    ///   channel limit.
    /// * [`Error::EmptySequence`] - no block events.
    /// * [`Error::Config`] - missing output limits.
    /// * [`Error::BufferOverflow`] - an event extends past its block budget.
    /// * [`Error::InvalidBlock`] - malformed gradient event.
    pub fn unroll(
        &self,
        sequence: &BlockSequence,
        params: &AcquisitionParameter,
    ) -> Result<UnrolledSequence, Error> {
        let larmor = params.larmor_frequency;
        if larmor > MAX_LARMOR_FREQUENCY {
            return Err(Error::OutOfRange(format!(
                "larmor frequency is above 10 MHz: {} MHz",
                larmor * 1e-6
            )));
        }
        if sequence.blocks.is_empty() {
            return Err(Error::EmptySequence);
        }
        if self.output_limits.iter().any(|&l| l <= 0.0) {
            return Err(Error::Config(
                "output limits must be provided for all four channels".into(),
            ));
        }
        self.check_offsets(&params.gradient_offset)?;

        let samples_per_block: Vec<usize> = sequence
            .blocks
            .iter()
            .map(|b| (b.duration / self.dwell_time).round() as usize)
            .collect();

        let mut frames: Vec<Vec<i16>> =
            samples_per_block.iter().map(|&n| vec![0; 4 * n]).collect();
        let mut adc_gate: Vec<Vec<i16>> = samples_per_block.iter().map(|&n| vec![0; n]).collect();
        let mut unblanking = adc_gate.clone();
        let mut reference = adc_gate.clone();

        let mut sample_count = 0usize;
        let mut adc_count = 0usize;
        let mut rf_start_sample_pos: Option<usize> = None;

        for (k, (block, &n_samples)) in
            sequence.blocks.iter().zip(&samples_per_block).enumerate()
        {
            if n_samples == 0 {
                continue;
            }
            let frame = &mut frames[k];

            // Gradient DC offsets persist through every block.
            for axis in GradientAxis::ALL {
                let offset = params.gradient_offset.axis(axis);
                if offset != 0.0 {
                    let idx = axis.channel();
                    let code = dsp::checked_i16(offset / self.output_limits[idx] * INT16_MAX);
                    for slot in frame[idx..].iter_mut().step_by(4) {
                        *slot = code;
                    }
                }
            }

            if let Some(rf) = &block.rf {
                if !rf.signal.is_empty() {
                    let anchor = *rf_start_sample_pos.get_or_insert(sample_count);
                    self.unroll_rf(
                        k,
                        rf,
                        frame,
                        &mut unblanking[k],
                        params.b1_scaling,
                        larmor,
                        sample_count,
                        anchor,
                    )?;
                }
            }

            if let Some(adc) = &block.adc {
                self.add_adc_gate(k, adc, &mut adc_gate[k], &mut reference[k], larmor, sample_count)?;
                adc_count += 1;
            }

            for axis in GradientAxis::ALL {
                if let Some(gradient) = block.gradient(axis) {
                    if gradient.channel != axis {
                        return Err(Error::InvalidBlock(format!(
                            "block {k}: gradient in the {axis:?} slot declares channel {:?}",
                            gradient.channel
                        )));
                    }
                    self.unroll_gradient(k, gradient, frame, params.fov_scaling.axis(axis))?;
                }
            }

            // Fold the digital lines into bit 15, demoting the analog values
            // to int16 >> 1 form. The RF slot stays a plain int16 channel.
            pack_digital(frame, 1, &adc_gate[k]);
            pack_digital(frame, 2, &reference[k]);
            pack_digital(frame, 3, &unblanking[k]);

            sample_count += n_samples;
        }

        log::debug!(
            target: "SeqProv",
            "unrolled sequence; total sample points: {}, block events: {}",
            sample_count,
            sequence.blocks.len()
        );

        Ok(UnrolledSequence::from_parts(Parts {
            seq: frames,
            adc_gate,
            rf_unblanking: unblanking,
            reference,
            sample_count,
            dwell_time: self.dwell_time,
            larmor_frequency: larmor,
            duration: sample_count as f64 * self.dwell_time,
            adc_count,
            rf_to_mvolt: self.rf_to_mvolt,
            gpa_gain: self.gpa_gain,
            gradient_efficiency: self.gradient_efficiency,
        }))
    }

    fn check_offsets(&self, offset: &Dimensions) -> Result<(), Error> {
        for axis in GradientAxis::ALL {
            let limit = self.output_limits[axis.channel()];
            let value = offset.axis(axis);
            if value.abs() > limit {
                return Err(Error::OutOfRange(format!(
                    "{axis:?} gradient offset ({value} mV) exceeds output limit ({limit} mV)"
                )));
            }
        }
        Ok(())
    }

    /// Mix the resampled RF envelope onto the carrier and write it into the
    /// RF slot of `frame`; raises the unblanking line around the pulse.
    #[allow(clippy::too_many_arguments)]
    fn unroll_rf(
        &self,
        block_index: usize,
        rf: &RfPulse,
        frame: &mut [i16],
        unblanking: &mut [i16],
        b1_scaling: f64,
        larmor: f64,
        sample_count: usize,
        rf_start_sample_pos: usize,
    ) -> Result<(), Error> {
        let n_block = frame.len() / 4;
        let samples_delay =
            (self.system.rf_dead_time.max(rf.dead_time).max(rf.delay) * self.f_spcm) as usize;
        let num_samples = (rf.shape_dur * self.f_spcm) as usize;
        let samples_ringdown =
            (self.system.rf_ringdown_time.max(rf.ringdown_time) * self.f_spcm) as usize;

        let end = samples_delay + num_samples;
        if end > n_block {
            return Err(Error::BufferOverflow {
                block: block_index,
                needed: end,
                budget: n_block,
            });
        }

        // Unblank the power amplifier from the pulse delay until the
        // ringdown guard before the block end.
        let unblank_end = n_block.saturating_sub(samples_ringdown + 1);
        if samples_delay < unblank_end {
            for v in &mut unblanking[samples_delay..unblank_end] {
                *v = 1;
            }
        }

        // Amplitude check happens on the scaled envelope, before
        // quantisation and resampling.
        let rf_scaling = b1_scaling * self.rf_to_mvolt / self.output_limits[0];
        let phase = Complex64::from_polar(1.0, rf.phase_offset);
        let scaled: Vec<Complex64> = rf
            .signal
            .iter()
            .map(|&s| s * phase * rf_scaling)
            .collect();
        let peak = scaled.iter().map(|c| c.norm()).fold(0.0, f64::max);
        if peak > 1.0 {
            return Err(Error::OutOfRange(format!(
                "RF magnitude ({peak:.3} of full scale) exceeds output limit in block {block_index}"
            )));
        }

        let full_scale: Vec<Complex64> = scaled.iter().map(|&c| c * INT16_MAX).collect();
        let envelope = dsp::resample(&full_scale, num_samples);

        // Carrier phase: local time restarts at zero in every RF block; the
        // constant term anchors the phase to the absolute sample position
        // relative to the first RF event of the sequence, which is what makes
        // the carrier continuous across blocks. Block frequency offsets only
        // multiply local time, so they do not accumulate between blocks.
        let carrier_phase_offset =
            (sample_count + samples_delay - rf_start_sample_pos) as f64 * self.dwell_time;
        let f_carrier = larmor + rf.freq_offset;
        for (m, env) in envelope.iter().enumerate() {
            let t = m as f64 * self.dwell_time;
            let carrier =
                Complex64::from_polar(1.0, TAU * (f_carrier * t + larmor * carrier_phase_offset));
            frame[4 * (samples_delay + m)] = dsp::saturate_i16((env * carrier).re);
        }
        Ok(())
    }

    /// Raise the ADC gate over the acquisition window and fill the digital
    /// phase reference over the whole block.
    fn add_adc_gate(
        &self,
        block_index: usize,
        adc: &AdcEvent,
        gate: &mut [i16],
        reference: &mut [i16],
        larmor: f64,
        sample_count: usize,
    ) -> Result<(), Error> {
        let delay = ((adc.delay * self.f_spcm) as usize).max((adc.dead_time * self.f_spcm) as usize);
        let adc_len = (adc.num_samples as f64 * adc.dwell * self.f_spcm).round() as usize;
        let end = delay + adc_len;
        if end > gate.len() {
            return Err(Error::BufferOverflow {
                block: block_index,
                needed: end,
                budget: gate.len(),
            });
        }
        for v in &mut gate[delay..end] {
            *v = 1;
        }

        // 50% duty square, phase locked to the transmit carrier through the
        // absolute sample position.
        for (m, v) in reference.iter_mut().enumerate() {
            let t = (sample_count + m) as f64 * self.dwell_time;
            if (TAU * larmor * t).sin() > 0.0 {
                *v = 1;
            }
        }
        Ok(())
    }

    /// Rasterise one gradient event in mV, check it against the channel
    /// limit including the standing DC offset, and add the quantised
    /// waveform into its interleave slot.
    fn unroll_gradient(
        &self,
        block_index: usize,
        gradient: &GradientEvent,
        frame: &mut [i16],
        fov_scaling: f64,
    ) -> Result<(), Error> {
        let idx = gradient.channel.channel();
        let n_block = frame.len() / 4;
        let samples_delay = (gradient.delay * self.f_spcm) as usize;
        let limit = self.output_limits[idx];

        // DC offset already standing in the slot, in mV.
        let offset_mv = frame[idx] as f64 / INT16_MAX * limit;
        let scaling = fov_scaling
            / (GAMMA_HZ_PER_MT * self.gpa_gain[idx - 1] * self.gradient_efficiency[idx - 1]);
        let int_scale = INT16_MAX / limit;

        let waveform: Vec<i16> = match &gradient.shape {
            GradientShape::Trapezoid {
                rise_time,
                flat_time,
                fall_time,
                amplitude,
            } => {
                let flat_mv = amplitude * scaling;
                if flat_mv.abs() + offset_mv.abs() > limit {
                    return Err(Error::OutOfRange(format!(
                        "amplitude of the {:?} gradient ({flat_mv:.1} mV + {offset_mv:.1} mV offset) \
                         exceeds output limit ({limit} mV) of channel {idx}",
                        gradient.channel
                    )));
                }
                let flat_code = dsp::checked_i16(flat_mv * int_scale);
                let n_rise = (rise_time / self.dwell_time) as usize;
                let n_flat = (flat_time / self.dwell_time) as usize;
                let n_fall = (fall_time / self.dwell_time) as usize;

                let mut wf = Vec::with_capacity(n_rise + n_flat + n_fall);
                wf.extend(linspace_i16(0, flat_code, n_rise));
                wf.extend(std::iter::repeat(flat_code).take(n_flat));
                wf.extend(linspace_i16(flat_code, 0, n_fall));
                wf
            }
            GradientShape::Arbitrary {
                shape_dur,
                tt,
                waveform,
            } => {
                if tt.len() != waveform.len() || tt.is_empty() {
                    return Err(Error::InvalidBlock(format!(
                        "block {block_index}: arbitrary gradient with {} time points for {} values",
                        tt.len(),
                        waveform.len()
                    )));
                }
                let scaled: Vec<f64> = waveform.iter().map(|w| w * scaling).collect();
                let peak = scaled.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
                if peak + offset_mv.abs() > limit {
                    return Err(Error::OutOfRange(format!(
                        "amplitude of the {:?} gradient ({peak:.1} mV + {offset_mv:.1} mV offset) \
                         exceeds output limit ({limit} mV) of channel {idx}",
                        gradient.channel
                    )));
                }
                let num = (shape_dur / self.dwell_time).round() as usize;
                dsp::linear_interp(tt, &scaled, num)
                    .into_iter()
                    .map(|v| dsp::checked_i16(v * int_scale))
                    .collect()
            }
        };

        let end = samples_delay + waveform.len();
        if end > n_block {
            return Err(Error::BufferOverflow {
                block: block_index,
                needed: end,
                budget: n_block,
            });
        }

        // Additive so that several events on one channel in one block sum.
        for (i, &w) in waveform.iter().enumerate() {
            let slot = &mut frame[4 * (samples_delay + i) + idx];
            *slot = slot.saturating_add(w);
        }
        Ok(())
    }
}

/// Endpoint-inclusive integer ramp, the int16 analogue of `linspace`.
fn linspace_i16(start: i16, stop: i16, num: usize) -> Vec<i16> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..num)
            .map(|i| {
                let f = i as f64 / (num - 1) as f64;
                dsp::checked_i16(start as f64 + (stop as f64 - start as f64) * f)
            })
            .collect(),
    }
}

/// Fold a digital line into bit 15 of one interleaved channel slot.
fn pack_digital(frame: &mut [i16], slot: usize, line: &[i16]) {
    for (sample, &bit) in frame[slot..].iter_mut().step_by(4).zip(line) {
        *sample = (((*sample as u16) >> 1) | ((bit as u16) << 15)) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Block;

    const DWELL: f64 = 5e-8;

    fn unroller() -> SequenceUnroller {
        SequenceUnroller::new(
            &TxConfig {
                output_limits: [200.0, 6000.0, 6000.0, 6000.0],
                gpa_gain: [1.0; 3],
                gradient_efficiency: [0.4e-3; 3],
                rf_to_mvolt: 1.0,
                spcm_dwell_time: DWELL,
                high_impedance: false,
            },
            SystemTimings::default(),
        )
    }

    fn params() -> AcquisitionParameter {
        AcquisitionParameter {
            larmor_frequency: 2e6,
            ..AcquisitionParameter::default()
        }
    }

    fn rect_rf(delay: f64, shape_dur: f64, amplitude: f64, raster_points: usize) -> RfPulse {
        RfPulse {
            delay,
            shape_dur,
            signal: vec![Complex64::new(amplitude, 0.0); raster_points],
            ..RfPulse::default()
        }
    }

    #[test]
    fn empty_sequence_is_rejected() {
        let seq = BlockSequence::new("empty", vec![]);
        assert!(matches!(
            unroller().unroll(&seq, &params()),
            Err(Error::EmptySequence)
        ));
    }

    #[test]
    fn larmor_above_ten_megahertz_is_rejected() {
        let seq = BlockSequence::new("delay", vec![Block::delay(1e-4)]);
        let p = AcquisitionParameter {
            larmor_frequency: 10.5e6,
            ..params()
        };
        assert!(matches!(
            unroller().unroll(&seq, &p),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn offset_beyond_limit_is_rejected() {
        let seq = BlockSequence::new("delay", vec![Block::delay(1e-4)]);
        let p = AcquisitionParameter {
            gradient_offset: Dimensions::new(0.0, 6500.0, 0.0),
            ..params()
        };
        assert!(matches!(
            unroller().unroll(&seq, &p),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn single_trapezoid_unrolls_to_staircase() {
        // 1 ms block at 20 MS/s, symmetric 100 us trapezoid of 1 kHz/m.
        let trap = GradientEvent {
            channel: GradientAxis::X,
            delay: 0.0,
            shape: GradientShape::Trapezoid {
                rise_time: 100e-6,
                flat_time: 100e-6,
                fall_time: 100e-6,
                amplitude: 1e3,
            },
        };
        let seq = BlockSequence::new(
            "trap",
            vec![Block {
                gx: Some(trap),
                duration: 1e-3,
                ..Block::default()
            }],
        );
        let u = unroller().unroll(&seq, &params()).unwrap();

        assert_eq!(u.frame(0).len(), 4 * 20_000);
        assert_eq!(u.sample_count(), 20_000);

        let expected = (INT16_MAX * (1e3 / (GAMMA_HZ_PER_MT * 1.0 * 0.4e-3)) / 6000.0).round();
        let gx = u.gx(0);
        // Rise, flat, fall at 2000 samples each; packing costs the LSB.
        assert_eq!(gx[0], 0);
        assert!((gx[1000] as f64 - expected / 2.0).abs() <= 2.0);
        for &v in &gx[2000..4000] {
            assert!((v as f64 - expected).abs() <= 1.0, "flat sample {v}");
        }
        assert!((gx[5000] as f64 - expected / 2.0).abs() <= 2.0);
        for &v in &gx[6000..] {
            assert_eq!(v, 0);
        }
        // No ADC event: gate bits all low.
        assert!(u.adc_gate_bits(0).iter().all(|&b| b == 0));
    }

    #[test]
    fn rect_rf_peaks_at_half_scale() {
        // Envelope 100 with rf_to_mvolt 1 and a 200 mV limit scales to 0.5.
        let rf = rect_rf(10e-6, 100e-6, 100.0, 200);
        let rf = RfPulse {
            ringdown_time: 20e-6,
            ..rf
        };
        let seq = BlockSequence::new(
            "rect",
            vec![Block {
                rf: Some(rf),
                duration: 200e-6,
                ..Block::default()
            }],
        );
        let u = unroller().unroll(&seq, &params()).unwrap();

        let rf_channel = u.rf(0);
        let peak = rf_channel.iter().map(|&v| v.abs() as i32).max().unwrap();
        let expected = (0.5 * INT16_MAX).round() as i32;
        assert!((peak - expected).abs() <= 2, "peak {peak} vs {expected}");

        // Pulse occupies samples 200..2200; nothing before the delay.
        assert!(rf_channel[..200].iter().all(|&v| v == 0));
        assert!(rf_channel[2200..].iter().all(|&v| v == 0));

        // Unblanking spans delay .. block end - ringdown - 1.
        let unblank = u.rf_unblanking_bits(0);
        assert_eq!(unblank[199], 0);
        assert_eq!(unblank[200], 1);
        assert_eq!(unblank[3598], 1);
        assert_eq!(unblank[3599], 0);
    }

    #[test]
    fn rf_exceeding_full_scale_is_rejected() {
        // Envelope 250 against a 200 mV limit crosses full scale.
        let seq = BlockSequence::new(
            "hot",
            vec![Block {
                rf: Some(rect_rf(0.0, 100e-6, 250.0, 100)),
                duration: 200e-6,
                ..Block::default()
            }],
        );
        assert!(matches!(
            unroller().unroll(&seq, &params()),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn rf_longer_than_block_overflows() {
        let seq = BlockSequence::new(
            "overflow",
            vec![Block {
                rf: Some(rect_rf(0.0, 300e-6, 100.0, 100)),
                duration: 200e-6,
                ..Block::default()
            }],
        );
        assert!(matches!(
            unroller().unroll(&seq, &params()),
            Err(Error::BufferOverflow { .. })
        ));
    }

    #[test]
    fn carrier_phase_is_continuous_across_blocks() {
        // Two identical pulses separated by a delay block whose length is
        // deliberately not a whole number of carrier cycles.
        let make_rf = || rect_rf(0.0, 2.5e-6, 100.0, 50);
        let blocks = vec![
            Block {
                rf: Some(make_rf()),
                duration: 5.25e-6, // 105 samples
                ..Block::default()
            },
            Block::delay(1.6e-6), // 32 samples
            Block {
                rf: Some(make_rf()),
                duration: 5.25e-6,
                ..Block::default()
            },
        ];
        let seq = BlockSequence::new("train", blocks);
        let p = params();
        let u = unroller().unroll(&seq, &p).unwrap();

        // First sample of the second pulse sits at absolute sample 137.
        let t_first = 137.0 * DWELL;
        let amplitude = 0.5 * INT16_MAX;
        let expected = (amplitude * (TAU * p.larmor_frequency * t_first).cos()).round() as i16;
        let rf2 = u.rf(2);
        assert!(
            (rf2[0] as i32 - expected as i32).abs() <= 2,
            "block 2 first sample {} vs {expected}",
            rf2[0]
        );

        // And the first pulse starts at the anchor with zero extra phase.
        let rf0 = u.rf(0);
        let expected0 = amplitude.round() as i16;
        assert!((rf0[0] as i32 - expected0 as i32).abs() <= 2);
    }

    #[test]
    fn adc_gate_and_reference_cover_the_window() {
        let adc = AdcEvent {
            delay: 10e-6,
            dead_time: 0.0,
            num_samples: 64,
            dwell: 2.5e-6, // 64 * 2.5 us = 160 us -> 3200 card samples
        };
        let seq = BlockSequence::new(
            "adc",
            vec![Block {
                adc: Some(adc),
                duration: 200e-6,
                ..Block::default()
            }],
        );
        let p = params();
        let u = unroller().unroll(&seq, &p).unwrap();
        assert_eq!(u.adc_count(), 1);

        let gate = u.adc_gate_bits(0);
        assert!(gate[..200].iter().all(|&b| b == 0));
        assert!(gate[200..3400].iter().all(|&b| b == 1));
        assert!(gate[3400..].iter().all(|&b| b == 0));

        // Reference square follows the sign of the carrier sine everywhere.
        let reference = u.reference_bits(0);
        for (m, &bit) in reference.iter().enumerate() {
            let expected = ((TAU * p.larmor_frequency * m as f64 * DWELL).sin() > 0.0) as i16;
            assert_eq!(bit, expected, "reference sample {m}");
        }
    }

    #[test]
    fn dc_offsets_stand_in_every_block_and_add_to_gradients() {
        let p = AcquisitionParameter {
            gradient_offset: Dimensions::new(600.0, 0.0, -300.0),
            ..params()
        };
        let seq = BlockSequence::new(
            "offsets",
            vec![Block::delay(5e-6), Block::delay(5e-6)],
        );
        let u = unroller().unroll(&seq, &p).unwrap();

        let x_code = ((600.0 / 6000.0) * INT16_MAX).round() as i16;
        let z_code = ((-300.0 / 6000.0) * INT16_MAX).round() as i16;
        for block in 0..2 {
            for &v in &u.gx(block) {
                assert!((v as i32 - x_code as i32).abs() <= 1);
            }
            assert!(u.gy(block).iter().all(|&v| v == 0));
            for &v in &u.gz(block) {
                assert!((v as i32 - z_code as i32).abs() <= 1);
            }
        }
    }

    #[test]
    fn arbitrary_gradient_interpolates_onto_the_raster() {
        // Triangle described by three breakpoints, 100 us long.
        let grad = GradientEvent {
            channel: GradientAxis::Y,
            delay: 0.0,
            shape: GradientShape::Arbitrary {
                shape_dur: 100e-6,
                tt: vec![0.0, 50e-6, 100e-6],
                waveform: vec![0.0, 1e3, 0.0],
            },
        };
        let seq = BlockSequence::new(
            "arb",
            vec![Block {
                gy: Some(grad),
                duration: 150e-6,
                ..Block::default()
            }],
        );
        let u = unroller().unroll(&seq, &params()).unwrap();

        let expected = (INT16_MAX * (1e3 / (GAMMA_HZ_PER_MT * 1.0 * 0.4e-3)) / 6000.0).round();
        let gy = u.gy(0);
        assert!((gy[1000] as f64 - expected).abs() <= 2.0, "apex {}", gy[1000]);
        assert!((gy[500] as f64 - expected / 2.0).abs() <= 2.0);
        assert!(gy[2000..].iter().all(|&v| v == 0));
    }

    #[test]
    fn mismatched_gradient_slot_is_invalid() {
        let grad = GradientEvent {
            channel: GradientAxis::Z,
            delay: 0.0,
            shape: GradientShape::Trapezoid {
                rise_time: 10e-6,
                flat_time: 10e-6,
                fall_time: 10e-6,
                amplitude: 1e3,
            },
        };
        let seq = BlockSequence::new(
            "slot",
            vec![Block {
                gx: Some(grad),
                duration: 100e-6,
                ..Block::default()
            }],
        );
        assert!(matches!(
            unroller().unroll(&seq, &params()),
            Err(Error::InvalidBlock(_))
        ));
    }
}
