//! Digital down-conversion of raw ADC gates.
//!
//! Each captured gate is an int16 array `[n_coils, n_ro]` with the phase
//! reference square smuggled through bit 15 of coil 0. Per average the
//! pipeline:
//!
//! 1. groups gates by readout length (first-occurrence order) and stacks each
//!    group along a new phase-encoding axis,
//! 2. extracts the reference, strips the digital bit from coil 0, scales all
//!    coils to mV and appends the reference as an extra coil,
//! 3. keeps the reference-augmented real data as "unprocessed",
//! 4. demodulates every coil (reference included) at the carrier frequency,
//! 5. decimates along the readout axis with a zero-phase FIR lowpass,
//! 6. rotates every signal coil by the negated reference phase and drops the
//!    reference coil,
//! 7. stacks the result onto the bucket's averages axis.
//!
//! Because the reference is demodulated with the same oscillator as the
//! signal, its baseband phase *is* the TX-RX phase relation; step 6 removes
//! it from every coil, which is what makes echoes repeatable between gates
//! and averages.

use std::f64::consts::{PI, TAU};

use ndarray::{concatenate, s, stack, Array3, Array4, ArrayView2, Axis};
use num_complex::Complex64;
use num_traits::Zero;

use crate::devices::RawGate;
use crate::Error;

/// FIR length per unit decimation; `10·q + 1` taps give roughly 60 dB of
/// alias rejection with a Hamming window.
const TAPS_PER_DECIMATION: usize = 10;

/// Hamming-windowed sinc lowpass with cutoff at the decimated Nyquist and
/// unity gain at DC.
fn design_lowpass(decimation: usize) -> Vec<f64> {
    let num_taps = TAPS_PER_DECIMATION * decimation + 1;
    let mid = (num_taps / 2) as isize;
    let cutoff = 0.5 / decimation as f64; // cycles per input sample

    let mut taps = Vec::with_capacity(num_taps);
    for i in 0..num_taps {
        let k = (i as isize - mid) as f64;
        let sinc = if k == 0.0 {
            2.0 * cutoff
        } else {
            (TAU * cutoff * k).sin() / (PI * k)
        };
        let window = 0.54 - 0.46 * (TAU * i as f64 / (num_taps - 1) as f64).cos();
        taps.push(sinc * window);
    }
    let sum: f64 = taps.iter().sum();
    for t in &mut taps {
        *t /= sum;
    }
    taps
}

/// Zero-phase FIR decimation of one readout row. Output sample `m` is the
/// filter centred on input sample `m·q`; edges truncate the kernel.
fn fir_decimate(row: &[Complex64], taps: &[f64], decimation: usize) -> Vec<Complex64> {
    let n = row.len();
    let out_len = (n + decimation - 1) / decimation;
    let delay = (taps.len() / 2) as isize;

    let mut out = Vec::with_capacity(out_len);
    for m in 0..out_len {
        let centre = (m * decimation) as isize;
        let mut acc = Complex64::zero();
        for (j, &tap) in taps.iter().enumerate() {
            let idx = centre + j as isize - delay;
            if idx >= 0 && (idx as usize) < n {
                acc += row[idx as usize] * tap;
            }
        }
        out.push(acc);
    }
    out
}

/// Accumulates demodulated, phase-corrected averages across one run.
///
/// One bucket per distinct readout length, in first-observed order. Raw
/// buckets are complex `[averages, coils, pe, ro/decimation]`; unprocessed
/// buckets keep the reference as a trailing extra coil and the readout at
/// full rate.
#[derive(Debug, Default)]
pub struct PostProcessor {
    raw: Vec<Array4<Complex64>>,
    unprocessed: Vec<Array4<f64>>,
    lengths: Vec<usize>,
}

impl PostProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all accumulated averages.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.unprocessed.clear();
        self.lengths.clear();
    }

    /// Number of gate-length buckets observed so far.
    pub fn num_buckets(&self) -> usize {
        self.raw.len()
    }

    /// Rows (averages) accumulated per bucket.
    pub fn rows(&self) -> Vec<usize> {
        self.raw.iter().map(|b| b.shape()[0]).collect()
    }

    pub fn raw(&self) -> &[Array4<Complex64>] {
        &self.raw
    }

    pub fn unprocessed(&self) -> &[Array4<f64>] {
        &self.unprocessed
    }

    pub fn into_parts(self) -> (Vec<Array4<Complex64>>, Vec<Array4<f64>>) {
        (self.raw, self.unprocessed)
    }

    /// Process one average worth of gates.
    ///
    /// `rx_scaling` must provide one LSB-to-mV factor per coil; `f_spcm` is
    /// the digitiser sample rate in Hz.
    pub fn process(
        &mut self,
        gates: &[RawGate],
        rx_scaling: &[f64],
        larmor_frequency: f64,
        f_spcm: f64,
        decimation: usize,
    ) -> Result<(), Error> {
        if decimation == 0 {
            return Err(Error::Config("decimation must be at least 1".into()));
        }

        // Group by readout length, preserving first-occurrence order.
        let mut lengths: Vec<usize> = Vec::new();
        for gate in gates {
            let n_ro = gate.shape()[1];
            if !lengths.contains(&n_ro) {
                lengths.push(n_ro);
            }
        }

        let taps = design_lowpass(decimation);

        for n_ro in lengths {
            let group: Vec<ArrayView2<i16>> = gates
                .iter()
                .filter(|g| g.shape()[1] == n_ro)
                .map(|g| g.view())
                .collect();
            let stacked: Array3<i16> = stack(Axis(1), &group)
                .map_err(|err| Error::Config(format!("gate group of length {n_ro}: {err}")))?;
            let (n_coils, n_pe) = (stacked.shape()[0], stacked.shape()[1]);
            if rx_scaling.len() < n_coils {
                return Err(Error::Config(format!(
                    "rx scaling provides {} factors for {n_coils} coils",
                    rx_scaling.len()
                )));
            }

            // Reference extraction and unpacking: bit 15 of coil 0 is the
            // digital reference, the remaining bits the analog value in
            // int16 >> 1 form. The reference joins as a trailing pseudo coil.
            let mut data = Array3::<f64>::zeros((n_coils + 1, n_pe, n_ro));
            for p in 0..n_pe {
                for r in 0..n_ro {
                    for c in 0..n_coils {
                        let sample = stacked[[c, p, r]];
                        let analog = if c == 0 {
                            (((sample as u16) << 1) as i16) as f64
                        } else {
                            sample as f64
                        };
                        data[[c, p, r]] = analog * rx_scaling[c];
                    }
                    data[[n_coils, p, r]] = ((stacked[[0, p, r]] as u16) >> 15) as f64;
                }
            }

            // Demodulate everything, the reference included: its baseband
            // phase then encodes the TX-RX phase relation.
            let mut demod = Array3::<Complex64>::zeros((n_coils + 1, n_pe, n_ro));
            let oscillator: Vec<Complex64> = (0..n_ro)
                .map(|k| Complex64::from_polar(1.0, TAU * k as f64 * larmor_frequency / f_spcm))
                .collect();
            for c in 0..=n_coils {
                for p in 0..n_pe {
                    for r in 0..n_ro {
                        demod[[c, p, r]] = data[[c, p, r]] * oscillator[r];
                    }
                }
            }

            // Decimate along the readout axis.
            let n_reduced = (n_ro + decimation - 1) / decimation;
            let mut reduced = Array3::<Complex64>::zeros((n_coils + 1, n_pe, n_reduced));
            for c in 0..=n_coils {
                for p in 0..n_pe {
                    let row = demod.slice(s![c, p, ..]).to_vec();
                    for (r, v) in fir_decimate(&row, &taps, decimation).into_iter().enumerate() {
                        reduced[[c, p, r]] = v;
                    }
                }
            }

            // Phase correction against the reference coil, which is dropped.
            let mut corrected = Array3::<Complex64>::zeros((n_coils, n_pe, n_reduced));
            for p in 0..n_pe {
                for r in 0..n_reduced {
                    let rotation = Complex64::from_polar(1.0, -reduced[[n_coils, p, r]].arg());
                    for c in 0..n_coils {
                        corrected[[c, p, r]] = reduced[[c, p, r]] * rotation;
                    }
                }
            }

            self.append(n_ro, corrected, data)?;
        }
        Ok(())
    }

    fn append(
        &mut self,
        n_ro: usize,
        corrected: Array3<Complex64>,
        unprocessed: Array3<f64>,
    ) -> Result<(), Error> {
        let corrected = corrected.insert_axis(Axis(0));
        let unprocessed = unprocessed.insert_axis(Axis(0));
        match self.lengths.iter().position(|&l| l == n_ro) {
            Some(k) => {
                self.raw[k] = concatenate(Axis(0), &[self.raw[k].view(), corrected.view()])
                    .map_err(|err| {
                        Error::Config(format!("bucket {n_ro}: average shape changed: {err}"))
                    })?;
                self.unprocessed[k] =
                    concatenate(Axis(0), &[self.unprocessed[k].view(), unprocessed.view()])
                        .map_err(|err| {
                            Error::Config(format!("bucket {n_ro}: average shape changed: {err}"))
                        })?;
            }
            None => {
                self.lengths.push(n_ro);
                self.raw.push(corrected);
                self.unprocessed.push(unprocessed);
            }
        }
        Ok(())
    }
}
