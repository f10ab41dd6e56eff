//! DSP primitives shared by the unroller and the DDC pipeline.

pub mod ddc;

use num_complex::Complex64;
use num_traits::Zero;
use rustfft::FftPlanner;

/// Clamp a float sample into the signed 16 bit DAC range.
///
/// The unroller checks every envelope against the output limits before
/// quantisation; saturation here only absorbs the small overshoot a
/// band-limited resampler can add to an already checked waveform.
#[inline]
pub fn saturate_i16(x: f64) -> i16 {
    x.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Cast a float sample that the caller has already range-checked.
///
/// # Panics
///
/// Panics when the rounded value falls outside the int16 range. The
/// amplitude checks run before quantisation, so a trip here is a logic
/// error, not a data error.
#[inline]
pub fn checked_i16(x: f64) -> i16 {
    let rounded = x.round();
    assert!(
        (i16::MIN as f64..=i16::MAX as f64).contains(&rounded),
        "sample {x} exceeds the int16 range after amplitude checks"
    );
    rounded as i16
}

/// Band-limited resampling of a complex signal to `num` points.
///
/// Classic Fourier method: forward FFT, symmetric truncation or zero padding
/// of the spectrum, inverse FFT. Preserves complex values and, for signals
/// that are band-limited well below Nyquist, their amplitudes.
pub fn resample(signal: &[Complex64], num: usize) -> Vec<Complex64> {
    let n = signal.len();
    if num == 0 || n == 0 {
        return vec![Complex64::zero(); num];
    }
    if n == num {
        return signal.to_vec();
    }

    let mut planner = FftPlanner::new();
    let mut spectrum = signal.to_vec();
    planner.plan_fft_forward(n).process(&mut spectrum);

    // Keep the lowest |frequency| bins of the shorter spectrum: DC plus the
    // positive bins from the head, the negative bins from the tail.
    let keep = n.min(num);
    let head = keep / 2 + 1;
    let tail = keep - head;
    let mut resized = vec![Complex64::zero(); num];
    resized[..head].copy_from_slice(&spectrum[..head]);
    if tail > 0 {
        resized[num - tail..].copy_from_slice(&spectrum[n - tail..]);
    }

    planner.plan_fft_inverse(num).process(&mut resized);

    // The forward transform is unnormalised; 1/n restores the input scale.
    let scale = 1.0 / n as f64;
    for v in &mut resized {
        *v *= scale;
    }
    resized
}

/// Linear interpolation of `(tt, waveform)` onto `num` uniformly spaced
/// points spanning `[tt[0], tt[last]]`.
///
/// `tt` must be sorted ascending; values outside the sampled range clamp to
/// the boundary samples.
pub fn linear_interp(tt: &[f64], waveform: &[f64], num: usize) -> Vec<f64> {
    debug_assert_eq!(tt.len(), waveform.len());
    if tt.is_empty() || num == 0 {
        return vec![0.0; num];
    }
    if tt.len() == 1 {
        return vec![waveform[0]; num];
    }

    let t0 = tt[0];
    let t1 = tt[tt.len() - 1];
    let step = if num > 1 {
        (t1 - t0) / (num - 1) as f64
    } else {
        0.0
    };

    let mut out = Vec::with_capacity(num);
    let mut seg = 0;
    for i in 0..num {
        let t = t0 + step * i as f64;
        while seg + 2 < tt.len() && tt[seg + 1] < t {
            seg += 1;
        }
        let (ta, tb) = (tt[seg], tt[seg + 1]);
        let (ya, yb) = (waveform[seg], waveform[seg + 1]);
        let y = if tb > ta {
            ya + (yb - ya) * ((t - ta) / (tb - ta)).clamp(0.0, 1.0)
        } else {
            ya
        };
        out.push(y);
    }
    out
}
