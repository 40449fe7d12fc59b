//! Pure numeric processing for raw photometry
//!
//! Everything in this module is synchronous and side-effect free: outlier
//! clipping, phase folding, and magnitude extraction. The generators feed it
//! decoded archive data and persist whatever comes back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Signal processing errors
#[derive(Debug, Error, PartialEq)]
pub enum SignalError {
    /// No samples were supplied at all
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// Clipping removed every sample
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
}

/// Outlier clipping parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClipParams {
    /// Absolute flux window; samples outside ±bound are always masked
    pub flux_bound: f64,
    /// Sigma multiple for the statistical clip applied to the remainder
    pub sigma: f64,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self {
            flux_bound: 2.0e5,
            sigma: 5.0,
        }
    }
}

/// Magnitude aggregation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Min,
    Mean,
    Max,
}

/// A time series of flux samples.
///
/// `t` is seconds for raw data and phase (dimensionless) after folding;
/// the two vectors are always the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeseries {
    pub t: Vec<f64>,
    pub flux: Vec<f64>,
}

impl Timeseries {
    pub fn new(t: Vec<f64>, flux: Vec<f64>) -> Self {
        debug_assert_eq!(t.len(), flux.len());
        Self { t, flux }
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }
}

/// Compute the keep-mask for a flux series.
///
/// Returns a vector the same length as the input; `true` means the sample
/// survives clipping. Masking rather than removing keeps the result aligned
/// with the timestamp axis.
///
/// Two passes: an absolute window (instrumental garbage, e.g. saturated
/// readouts at ±1e6) and then a sigma clip around the mean of whatever the
/// window kept. Non-finite samples never survive.
pub fn clip_outliers(flux: &[f64], params: &ClipParams) -> Vec<bool> {
    let mut keep: Vec<bool> = flux
        .iter()
        .map(|f| f.is_finite() && f.abs() <= params.flux_bound)
        .collect();

    let kept: Vec<f64> = flux
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(f, _)| *f)
        .collect();
    if kept.len() < 2 {
        return keep;
    }

    let mean = kept.iter().sum::<f64>() / kept.len() as f64;
    let variance = kept.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / kept.len() as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return keep;
    }

    for (f, k) in flux.iter().zip(keep.iter_mut()) {
        if *k && (f - mean).abs() > params.sigma * std_dev {
            *k = false;
        }
    }
    keep
}

/// Fold a time series at the given period (seconds).
///
/// The time axis is replaced by phase in `[0, 1)`; sample order is
/// preserved, not re-sorted by phase.
pub fn fold(series: &Timeseries, period_s: f64) -> Result<Timeseries, SignalError> {
    if series.is_empty() {
        return Err(SignalError::EmptyInput("cannot fold an empty series".to_string()));
    }
    if !(period_s > 0.0) {
        return Err(SignalError::EmptyInput(format!(
            "cannot fold at non-positive period {period_s}"
        )));
    }
    let phase = series
        .t
        .iter()
        .map(|t| (t.rem_euclid(period_s)) / period_s)
        .collect();
    Ok(Timeseries::new(phase, series.flux.clone()))
}

/// Extract an aggregate magnitude from raw flux.
///
/// Clips outliers, aggregates the survivors, and converts flux to magnitude
/// with `15 - 2.5 * ln(flux)`.
pub fn extract_magnitude(
    flux: &[f64],
    aggregate: Aggregate,
    params: &ClipParams,
) -> Result<f64, SignalError> {
    if flux.is_empty() {
        return Err(SignalError::EmptyInput(
            "no flux samples to aggregate".to_string(),
        ));
    }
    let keep = clip_outliers(flux, params);
    let kept: Vec<f64> = flux
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(f, _)| *f)
        .collect();
    if kept.is_empty() {
        return Err(SignalError::InsufficientData(
            "all flux samples were clipped".to_string(),
        ));
    }

    let aggregated = match aggregate {
        Aggregate::Min => kept.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregate::Max => kept.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregate::Mean => kept.iter().sum::<f64>() / kept.len() as f64,
    };
    if !(aggregated > 0.0) {
        return Err(SignalError::InsufficientData(format!(
            "aggregated flux {aggregated} has no magnitude"
        )));
    }
    Ok(15.0 - 2.5 * aggregated.ln())
}

/// Duplicate a folded series shifted by one full phase.
///
/// Folded plots show the fold seam twice (phase `[0, 2)`) so eclipses near
/// phase 0 read as a single feature. Display only; statistics never see
/// the duplicated half.
pub fn extend_for_display(folded: &Timeseries) -> Timeseries {
    let mut t = Vec::with_capacity(folded.len() * 2);
    let mut flux = Vec::with_capacity(folded.len() * 2);
    t.extend_from_slice(&folded.t);
    flux.extend_from_slice(&folded.flux);
    t.extend(folded.t.iter().map(|p| p + 1.0));
    flux.extend_from_slice(&folded.flux);
    Timeseries::new(t, flux)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_masks_window_then_sigma() {
        // Saturated readouts at both extremes masked, the four quiet
        // samples kept.
        let flux = [1.0e6, 100.0, 105.0, 98.0, 102.0, -1.0e6];
        let keep = clip_outliers(&flux, &ClipParams::default());
        assert_eq!(keep, vec![false, true, true, true, true, false]);
    }

    #[test]
    fn clip_sigma_pass_catches_in_window_spikes() {
        // 1e5 is inside the absolute window but far beyond 5 sigma of the rest
        let mut flux = vec![100.0; 50];
        flux.push(101.0);
        flux.push(1.0e5);
        let keep = clip_outliers(&flux, &ClipParams::default());
        assert!(!keep[51]);
        assert!(keep[..51].iter().all(|k| *k));
    }

    #[test]
    fn clip_preserves_length_and_order() {
        let flux = [f64::NAN, 50.0, 3.0e5];
        let keep = clip_outliers(&flux, &ClipParams::default());
        assert_eq!(keep.len(), 3);
        assert_eq!(keep, vec![false, true, false]);
    }

    #[test]
    fn fold_maps_time_to_phase() {
        let series = Timeseries::new(vec![0.0, 25.0, 50.0, 75.0, 100.0], vec![1.0; 5]);
        let folded = fold(&series, 50.0).unwrap();
        assert_eq!(folded.t, vec![0.0, 0.5, 0.0, 0.5, 0.0]);
        assert_eq!(folded.flux, series.flux);
    }

    #[test]
    fn fold_rejects_empty_and_bad_period() {
        let empty = Timeseries::new(vec![], vec![]);
        assert!(matches!(fold(&empty, 10.0), Err(SignalError::EmptyInput(_))));
        let series = Timeseries::new(vec![1.0], vec![1.0]);
        assert!(matches!(fold(&series, 0.0), Err(SignalError::EmptyInput(_))));
    }

    #[test]
    fn magnitude_mean_ignores_clipped_samples() {
        let flux = [1.0e6, 100.0, 105.0, 98.0, 102.0, -1.0e6];
        let mag = extract_magnitude(&flux, Aggregate::Mean, &ClipParams::default()).unwrap();
        let expected = 15.0 - 2.5 * (101.25f64).ln();
        assert!((mag - expected).abs() < 1e-12);
    }

    #[test]
    fn magnitude_min_max_bracket_mean() {
        let flux = [90.0, 100.0, 110.0];
        let params = ClipParams::default();
        let min = extract_magnitude(&flux, Aggregate::Min, &params).unwrap();
        let mean = extract_magnitude(&flux, Aggregate::Mean, &params).unwrap();
        let max = extract_magnitude(&flux, Aggregate::Max, &params).unwrap();
        // Brighter flux means smaller magnitude, so min flux gives max magnitude
        assert!(max < mean && mean < min);
    }

    #[test]
    fn magnitude_all_clipped_is_insufficient() {
        let flux = [1.0e6, -1.0e6];
        let result = extract_magnitude(&flux, Aggregate::Mean, &ClipParams::default());
        assert!(matches!(result, Err(SignalError::InsufficientData(_))));
    }

    #[test]
    fn magnitude_empty_input() {
        let result = extract_magnitude(&[], Aggregate::Mean, &ClipParams::default());
        assert!(matches!(result, Err(SignalError::EmptyInput(_))));
    }

    #[test]
    fn extend_doubles_samples_over_two_phases() {
        let series = Timeseries::new(vec![0.0, 30.0, 60.0], vec![5.0, 6.0, 7.0]);
        let folded = fold(&series, 120.0).unwrap();
        let extended = extend_for_display(&folded);
        assert_eq!(extended.len(), folded.len() * 2);
        assert!(extended.t.iter().all(|p| (0.0..2.0).contains(p)));
        assert_eq!(extended.flux[..3], extended.flux[3..]);
    }
}
