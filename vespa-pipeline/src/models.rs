//! Catalogue entities owned by the pipeline
//!
//! `Star` and `FoldedLightcurve` carry their own derived-artifact state
//! (presence, version, pending-job handle, last attempt) so the staleness
//! protocol can be evaluated from a single row read.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Current image rendering algorithm version.
///
/// Bumped whenever rendering output changes meaning; any stored artifact
/// with a lower version is stale regardless of presence.
pub const CURRENT_IMAGE_VERSION: f64 = 0.3;

/// Current statistics algorithm version.
pub const CURRENT_STATS_VERSION: f64 = 0.2;

/// A sky-survey source
#[derive(Debug, Clone)]
pub struct Star {
    pub id: i64,
    /// Unique catalogue ID, e.g. `1SWASP J043508.22+205500.2`
    pub superwasp_id: String,
    /// Position backfilled from the catalogue ID by the coordinate sweep
    pub ra_deg: Option<f64>,
    pub dec_deg: Option<f64>,

    /// Raw photometry blob downloaded and decodable last time it was read
    pub fits_present: bool,
    pub fetch_job_id: Option<Uuid>,
    pub fetch_attempted_at: Option<DateTime<Utc>>,
    pub fetch_failures: u32,

    pub image_version: Option<f64>,
    pub image_job_id: Option<Uuid>,
    pub image_attempted_at: Option<DateTime<Utc>>,

    pub min_magnitude: Option<f64>,
    pub mean_magnitude: Option<f64>,
    pub max_magnitude: Option<f64>,
    pub stats_version: Option<f64>,
    pub stats_job_id: Option<Uuid>,
    pub stats_attempted_at: Option<DateTime<Utc>>,
}

/// One candidate periodicity for a star
#[derive(Debug, Clone)]
pub struct FoldedLightcurve {
    pub id: i64,
    pub star_id: i64,
    /// Disambiguator among a star's candidate periods, not a physical unit
    pub period_number: i64,
    /// Period length in seconds
    pub period_length: f64,
    /// Period error estimate
    pub sigma: f64,
    /// Goodness of fit of the period
    pub chi_squared: f64,
    pub classification: Option<Classification>,
    pub period_certainty: Option<PeriodCertainty>,
    pub classification_count: Option<i64>,

    pub image_version: Option<f64>,
    pub image_job_id: Option<Uuid>,
    pub image_attempted_at: Option<DateTime<Utc>>,

    /// Third-party (Zooniverse subject) image, used as the cache fallback
    pub external_image_url: Option<String>,
}

/// Citizen-science classification of a folded lightcurve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum Classification {
    Pulsator = 1,
    /// Eclipsing binary, Algol or Beta Lyrae type
    EaEb = 2,
    /// Eclipsing binary, W Ursae Majoris type
    Ew = 3,
    Rotator = 4,
    Unknown = 5,
    Junk = 6,
}

impl Classification {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Pulsator),
            2 => Some(Self::EaEb),
            3 => Some(Self::Ew),
            4 => Some(Self::Rotator),
            5 => Some(Self::Unknown),
            6 => Some(Self::Junk),
            _ => None,
        }
    }
}

/// Whether the classified period is trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum PeriodCertainty {
    Certain = 0,
    Uncertain = 1,
}

impl PeriodCertainty {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Certain),
            1 => Some(Self::Uncertain),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_round_trips_stored_values() {
        for v in 1..=6 {
            let c = Classification::from_i64(v).unwrap();
            assert_eq!(c as i64, v);
        }
        assert!(Classification::from_i64(0).is_none());
        assert!(Classification::from_i64(7).is_none());
    }

    #[test]
    fn certainty_round_trips_stored_values() {
        assert_eq!(PeriodCertainty::from_i64(0), Some(PeriodCertainty::Certain));
        assert_eq!(PeriodCertainty::from_i64(1), Some(PeriodCertainty::Uncertain));
        assert!(PeriodCertainty::from_i64(2).is_none());
    }
}
