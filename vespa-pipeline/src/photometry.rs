//! Raw photometry blob codec
//!
//! The archive serves one binary time-series blob per star. Layout:
//! 4-byte magic `WPHO`, little-endian u32 sample count, then `count`
//! records of `(tmid_s: f64, flux: f64)`, both little endian.
//!
//! Any structural mismatch decodes to [`PhotometryError::Corrupt`], which is
//! what drives the fetcher's corruption-recovery path: the caller clears the
//! presence flag and lets the bounded retry logic re-download.

use crate::signal::Timeseries;
use thiserror::Error;

const MAGIC: &[u8; 4] = b"WPHO";
const HEADER_LEN: usize = 8;
const RECORD_LEN: usize = 16;

/// Photometry decode errors
#[derive(Debug, Error)]
pub enum PhotometryError {
    /// Blob does not match the expected layout
    #[error("Corrupt photometry blob: {0}")]
    Corrupt(String),
}

/// Decode an archive blob into a time series.
pub fn decode(bytes: &[u8]) -> Result<Timeseries, PhotometryError> {
    if bytes.len() < HEADER_LEN {
        return Err(PhotometryError::Corrupt(format!(
            "blob too short for header: {} bytes",
            bytes.len()
        )));
    }
    if &bytes[0..4] != MAGIC {
        return Err(PhotometryError::Corrupt("bad magic".to_string()));
    }
    let count = u32::from_le_bytes(bytes[4..8].try_into().expect("4-byte slice")) as usize;
    let expected = HEADER_LEN + count * RECORD_LEN;
    if bytes.len() != expected {
        return Err(PhotometryError::Corrupt(format!(
            "expected {} bytes for {} samples, got {}",
            expected,
            count,
            bytes.len()
        )));
    }

    let mut t = Vec::with_capacity(count);
    let mut flux = Vec::with_capacity(count);
    for record in bytes[HEADER_LEN..].chunks_exact(RECORD_LEN) {
        let tmid = f64::from_le_bytes(record[0..8].try_into().expect("8-byte slice"));
        let f = f64::from_le_bytes(record[8..16].try_into().expect("8-byte slice"));
        if !tmid.is_finite() {
            return Err(PhotometryError::Corrupt(format!(
                "non-finite timestamp {tmid}"
            )));
        }
        t.push(tmid);
        flux.push(f);
    }
    Ok(Timeseries::new(t, flux))
}

/// Encode a time series into blob form.
///
/// The live archive produces blobs; this side exists for fixtures and for
/// seeding local test archives.
pub fn encode(series: &Timeseries) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + series.len() * RECORD_LEN);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&(series.len() as u32).to_le_bytes());
    for (t, flux) in series.t.iter().zip(&series.flux) {
        bytes.extend_from_slice(&t.to_le_bytes());
        bytes.extend_from_slice(&flux.to_le_bytes());
    }
    bytes
}
