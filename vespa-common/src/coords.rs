//! Catalogue-ID coordinate parsing
//!
//! SuperWASP catalogue IDs encode the J2000 position of the source:
//! `1SWASP Jhhmmss.ss±ddmmss.s`. The survey never stores coordinates
//! separately at ingest time, so the backfill sweep recovers them from the
//! ID itself.

use crate::{Error, Result};

/// A parsed sky position in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPosition {
    /// Right ascension, 0..360 degrees
    pub ra_deg: f64,
    /// Declination, -90..+90 degrees
    pub dec_deg: f64,
}

/// Parse the RA/Dec encoded in a catalogue ID.
///
/// Accepts both `1SWASP Jhhmmss.ss±ddmmss.s` and the bare
/// `Jhhmmss.ss±ddmmss.s` suffix.
pub fn parse_catalogue_id(id: &str) -> Result<SkyPosition> {
    let coords = id
        .trim()
        .rsplit(['J', 'j'])
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InvalidCatalogueId(id.to_string()))?;

    let sign_pos = coords
        .find(['+', '-'])
        .ok_or_else(|| Error::InvalidCatalogueId(id.to_string()))?;

    let (ra_part, dec_part) = coords.split_at(sign_pos);

    let ra_deg = parse_sexagesimal(ra_part, id)? * 15.0;

    let (sign, dec_digits) = match dec_part.split_at(1) {
        ("-", rest) => (-1.0, rest),
        (_, rest) => (1.0, rest),
    };
    let dec_deg = sign * parse_sexagesimal(dec_digits, id)?;

    if !(0.0..360.0).contains(&ra_deg) || !(-90.0..=90.0).contains(&dec_deg) {
        return Err(Error::InvalidCatalogueId(id.to_string()));
    }

    Ok(SkyPosition { ra_deg, dec_deg })
}

/// Parse a packed `hhmmss.ss` / `ddmmss.s` group into decimal units
/// (hours or degrees).
fn parse_sexagesimal(digits: &str, full_id: &str) -> Result<f64> {
    if digits.len() < 6 || !digits.is_char_boundary(2) || !digits.is_char_boundary(4) {
        return Err(Error::InvalidCatalogueId(full_id.to_string()));
    }
    let whole: f64 = digits[0..2]
        .parse()
        .map_err(|_| Error::InvalidCatalogueId(full_id.to_string()))?;
    let minutes: f64 = digits[2..4]
        .parse()
        .map_err(|_| Error::InvalidCatalogueId(full_id.to_string()))?;
    let seconds: f64 = digits[4..]
        .parse()
        .map_err(|_| Error::InvalidCatalogueId(full_id.to_string()))?;
    if minutes >= 60.0 || seconds >= 60.0 {
        return Err(Error::InvalidCatalogueId(full_id.to_string()));
    }
    Ok(whole + minutes / 60.0 + seconds / 3600.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_id() {
        let pos = parse_catalogue_id("1SWASP J043508.22+205500.2").unwrap();
        let expected_ra = 15.0 * (4.0 + 35.0 / 60.0 + 8.22 / 3600.0);
        let expected_dec = 20.0 + 55.0 / 60.0 + 0.2 / 3600.0;
        assert!((pos.ra_deg - expected_ra).abs() < 1e-9);
        assert!((pos.dec_deg - expected_dec).abs() < 1e-9);
    }

    #[test]
    fn parses_negative_declination() {
        let pos = parse_catalogue_id("1SWASP J000000.00-123000.0").unwrap();
        assert_eq!(pos.ra_deg, 0.0);
        assert!((pos.dec_deg + 12.5).abs() < 1e-9);
    }

    #[test]
    fn parses_bare_suffix() {
        let pos = parse_catalogue_id("J120000.00+000000.0").unwrap();
        assert!((pos.ra_deg - 180.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_catalogue_id("").is_err());
        assert!(parse_catalogue_id("1SWASP").is_err());
        assert!(parse_catalogue_id("1SWASP Jnot-a-position").is_err());
        // Minutes field out of range
        assert!(parse_catalogue_id("1SWASP J996100.00+000000.0").is_err());
    }
}
