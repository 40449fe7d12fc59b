//! Raster scatter rendering
//!
//! Minimal CPU point-blot renderer: the pipeline treats plotting as
//! "timeseries in, raster out", and this module is that black box. Axes,
//! labels and styling are deliberately absent; the display layer only needs
//! a recognizable lightcurve shape.

use crate::signal::Timeseries;
use image::{Rgb, RgbImage};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const POINT: Rgb<u8> = Rgb([25, 25, 112]);

/// Scatter plot geometry
#[derive(Debug, Clone, Copy)]
pub struct ScatterPlot {
    pub width: u32,
    pub height: u32,
    /// Pixels of padding inside the image edge
    pub margin: u32,
}

impl Default for ScatterPlot {
    fn default() -> Self {
        Self {
            width: 800,
            height: 500,
            margin: 20,
        }
    }
}

impl ScatterPlot {
    /// Render the kept samples of a series as a scatter raster.
    ///
    /// `keep` is the clip mask aligned with the series; masked samples are
    /// not drawn. Degenerate ranges (single point, constant flux) collapse
    /// to the plot centre rather than failing.
    pub fn render(&self, series: &Timeseries, keep: &[bool]) -> RgbImage {
        let mut img = RgbImage::from_pixel(self.width, self.height, BACKGROUND);

        let kept: Vec<(f64, f64)> = series
            .t
            .iter()
            .zip(&series.flux)
            .zip(keep)
            .filter(|(_, k)| **k)
            .map(|((t, f), _)| (*t, *f))
            .collect();
        if kept.is_empty() {
            return img;
        }

        let (x_min, x_max) = min_max(kept.iter().map(|(t, _)| *t));
        let (y_min, y_max) = min_max(kept.iter().map(|(_, f)| *f));

        let inner_w = (self.width - 2 * self.margin) as f64;
        let inner_h = (self.height - 2 * self.margin) as f64;

        for (t, f) in kept {
            let x_frac = normalize(t, x_min, x_max);
            let y_frac = normalize(f, y_min, y_max);
            let px = self.margin as f64 + x_frac * inner_w;
            // Flip: larger flux (brighter) plots higher
            let py = self.margin as f64 + (1.0 - y_frac) * inner_h;
            self.blot(&mut img, px as i64, py as i64);
        }
        img
    }

    /// Draw a 3x3 blot centred on the pixel, clamped to the image
    fn blot(&self, img: &mut RgbImage, px: i64, py: i64) {
        for dy in -1..=1i64 {
            for dx in -1..=1i64 {
                let x = px + dx;
                let y = py + dy;
                if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
                    continue;
                }
                img.put_pixel(x as u32, y as u32, POINT);
            }
        }
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), v| {
        (min.min(v), max.max(v))
    })
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max > min {
        (value - min) / (max - min)
    } else {
        0.5
    }
}
