//! Plotting helpers shared by the diagnostic plots

use plotters::style::RGBColor;
use std::ops::Range;

/// The `k`th color of the TABLEAU10 palette
pub fn color(k: usize) -> RGBColor {
    let c = colorous::TABLEAU10[k % colorous::TABLEAU10.len()];
    RGBColor(c.r, c.g, c.b)
}

/// Minimum and maximum values ignoring NaNs
pub fn minmax(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), v| {
            (a.min(v), b.max(v))
        })
}

/// Axis range with a 5% margin on both sides
pub fn padded((min, max): (f64, f64)) -> Range<f64> {
    if !min.is_finite() || !max.is_finite() {
        return 0f64..1f64;
    }
    let margin = if max > min { 0.05 * (max - min) } else { 0.5 };
    min - margin..max + margin
}
