//! Coordinate quantization onto a fixed-precision lat/lon grid.
//!
//! Every source call is keyed by the grid cell a coordinate falls in rather
//! than the raw coordinate, so mouse-hover traffic that jitters within a
//! ~110 m cell reuses one cached upstream response.
//!
//! # Rounding rule
//!
//! Coordinates are rounded to `precision` decimals **half away from zero**,
//! decided on the exact binary value of the input. A decimal literal such as
//! `0.0045` is stored as `0.00449999...` and so rounds down to `0.004`, while
//! `39.2905` is stored just above the half and rounds up to `39.291`. Only
//! values that are exact halves in binary (`2.5`, `0.25`) take the tie-break.
//! This is the same rule as the front end's `toFixed(3)`, so both sides agree
//! on every cell boundary.
//!
//! Scaling with a float multiply first is not enough: `0.0045 * 1000.0`
//! rounds to exactly `4.5` and would land in the wrong cell.

use std::fmt;

/// Decimal digits kept by the system-wide grid (≈ 110 m cells).
pub const GRID_PRECISION_DIGITS: u8 = 3;

/// Largest supported precision. Beyond this the scaled cell index would
/// lose integer precision in an `f64`.
pub const MAX_PRECISION_DIGITS: u8 = 9;

/// A coordinate snapped to a grid cell.
///
/// Stored as integer cell indices so the key is exact and hashable;
/// [`lat`](Self::lat) and [`lon`](Self::lon) recover the cell's degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridKey {
    lat_cells: i64,
    lon_cells: i64,
    precision: u8,
}

impl GridKey {
    /// Latitude of the cell in degrees.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn lat(&self) -> f64 {
        self.lat_cells as f64 / scale(self.precision)
    }

    /// Longitude of the cell in degrees.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn lon(&self) -> f64 {
        self.lon_cells as f64 / scale(self.precision)
    }

    /// Number of decimal digits this key was quantized to.
    #[must_use]
    pub const fn precision(&self) -> u8 {
        self.precision
    }
}

impl fmt::Display for GridKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = usize::from(self.precision());
        write!(f, "{:.p$},{:.p$}", self.lat(), self.lon())
    }
}

/// Snaps a coordinate to the grid cell at `precision_digits` decimals.
///
/// Pure and deterministic; see the module docs for the rounding rule.
/// Precision is clamped to [`MAX_PRECISION_DIGITS`]. Callers are expected to
/// pass finite coordinates (validated upstream by
/// [`FeatureQuery::new`](crate::FeatureQuery::new)).
#[must_use]
pub fn quantize(lat: f64, lon: f64, precision_digits: u8) -> GridKey {
    let precision = precision_digits.min(MAX_PRECISION_DIGITS);
    GridKey {
        lat_cells: round_to_cells(lat, precision),
        lon_cells: round_to_cells(lon, precision),
        precision,
    }
}

/// Rounds `value * 10^precision` to the nearest integer, ties away from
/// zero, using the exact binary value of `value`.
///
/// A finite `f64` is `mantissa * 2^exponent` exactly. With `precision <= 9`
/// the product `mantissa * 10^precision` stays below `2^83`, so the whole
/// comparison against the half runs in `u128` without any float rounding.
#[allow(clippy::cast_possible_truncation)]
fn round_to_cells(value: f64, precision: u8) -> i64 {
    let bits = value.to_bits();
    let biased_exponent = i32::from(((bits >> 52) & 0x7ff) as u16);
    let fraction = bits & ((1_u64 << 52) - 1);

    if biased_exponent == 0x7ff {
        // Non-finite input; keep the saturating float behaviour.
        return (value * scale(precision)).round() as i64;
    }

    let (mantissa, exponent) = if biased_exponent == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1_u64 << 52), biased_exponent - 1075)
    };

    let scaled = u128::from(mantissa) * 10_u128.pow(u32::from(precision));
    let magnitude = if exponent >= 0 {
        // Already an integer; far outside any coordinate range.
        scaled
            .checked_shl(exponent.unsigned_abs())
            .filter(|v| v >> exponent.unsigned_abs() == scaled)
            .unwrap_or(u128::MAX)
    } else {
        let shift = exponent.unsigned_abs();
        if shift >= 128 {
            0
        } else {
            let whole = scaled >> shift;
            let remainder = scaled & ((1_u128 << shift) - 1);
            let half = 1_u128 << (shift - 1);
            if remainder >= half { whole + 1 } else { whole }
        }
    };

    let cells = i64::try_from(magnitude).unwrap_or(i64::MAX);
    if value.is_sign_negative() { -cells } else { cells }
}

fn scale(precision: u8) -> f64 {
    10_f64.powi(i32::from(precision))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantizes_to_three_decimals() {
        let key = quantize(39.290_4, -76.612_2, GRID_PRECISION_DIGITS);
        assert!((key.lat() - 39.290).abs() < 1e-9);
        assert!((key.lon() - -76.612).abs() < 1e-9);
        assert_eq!(key.to_string(), "39.290,-76.612");
    }

    #[test]
    fn quantize_is_idempotent() {
        for (lat, lon) in [
            (39.290_4, -76.612_2),
            (-33.868_8, 151.209_3),
            (0.000_4, -0.000_4),
            (89.999_9, 179.999_9),
        ] {
            let key = quantize(lat, lon, GRID_PRECISION_DIGITS);
            assert_eq!(quantize(key.lat(), key.lon(), GRID_PRECISION_DIGITS), key);
        }
    }

    #[test]
    fn nearby_points_share_a_cell() {
        let a = quantize(39.290_1, -76.612_1, GRID_PRECISION_DIGITS);
        let b = quantize(39.290_4, -76.612_4, GRID_PRECISION_DIGITS);
        let c = quantize(39.289_6, -76.611_6, GRID_PRECISION_DIGITS);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn neighbouring_cells_differ() {
        let a = quantize(39.290_4, -76.612_2, GRID_PRECISION_DIGITS);
        let b = quantize(39.290_6, -76.612_2, GRID_PRECISION_DIGITS);
        assert_ne!(a, b);
    }

    #[test]
    fn exact_halves_round_away_from_zero() {
        // 0.25 and 2.5 are exact in binary, so these hit the tie-break.
        assert_eq!(quantize(0.25, -0.25, 1), quantize(0.3, -0.3, 1));
        assert_eq!(quantize(2.5, -2.5, 0), quantize(3.0, -3.0, 0));
        assert_eq!(quantize(1.5, -1.5, 0).to_string(), "2,-2");
    }

    #[test]
    fn decimal_halves_follow_their_binary_value() {
        // Each pair matches what `toFixed(3)` prints for the same literal.
        for (input, expected) in [
            (0.004_5, "0.004"),
            (0.005_5, "0.005"),
            (39.290_5, "39.291"),
            (1.000_5, "1.000"),
            (0.001_5, "0.002"),
            (76.612_5, "76.612"),
        ] {
            let key = quantize(input, -input, GRID_PRECISION_DIGITS);
            assert_eq!(key.to_string(), format!("{expected},-{expected}"), "{input}");
        }
    }

    #[test]
    fn rounding_is_exact_across_the_half() {
        let half = 0.004_5_f64;
        let below = f64::from_bits(half.to_bits() - 1);
        let above = f64::from_bits(half.to_bits() + 1);
        let at = |v: f64| quantize(v, 0.0, GRID_PRECISION_DIGITS).to_string();
        assert_eq!(at(below), "0.004,0.000");
        assert_eq!(at(half), "0.004,0.000");
        // 0.0045 + 1 ulp is the first double above 0.0045 exactly.
        assert_eq!(at(above), "0.005,0.000");
    }

    #[test]
    fn zero_and_tiny_values_land_on_zero() {
        assert_eq!(quantize(0.0, -0.0, 3), quantize(1e-300, -5e-324, 3));
        assert_eq!(quantize(-0.0, 0.0, 3).to_string(), "0.000,0.000");
    }

    #[test]
    fn precision_is_part_of_the_key() {
        assert_ne!(quantize(1.0, 1.0, 2), quantize(1.0, 1.0, 3));
    }

    #[test]
    fn precision_is_clamped() {
        assert_eq!(quantize(1.0, 1.0, 200).precision(), MAX_PRECISION_DIGITS);
    }
}
