//! Human-readable byte counts.
//!
//! Pure presentation helpers: nothing here touches the filesystem or the
//! cache. `parse_size` is the inverse of `format_size` up to the two-decimal
//! rounding the formatter applies.

use crate::error::{EngineError, Result};

/// Divisor between units used by [`format_size`].
pub const DEFAULT_SIZE_FACTOR: f64 = 1024.0;

const UNITS: [&str; 8] = ["", "K", "M", "G", "T", "P", "E", "Z"];
const LAST_UNIT: &str = "Y";
const SUFFIX: &str = "B";

/// Scale bytes to the largest unit below `1024`, e.g.
/// `1253656 => "1.20MB"`, `1253656678 => "1.17GB"`.
pub fn format_size(bytes: u64) -> String {
    scale(bytes as f64, DEFAULT_SIZE_FACTOR)
}

/// Like [`format_size`], with a caller-chosen factor and any numeric input.
///
/// Fails with `InvalidArgument` for negative or non-finite byte counts and
/// for factors that are not greater than 1.
pub fn format_size_with(bytes: f64, factor: f64) -> Result<String> {
    if !bytes.is_finite() || bytes < 0.0 {
        return Err(EngineError::InvalidArgument(format!(
            "byte count must be a non-negative number, got {bytes}"
        )));
    }
    check_factor(factor)?;
    Ok(scale(bytes, factor))
}

fn scale(mut b: f64, factor: f64) -> String {
    for unit in UNITS {
        if b < factor {
            return format!("{b:.2}{unit}{SUFFIX}");
        }
        b /= factor;
    }
    format!("{b:.2}{LAST_UNIT}{SUFFIX}")
}

/// Parse a size such as `"1.20MB"`, `"360.00B"`, `"4 K"` or `"17"` back into
/// bytes. Unit letters are case-insensitive and the trailing `B` is optional.
/// Results beyond `u64::MAX` saturate.
pub fn parse_size(text: &str, factor: f64) -> Result<u64> {
    check_factor(factor)?;
    let trimmed = text.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| EngineError::InvalidArgument(format!("not a size: {text:?}")))?;

    let unit = unit.trim().to_ascii_uppercase();
    let unit = unit.strip_suffix(SUFFIX).unwrap_or(&unit);
    let exponent = if unit == LAST_UNIT {
        UNITS.len()
    } else {
        UNITS
            .iter()
            .position(|u| *u == unit)
            .ok_or_else(|| EngineError::InvalidArgument(format!("unknown unit in {text:?}")))?
    };

    let bytes = value * factor.powi(exponent as i32);
    // f64 -> u64 casts saturate at the integer bounds
    Ok(bytes.round() as u64)
}

/// Reject unit factors that would never terminate or never scale.
pub fn check_factor(factor: f64) -> Result<()> {
    if factor.is_finite() && factor > 1.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidArgument(format!(
            "size factor must be greater than 1, got {factor}"
        )))
    }
}
