// Utility helpers for parsing, basic statistics and text formatting.
//
// This module centralizes the "dirty" CSV/number handling so the rest of the
// code can assume clean, typed values.
use num_format::{Locale, ToFormattedString};

/// Parse a string-like value into `f64` while being forgiving about
/// formatting issues that are common in CSV exports (commas, spaces, text).
///
/// - Accepts `Option<&str>` so callers can pass through optional fields.
/// - Trims whitespace.
/// - Rejects values that contain alphabetic characters, except the `e`/`E`
///   of an exponent (`2.5E6`).
/// - Strips thousands separators like `","` before parsing.
/// - Returns `None` for anything that cannot be safely parsed.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if s
        .chars()
        .any(|c| c.is_ascii_alphabetic() && !matches!(c, 'e' | 'E'))
    {
        return None;
    }
    let s = s.replace(',', "");
    s.parse::<f64>().ok()
}

pub fn parse_i32_safe(s: Option<&str>) -> Option<i32> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    // Float-formatted exports write years as `2021.0`.
    let s = s.strip_suffix(".0").unwrap_or(s);
    s.parse::<i32>().ok()
}

/// Left-pad a run of ASCII digits with zeros up to `width`.
///
/// A trailing `.0` (integer columns exported as floats) is dropped first.
/// Returns `None` for empty input, non-digit characters, or input that is
/// already longer than `width`.
pub fn zero_pad_digits(raw: &str, width: usize) -> Option<String> {
    let s = raw.trim();
    let s = s.strip_suffix(".0").unwrap_or(s);
    if s.is_empty() || s.len() > width || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{:0>width$}", s, width = width))
}

/// Trim a text field and map blank values to `None`.
pub fn clean_text(s: Option<String>) -> Option<String> {
    let s = s?;
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

pub fn average(v: &[f64]) -> f64 {
    // Returns 0 for an empty slice to avoid NaNs.
    if v.is_empty() {
        return 0.0;
    }
    let sum: f64 = v.iter().copied().sum();
    sum / v.len() as f64
}

/// Population standard deviation; 0 for fewer than two values.
pub fn std_dev(v: &[f64]) -> f64 {
    if v.len() < 2 {
        return 0.0;
    }
    let mean = average(v);
    let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / v.len() as f64;
    var.sqrt()
}

/// Quantile of an already sorted slice using linear interpolation between
/// the closest ranks. `q` is clamped to `[0, 1]`.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

pub fn format_number(n: f64, decimals: usize) -> String {
    // Fixed number of decimal places plus thousands separators
    // (e.g., `1,234,567.89`).
    let neg = n.is_sign_negative() && n != 0.0;
    let abs_n = n.abs();
    let s = format!("{:.*}", decimals, abs_n);
    let mut parts = s.split('.');
    let int_part = parts.next().unwrap_or("0");
    let frac_part = parts.next();
    let int_val: i64 = int_part.parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = frac_part {
        if decimals > 0 {
            res.push('.');
            res.push_str(frac);
        }
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    // Counts in console messages and tables (e.g., `9,855 rows loaded`).
    n.to_formatted_string(&Locale::en)
}

/// Escape text for HTML element content and double-quoted attributes.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_f64_handles_separators_and_text() {
        assert_eq!(parse_f64_safe(Some(" 1,234.5 ")), Some(1234.5));
        assert_eq!(parse_f64_safe(Some("abc")), None);
        assert_eq!(parse_f64_safe(Some("")), None);
        assert_eq!(parse_f64_safe(None), None);
    }

    #[test]
    fn parse_f64_accepts_exponents() {
        assert_eq!(parse_f64_safe(Some("2.5E6")), Some(2.5e6));
        assert_eq!(parse_f64_safe(Some("1e3")), Some(1000.0));
        assert_eq!(parse_f64_safe(Some("e5")), None);
        assert_eq!(parse_f64_safe(Some("NaN")), None);
        assert_eq!(parse_f64_safe(Some("inf")), None);
    }

    #[test]
    fn parse_i32_accepts_float_formatted_years() {
        assert_eq!(parse_i32_safe(Some("2021")), Some(2021));
        assert_eq!(parse_i32_safe(Some("2022.0")), Some(2022));
        assert_eq!(parse_i32_safe(Some("x")), None);
    }

    #[test]
    fn zero_pad_fills_to_width() {
        assert_eq!(zero_pad_digits("5001", 5).as_deref(), Some("05001"));
        assert_eq!(zero_pad_digits("11001.0", 5).as_deref(), Some("11001"));
        assert_eq!(zero_pad_digits("5", 2).as_deref(), Some("05"));
        assert_eq!(zero_pad_digits("123456", 5), None);
        assert_eq!(zero_pad_digits("12a", 5), None);
        assert_eq!(zero_pad_digits("  ", 5), None);
    }

    #[test]
    fn quantiles_interpolate_linearly() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&v, 0.0), 1.0);
        assert_eq!(quantile_sorted(&v, 1.0), 4.0);
        assert!((quantile_sorted(&v, 0.5) - 2.5).abs() < 1e-12);
        assert!((quantile_sorted(&v, 0.25) - 1.75).abs() < 1e-12);
    }

    #[test]
    fn std_dev_of_constant_is_zero() {
        assert_eq!(std_dev(&[5.0, 5.0, 5.0]), 0.0);
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn format_number_groups_thousands() {
        assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
        assert_eq!(format_number(-42.0, 1), "-42.0");
        assert_eq!(format_number(0.0, 0), "0");
        assert_eq!(format_int(106624u64), "106,624");
    }

    #[test]
    fn escape_html_replaces_markup() {
        assert_eq!(escape_html("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}
