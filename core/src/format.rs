//! Number formatting for dashboard figures.

/// Format `number` with `,` thousands separators.
///
/// Whole numbers print without decimals. Fractional numbers are rounded to
/// `points` decimals, ties away from zero, and a trailing `.0` is dropped.
/// Non-finite input prints `"0"`.
pub fn format_with_commas(number: f64, points: usize) -> String {
    if !number.is_finite() {
        return "0".to_string();
    }
    let rendered = if number.fract() == 0.0 {
        format!("{number:.0}")
    } else {
        let fixed = format!("{:.points$}", round_half_away(number, points));
        match fixed.strip_suffix(".0") {
            Some(trimmed) => trimmed.to_string(),
            None => fixed,
        }
    };

    let (sign, unsigned) = match rendered.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", rendered.as_str()),
    };
    let (int_part, decimals) = match unsigned.split_once('.') {
        Some((int_part, decimals)) => (int_part, Some(decimals)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    match decimals {
        Some(decimals) => format!("{sign}{grouped}.{decimals}"),
        None => format!("{sign}{grouped}"),
    }
}

// `format!` rounds ties to even; dashboard figures round 2.5 up to 3.
fn round_half_away(number: f64, points: usize) -> f64 {
    let scale = 10f64.powi(i32::try_from(points).unwrap_or(i32::MAX));
    let scaled = number * scale;
    if !scaled.is_finite() {
        return number;
    }
    let rounded = scaled.round() / scale;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}
