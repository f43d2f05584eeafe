//! Value checks shared by the settings resolver and module plug-ins.

use crate::error::{SubmitError, SubmitResult};

/// Check that `value` is a positive integer without sign or leading zeros.
pub fn positive_integer(value: &str, name: &str) -> SubmitResult<u32> {
    let valid = !value.is_empty()
        && !value.starts_with('0')
        && value.chars().all(|c| c.is_ascii_digit());

    if !valid {
        return Err(SubmitError::usage(format!(
            "Invalid value for {name}: must be positive integer"
        )));
    }

    value.parse().map_err(|_| {
        SubmitError::usage(format!("Invalid value for {name}: {value} is out of range"))
    })
}

/// Check that `value` is a positive decimal number (`12`, `0.5`, `1.25`).
pub fn positive_number(value: &str, name: &str) -> SubmitResult<f64> {
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (value, None),
    };

    let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    let well_formed = digits(whole) && fraction.is_none_or(digits);

    let parsed = if well_formed {
        value.parse::<f64>().ok()
    } else {
        None
    };

    match parsed {
        Some(number) if number > 0.0 => Ok(number),
        _ => Err(SubmitError::usage(format!(
            "Invalid value for {name}: must be positive number"
        ))),
    }
}

/// Check a scheduler time limit of the form `[D-]HH:MM:SS`.
pub fn time_limit(value: &str) -> SubmitResult<()> {
    let invalid = || SubmitError::usage(format!("Invalid time format: {value} (use D-HH:MM:SS)"));

    let clock = match value.split_once('-') {
        Some((days, clock)) => {
            if days.is_empty() || !days.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            clock
        }
        None => value,
    };

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }

    let field = |s: &str, max_len: usize| -> Option<u32> {
        if s.is_empty() || s.len() > max_len || !s.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        s.parse().ok()
    };

    let hours = field(parts[0], 2).ok_or_else(invalid)?;
    // Minutes and seconds are always two digits.
    if parts[1].len() != 2 || parts[2].len() != 2 {
        return Err(invalid());
    }
    let minutes = field(parts[1], 2).ok_or_else(invalid)?;
    let seconds = field(parts[2], 2).ok_or_else(invalid)?;

    if hours > 23 || minutes > 59 || seconds > 59 {
        return Err(invalid());
    }

    Ok(())
}
