//! Fractional index keys for list positions.
//!
//! A key is a non-empty string of base-62 digits read as the fraction
//! `0.<digits>`, so plain string comparison is numeric comparison. Keys
//! never end in `0` (that would alias a shorter key), which guarantees a
//! fresh key exists strictly between any two distinct keys.

use cairn_core::{Error, Result};

const DIGITS: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

fn digit_value(c: u8) -> Option<usize> {
    match c {
        b'0'..=b'9' => Some((c - b'0') as usize),
        b'A'..=b'Z' => Some((c - b'A') as usize + 10),
        b'a'..=b'z' => Some((c - b'a') as usize + 36),
        _ => None,
    }
}

/// Whether `key` is a well-formed position key.
pub fn is_valid(key: &str) -> bool {
    !key.is_empty()
        && !key.ends_with('0')
        && key.bytes().all(|c| digit_value(c).is_some())
}

fn check(key: &str) -> Result<()> {
    if is_valid(key) {
        Ok(())
    } else {
        Err(Error::validation(format!("invalid position key {key:?}")))
    }
}

/// A key strictly between `lo` (empty for "before everything") and `hi`
/// (`None` for "after everything"). Inputs are assumed valid and ordered.
fn midpoint(lo: &str, hi: Option<&str>) -> String {
    let lo_bytes = lo.as_bytes();

    if let Some(hi) = hi {
        let hi_bytes = hi.as_bytes();
        let mut n = 0;
        while n < hi_bytes.len() && lo_bytes.get(n).copied().unwrap_or(b'0') == hi_bytes[n] {
            n += 1;
        }
        if n > 0 {
            let rest = midpoint(lo.get(n..).unwrap_or(""), Some(&hi[n..]));
            return format!("{}{}", &hi[..n], rest);
        }
    }

    let low = lo_bytes.first().and_then(|c| digit_value(*c)).unwrap_or(0);
    let high = hi
        .and_then(|hi| hi.as_bytes().first().copied())
        .and_then(digit_value)
        .unwrap_or(DIGITS.len());

    if high - low > 1 {
        return (DIGITS[(low + high) / 2] as char).to_string();
    }

    // Leading digits are adjacent.
    match hi {
        Some(hi) if hi.len() > 1 => hi[..1].to_string(),
        _ => format!(
            "{}{}",
            DIGITS[low] as char,
            midpoint(lo.get(1..).unwrap_or(""), None)
        ),
    }
}

/// Generate `count` ascending keys strictly between two optional bounds.
///
/// `None` means unbounded on that side. Fails with a validation error when
/// a bound is not a valid key or `lo >= hi`.
pub fn between(lo: Option<&str>, hi: Option<&str>, count: usize) -> Result<Vec<String>> {
    if let Some(lo) = lo {
        check(lo)?;
    }
    if let Some(hi) = hi {
        check(hi)?;
    }
    if let (Some(lo), Some(hi)) = (lo, hi) {
        if lo >= hi {
            return Err(Error::validation(format!(
                "position bounds out of order: {lo:?} >= {hi:?}"
            )));
        }
    }

    let mut keys = Vec::with_capacity(count);
    fill(lo.unwrap_or(""), hi, count, &mut keys);
    Ok(keys)
}

/// Split the interval around its midpoint so key lengths grow
/// logarithmically with `count`.
fn fill(lo: &str, hi: Option<&str>, count: usize, out: &mut Vec<String>) {
    if count == 0 {
        return;
    }
    let mid = midpoint(lo, hi);
    let left = (count - 1) / 2;
    fill(lo, Some(&mid), left, out);
    out.push(mid.clone());
    fill(&mid, hi, count - 1 - left, out);
}
