//! A1-style reference parsing.
//!
//! Columns are returned 0-based, rows 1-based, matching how section anchors
//! and protection ranges are expressed throughout the crate.

use crate::error::{GridkitError, Result};
use crate::spec::SpecCellRange;

/// Parse `"B3"` into `(col, row)` = `(1, 3)`.
///
/// Letters are case-insensitive and read as a bijective base-26 numeral;
/// `$` absolute markers are ignored. The row must be a positive integer.
/// Worksheet grid limits are left to the sink.
pub fn resolve_position(reference: &str) -> Result<(usize, usize)> {
    let c_ref: String = reference.trim().chars().filter(|chr| *chr != '$').collect();
    let n_len_letters = c_ref
        .chars()
        .take_while(|chr| chr.is_ascii_alphabetic())
        .count();
    let (c_letters, c_digits) = c_ref.split_at(n_len_letters);

    if c_letters.is_empty()
        || c_digits.is_empty()
        || !c_digits.chars().all(|chr| chr.is_ascii_digit())
    {
        return Err(GridkitError::position(reference));
    }

    let n_col = resolve_column(c_letters).map_err(|_| GridkitError::position(reference))?;
    let n_row = c_digits
        .parse::<usize>()
        .map_err(|_| GridkitError::position(reference))?;
    if n_row == 0 {
        return Err(GridkitError::position(reference));
    }

    Ok((n_col, n_row))
}

/// Parse column letters (`"A"`, `"aa"`) into a 0-based index.
pub fn resolve_column(letters: &str) -> Result<usize> {
    let c_letters = letters.trim();
    if c_letters.is_empty() || !c_letters.chars().all(|chr| chr.is_ascii_alphabetic()) {
        return Err(GridkitError::position(letters));
    }

    let mut n_value: usize = 0;
    for chr in c_letters.chars() {
        let n_digit = (chr.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n_value = n_value
            .checked_mul(26)
            .and_then(|val| val.checked_add(n_digit))
            .ok_or_else(|| GridkitError::position(letters))?;
    }
    Ok(n_value - 1)
}

/// Inverse of [`resolve_column`]: `0 -> "A"`, `25 -> "Z"`, `26 -> "AA"`.
pub fn name_for_column(index: usize) -> String {
    let mut l_chars = Vec::new();
    let mut n_rest = index + 1;
    while n_rest > 0 {
        let n_rem = (n_rest - 1) % 26;
        l_chars.push((b'A' + n_rem as u8) as char);
        n_rest = (n_rest - 1) / 26;
    }
    l_chars.iter().rev().collect()
}

/// Format `(col, row)` back into an A1 reference.
pub fn name_for_cell(col: usize, row: usize) -> String {
    format!("{}{row}", name_for_column(col))
}

/// Parse `"A1:B10"` (or a single `"C4"`) into a normalized inclusive range.
pub fn resolve_range(reference: &str) -> Result<SpecCellRange> {
    let (c_start, c_end) = match reference.split_once(':') {
        Some((start, end)) => (start, end),
        None => (reference, reference),
    };
    let (n_col_a, n_row_a) =
        resolve_position(c_start).map_err(|_| GridkitError::position(reference))?;
    let (n_col_b, n_row_b) =
        resolve_position(c_end).map_err(|_| GridkitError::position(reference))?;

    Ok(SpecCellRange {
        first_row: usize::min(n_row_a, n_row_b),
        first_col: usize::min(n_col_a, n_col_b),
        last_row: usize::max(n_row_a, n_row_b),
        last_col: usize::max(n_col_a, n_col_b),
    })
}
