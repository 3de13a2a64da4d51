//! Stateless helper utilities used by the layout engine and grid sinks.

use std::collections::{BTreeMap, BTreeSet};

use crate::conf::{N_LEN_EXCEL_SHEET_NAME_MAX, TUP_EXCEL_ILLEGAL};
use crate::error::{GridkitError, Result};
use crate::spec::EnumCellValue;

////////////////////////////////////////////////////////////////////////////////
// #region SheetNames

/// Replace illegal characters, trim, fall back to `Sheet`, cut to 31 chars.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().to_string();
    if c_name.is_empty() {
        c_name = "Sheet".to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

/// Return `name`, or `name__2`, `name__3`, ... when already taken.
///
/// The base is shortened by the suffix length so every candidate fits in
/// 31 chars with its suffix intact. The returned name is recorded in
/// `set_sheet_names_existing`.
pub fn derive_unique_sheet_name(set_sheet_names_existing: &mut BTreeSet<String>, name: &str) -> String {
    if !set_sheet_names_existing.contains(name) {
        set_sheet_names_existing.insert(name.to_string());
        return name.to_string();
    }

    let mut n_idx = 2usize;
    loop {
        let c_suffix = format!("__{n_idx}");
        let n_len_base = N_LEN_EXCEL_SHEET_NAME_MAX.saturating_sub(c_suffix.len());
        let base_name: String = name.chars().take(n_len_base).collect();
        let candidate = format!("{base_name}{c_suffix}");
        if !set_sheet_names_existing.contains(&candidate) {
            set_sheet_names_existing.insert(candidate.clone());
            return candidate;
        }
        n_idx += 1;
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Validation

/// Fail when `columns` contains duplicates, listing every duplicated name.
pub fn validate_unique_columns(columns: &[String]) -> Result<()> {
    if columns.len() == columns.iter().collect::<BTreeSet<_>>().len() {
        return Ok(());
    }

    let mut dict_pos: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (n_idx, c_name) in columns.iter().enumerate() {
        dict_pos.entry(c_name).or_default().push(n_idx);
    }

    let c_msg = dict_pos
        .iter()
        .filter_map(|(c_name, l_pos)| {
            if l_pos.len() > 1 {
                Some(format!(
                    "{c_name:?} x{} at indices {:?}",
                    l_pos.len(),
                    l_pos
                ))
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("; ");

    Err(GridkitError::SchemaValidation(format!(
        "Duplicate column names detected: {c_msg}"
    )))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WidthEstimation

/// Estimate displayed width units for one cell value.
///
/// Used by auto-fit; formulas count as zero since their result is unknown.
pub fn estimate_width_len(value: &EnumCellValue) -> usize {
    match value {
        EnumCellValue::None | EnumCellValue::Formula(_) => 0,
        EnumCellValue::String(s) => estimate_unicode_string_width(s),
        EnumCellValue::Number(_) | EnumCellValue::Bool(_) => value.to_string().len(),
        EnumCellValue::DateTime(_) => "yyyy-mm-dd hh:mm:ss".len(),
        EnumCellValue::Date(_) => "yyyy-mm-dd".len(),
    }
}

/// ASCII counts as one unit, anything else as 1.6 units.
pub fn estimate_unicode_string_width(s: &str) -> usize {
    let n_ascii = s.chars().filter(|chr| chr.is_ascii()).count();
    let n_non_ascii = s.chars().count().saturating_sub(n_ascii);
    n_ascii + (n_non_ascii as f64 * 1.6).round() as usize
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region IndexCasts

pub fn cast_row_num(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| GridkitError::GridSink(format!("row index overflow: {value}")))
}

pub fn cast_col_num(value: usize) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| GridkitError::GridSink(format!("column index overflow: {value}")))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
