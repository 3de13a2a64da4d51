//! Composable sheet-protection rules.
//!
//! Declarative rules mutate a [`ProtectionAccumulator`] once per sheet before
//! any section is rendered. Data-dependent rules ([`LockRowsWhere`],
//! [`LockCellsWhere`]) do nothing in that pass; the layout engine calls
//! [`ProtectionRule::apply_row`] for every data row it writes.
//!
//! A cell is locked unless explicitly unlocked, and an explicit lock always
//! outranks an unlock. Rules only ever add state.

use std::collections::BTreeSet;
use std::fmt;

use crate::conf::N_NROWS_EXCEL_MAX;
use crate::error::Result;
use crate::position::{resolve_column, resolve_range};
use crate::spec::{EnumCellValue, SpecAllowedOperations, SpecCellRange};

////////////////////////////////////////////////////////////////////////////////
// #region Accumulator

/// Sheet-scoped protection state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtectionAccumulator {
    /// Turn on sheet protection when the sheet is finalized.
    pub if_protect_sheet: bool,
    pub password: Option<String>,
    pub unlocked_ranges: Vec<SpecCellRange>,
    pub locked_ranges: Vec<SpecCellRange>,
    /// Single `(row, col)` cells locked by data-dependent rules.
    pub locked_cells: BTreeSet<(usize, usize)>,
    pub allowed: SpecAllowedOperations,
}

impl ProtectionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unlock_range(&mut self, range: SpecCellRange) {
        self.unlocked_ranges.push(range);
    }

    pub fn lock_range(&mut self, range: SpecCellRange) {
        self.locked_ranges.push(range);
    }

    pub fn lock_cell(&mut self, row: usize, col: usize) {
        self.locked_cells.insert((row, col));
    }

    /// True when a lock rule covers `(row, col)`; rows are 1-based.
    pub fn is_explicitly_locked(&self, row: usize, col: usize) -> bool {
        self.locked_cells.contains(&(row, col))
            || self
                .locked_ranges
                .iter()
                .any(|range| range.contains(row, col))
    }

    /// True when an unlock rule covers `(row, col)` and no lock rule does.
    pub fn is_unlocked(&self, row: usize, col: usize) -> bool {
        !self.is_explicitly_locked(row, col)
            && self
                .unlocked_ranges
                .iter()
                .any(|range| range.contains(row, col))
    }
}

/// One data row as seen by data-dependent rules.
#[derive(Debug, Clone, Copy)]
pub struct SpecRowContext<'a> {
    /// 0-based index of the record inside its section.
    pub data_row_index: usize,
    /// 1-based sheet row the record is written to.
    pub sheet_row: usize,
    /// 0-based sheet column of the first visible field.
    pub start_col: usize,
    /// Visible field identifiers, in rendered order.
    pub fields: &'a [&'a str],
    /// Values aligned with `fields`.
    pub values: &'a [EnumCellValue],
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RuleTrait

/// One protection rule.
pub trait ProtectionRule: fmt::Debug {
    /// Declarative pass, run once per sheet before rendering.
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()>;

    /// Data pass, run for every data row before its cells are written.
    fn apply_row(&self, _acc: &mut ProtectionAccumulator, _row: &SpecRowContext<'_>) {}
}

impl ProtectionRule for Box<dyn ProtectionRule> {
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()> {
        self.as_ref().apply(acc)
    }

    fn apply_row(&self, acc: &mut ProtectionAccumulator, row: &SpecRowContext<'_>) {
        self.as_ref().apply_row(acc, row);
    }
}

fn derive_column_ranges(letters: &[String]) -> Result<Vec<SpecCellRange>> {
    letters
        .iter()
        .map(|c_letters| {
            let n_col = resolve_column(c_letters)?;
            Ok(SpecCellRange::full_columns(n_col, n_col))
        })
        .collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region DeclarativeRules

/// Protect the sheet, then apply each exception (typically unlock rules).
#[derive(Debug)]
pub struct LockAllExcept(pub Vec<Box<dyn ProtectionRule>>);

impl LockAllExcept {
    pub fn new(exceptions: Vec<Box<dyn ProtectionRule>>) -> Self {
        Self(exceptions)
    }
}

impl ProtectionRule for LockAllExcept {
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()> {
        acc.if_protect_sheet = true;
        for rule in &self.0 {
            rule.apply(acc)?;
        }
        Ok(())
    }

    fn apply_row(&self, acc: &mut ProtectionAccumulator, row: &SpecRowContext<'_>) {
        for rule in &self.0 {
            rule.apply_row(acc, row);
        }
    }
}

/// Apply rules in sequence to one accumulator.
#[derive(Debug)]
pub struct CombineRules(pub Vec<Box<dyn ProtectionRule>>);

impl ProtectionRule for CombineRules {
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()> {
        for rule in &self.0 {
            rule.apply(acc)?;
        }
        Ok(())
    }

    fn apply_row(&self, acc: &mut ProtectionAccumulator, row: &SpecRowContext<'_>) {
        for rule in &self.0 {
            rule.apply_row(acc, row);
        }
    }
}

/// Unlock whole columns by letter (`"E"`, `"F"`).
#[derive(Debug, Clone)]
pub struct Columns(pub Vec<String>);

impl Columns {
    pub fn new<S: Into<String>>(letters: impl IntoIterator<Item = S>) -> Self {
        Self(letters.into_iter().map(Into::into).collect())
    }
}

impl ProtectionRule for Columns {
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()> {
        for range in derive_column_ranges(&self.0)? {
            acc.unlock_range(range);
        }
        Ok(())
    }
}

/// Lock whole columns by letter.
#[derive(Debug, Clone)]
pub struct LockColumns(pub Vec<String>);

impl LockColumns {
    pub fn new<S: Into<String>>(letters: impl IntoIterator<Item = S>) -> Self {
        Self(letters.into_iter().map(Into::into).collect())
    }
}

impl ProtectionRule for LockColumns {
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()> {
        for range in derive_column_ranges(&self.0)? {
            acc.lock_range(range);
        }
        Ok(())
    }
}

/// Unlock `"A1:B10"`-style ranges.
#[derive(Debug, Clone)]
pub struct UnlockRange(pub Vec<String>);

impl UnlockRange {
    pub fn new<S: Into<String>>(refs: impl IntoIterator<Item = S>) -> Self {
        Self(refs.into_iter().map(Into::into).collect())
    }
}

impl ProtectionRule for UnlockRange {
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()> {
        for c_ref in &self.0 {
            acc.unlock_range(resolve_range(c_ref)?);
        }
        Ok(())
    }
}

/// Lock `"A1:B10"`-style ranges.
#[derive(Debug, Clone)]
pub struct LockRanges(pub Vec<String>);

impl LockRanges {
    pub fn new<S: Into<String>>(refs: impl IntoIterator<Item = S>) -> Self {
        Self(refs.into_iter().map(Into::into).collect())
    }
}

impl ProtectionRule for LockRanges {
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()> {
        for c_ref in &self.0 {
            acc.lock_range(resolve_range(c_ref)?);
        }
        Ok(())
    }
}

/// Lock the listed 1-based rows.
#[derive(Debug, Clone)]
pub struct LockRows(pub Vec<usize>);

impl ProtectionRule for LockRows {
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()> {
        for n_row in self.0.iter().copied().filter(|n_row| *n_row >= 1) {
            acc.lock_range(SpecCellRange::full_rows(n_row, n_row));
        }
        Ok(())
    }
}

/// Lock rows `1..=n`.
#[derive(Debug, Clone, Copy)]
pub struct LockRowsAbove(pub usize);

impl ProtectionRule for LockRowsAbove {
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()> {
        if self.0 >= 1 {
            acc.lock_range(SpecCellRange::full_rows(1, self.0));
        }
        Ok(())
    }
}

/// Lock rows `n..=max`.
#[derive(Debug, Clone, Copy)]
pub struct LockRowsBelow(pub usize);

impl ProtectionRule for LockRowsBelow {
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()> {
        let n_first = usize::max(self.0, 1);
        if n_first <= N_NROWS_EXCEL_MAX {
            acc.lock_range(SpecCellRange::full_rows(n_first, N_NROWS_EXCEL_MAX));
        }
        Ok(())
    }
}

/// Set the sheet-protection password.
#[derive(Debug, Clone)]
pub struct Password(pub String);

impl ProtectionRule for Password {
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()> {
        acc.password = Some(self.0.clone());
        Ok(())
    }
}

/// Replace the set of operations allowed on the protected sheet.
#[derive(Debug, Clone, Copy)]
pub struct AllowOperations(pub SpecAllowedOperations);

impl ProtectionRule for AllowOperations {
    fn apply(&self, acc: &mut ProtectionAccumulator) -> Result<()> {
        acc.allowed = self.0;
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region DataDependentRules

/// Row predicate: `(data_row_index, row_values) -> lock?`.
pub type RowPredicate = Box<dyn Fn(usize, &[EnumCellValue]) -> bool>;
/// Cell predicate: `(field_id, data_row_index, value) -> lock?`.
pub type CellPredicate = Box<dyn Fn(&str, usize, &EnumCellValue) -> bool>;

/// Lock the cells of every record the predicate accepts.
///
/// The lock spans the section's visible columns only; cells that other
/// sections already wrote on the same sheet row keep their state.
pub struct LockRowsWhere(pub RowPredicate);

impl LockRowsWhere {
    pub fn new(predicate: impl Fn(usize, &[EnumCellValue]) -> bool + 'static) -> Self {
        Self(Box::new(predicate))
    }
}

impl fmt::Debug for LockRowsWhere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockRowsWhere(<predicate>)")
    }
}

impl ProtectionRule for LockRowsWhere {
    fn apply(&self, _acc: &mut ProtectionAccumulator) -> Result<()> {
        Ok(())
    }

    fn apply_row(&self, acc: &mut ProtectionAccumulator, row: &SpecRowContext<'_>) {
        if row.fields.is_empty() || !(self.0)(row.data_row_index, row.values) {
            return;
        }
        acc.lock_range(SpecCellRange {
            first_row: row.sheet_row,
            first_col: row.start_col,
            last_row: row.sheet_row,
            last_col: row.start_col + row.fields.len() - 1,
        });
    }
}

/// Lock every data cell the predicate accepts.
pub struct LockCellsWhere(pub CellPredicate);

impl LockCellsWhere {
    pub fn new(predicate: impl Fn(&str, usize, &EnumCellValue) -> bool + 'static) -> Self {
        Self(Box::new(predicate))
    }
}

impl fmt::Debug for LockCellsWhere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockCellsWhere(<predicate>)")
    }
}

impl ProtectionRule for LockCellsWhere {
    fn apply(&self, _acc: &mut ProtectionAccumulator) -> Result<()> {
        Ok(())
    }

    fn apply_row(&self, acc: &mut ProtectionAccumulator, row: &SpecRowContext<'_>) {
        for (n_idx, (field, value)) in row.fields.iter().zip(row.values).enumerate() {
            if (self.0)(field, row.data_row_index, value) {
                acc.lock_cell(row.sheet_row, row.start_col + n_idx);
            }
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

/// Apply `rules` in order to a fresh accumulator.
pub fn derive_protection_accumulator(
    rules: &[Box<dyn ProtectionRule>],
) -> Result<ProtectionAccumulator> {
    let mut acc = ProtectionAccumulator::new();
    for rule in rules {
        rule.apply(&mut acc)?;
    }
    Ok(acc)
}
