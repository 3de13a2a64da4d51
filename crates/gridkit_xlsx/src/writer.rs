//! Section layout engine and xlsx export entry points.
//!
//! Sections of one sheet are laid out strictly in declared order: each anchor
//! may depend on where the previous section ended. Rendering goes through a
//! [`GridSink`]; the xlsx entry points serialize into memory first, so a
//! failed export never leaves a partial document behind.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::condition::select_conditional_style;
use crate::conf::{
    C_NUM_FORMAT_DATE_DEFAULT, C_NUM_FORMAT_DATETIME_DEFAULT, EnumCellRole,
    N_CELLS_UNLOCK_FILL_MAX, N_NCOLS_EXCEL_MAX, N_WIDTH_COLUMN_MIN, N_WIDTH_COLUMN_PADDING,
};
use crate::error::{GridkitError, Result};
use crate::position::{name_for_cell, resolve_position};
use crate::protection::{
    ProtectionAccumulator, ProtectionRule, SpecRowContext, derive_protection_accumulator,
};
use crate::record::{RecordSet, SpecFieldTag, parse_field_tag};
use crate::sink::{GridSink, XlsxGridSink};
use crate::spec::{
    EnumCellValue, EnumDirection, SpecCellStyle, SpecColumn, SpecExportReport,
    SpecResolvedColumn, SpecSection, SpecSectionPlacement, SpecSheet, SpecSheetLayout,
    SpecSheetReport, SpecWorkbook,
};
use crate::style::{StyleDefaults, StyleRegistry, cascade_styles};
use crate::util::{
    derive_unique_sheet_name, estimate_unicode_string_width, estimate_width_len,
    sanitize_sheet_name, validate_unique_columns,
};

////////////////////////////////////////////////////////////////////////////////
// #region LayoutCursor

/// Next-free bookkeeping for one sheet. Rows are 1-based, columns 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutCursor {
    /// Next free row for vertical stacking.
    pub current_row: usize,
    /// Last row written on the sheet so far (0 when nothing was written).
    pub max_row: usize,
    /// Exclusive end of the used column range.
    pub max_col: usize,
    /// Next free column for horizontal stacking.
    pub prev_section_end_col: usize,
}

impl Default for LayoutCursor {
    fn default() -> Self {
        Self {
            current_row: 1,
            max_row: 0,
            max_col: 0,
            prev_section_end_col: 0,
        }
    }
}

impl LayoutCursor {
    /// Anchor `(col, row)` for `section`.
    ///
    /// Priority: explicit `position`, then explicit `start_column` (row from
    /// `start_row` or the automatic row), then automatic placement by
    /// direction.
    pub fn resolve_anchor(&self, section: &SpecSection) -> Result<(usize, usize)> {
        if let Some(c_position) = &section.position {
            return resolve_position(c_position);
        }

        let (n_col_auto, n_row_auto) = match section.direction {
            EnumDirection::Vertical => (0, self.current_row),
            EnumDirection::Horizontal => (
                self.prev_section_end_col,
                usize::max(section.start_row.unwrap_or(1), 1),
            ),
        };

        match section.start_column {
            Some(n_col) => Ok((
                n_col,
                usize::max(section.start_row.unwrap_or(n_row_auto), 1),
            )),
            None => Ok((n_col_auto, n_row_auto)),
        }
    }

    /// Move past a placed section.
    pub fn advance(
        &mut self,
        direction: EnumDirection,
        placement: &SpecSectionPlacement,
        n_cols_visible: usize,
    ) {
        match direction {
            EnumDirection::Vertical => {
                self.current_row = placement.end_row;
                self.prev_section_end_col = placement.end_col;
            }
            EnumDirection::Horizontal => {
                self.prev_section_end_col = placement.end_col;
            }
        }
        if placement.rows_written > 0 {
            self.max_row = usize::max(
                self.max_row,
                placement.start_row + placement.rows_written - 1,
            );
        }
        self.max_col = usize::max(self.max_col, placement.start_col + n_cols_visible);
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ColumnResolution

/// Resolve the visible columns of `data` after tags and overrides.
///
/// Returns the columns plus the names of overrides that matched no field.
pub fn resolve_columns(
    data: &dyn RecordSet,
    overrides: &[SpecColumn],
) -> Result<(Vec<SpecResolvedColumn>, Vec<String>)> {
    let l_fields = data.fields()?;
    let mut l_cols = Vec::with_capacity(l_fields.len());
    let mut set_names_matched: BTreeSet<&str> = BTreeSet::new();

    for field in l_fields {
        let tag = match &field.tag {
            Some(c_tag) => parse_field_tag(c_tag).map_err(|err| match err {
                GridkitError::SchemaValidation(msg) => GridkitError::SchemaValidation(format!(
                    "field {:?}: {msg}",
                    field.field_id
                )),
                other => other,
            })?,
            None => SpecFieldTag::default(),
        };
        let col_override = overrides
            .iter()
            .find(|col| col.field_name == field.field_id);
        if let Some(col) = col_override {
            set_names_matched.insert(col.field_name.as_str());
        }
        if tag.if_excluded {
            continue;
        }

        let mut if_hidden = tag.if_hidden;
        let mut col = SpecResolvedColumn {
            header: tag.header.unwrap_or_else(|| field.field_id.clone()),
            field_id: field.field_id,
            width: tag.width,
            format: tag.format,
            conditions: Vec::new(),
            style: None,
        };
        if let Some(col_override) = col_override {
            if let Some(c_header) = &col_override.header {
                col.header = c_header.clone();
            }
            if col_override.width.is_some() {
                col.width = col_override.width;
            }
            if col_override.format.is_some() {
                col.format = col_override.format.clone();
            }
            if let Some(if_hidden_override) = col_override.hidden {
                if_hidden = if_hidden_override;
            }
            col.conditions = col_override.conditions.clone();
            col.style = col_override.style.clone();
        }
        if !if_hidden {
            l_cols.push(col);
        }
    }

    validate_unique_columns(
        &l_cols
            .iter()
            .map(|col| col.field_id.clone())
            .collect::<Vec<_>>(),
    )?;

    let l_unmatched = overrides
        .iter()
        .filter(|col| !set_names_matched.contains(col.field_name.as_str()))
        .map(|col| col.field_name.clone())
        .collect();
    Ok((l_cols, l_unmatched))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetRenderer

/// Sheet-scoped render state: cursor, protection accumulator, width tracking.
struct SheetRenderer<'a, S: GridSink> {
    sink: &'a mut S,
    registry: &'a mut StyleRegistry,
    report: &'a mut SpecExportReport,
    defaults: StyleDefaults,
    layout: &'a SpecSheetLayout,
    rules: &'a [Box<dyn ProtectionRule>],
    acc: ProtectionAccumulator,
    cursor: LayoutCursor,
    /// 1-based `(row, col)` of every cell written or covered by a merge.
    set_cells_written: HashSet<(usize, usize)>,
    dict_width_by_col: BTreeMap<usize, usize>,
    set_cols_width_configured: BTreeSet<usize>,
    n_row_first_header: Option<usize>,
    if_any_section_locked: bool,
    sheet_report: SpecSheetReport,
}

impl<'a, S: GridSink> SheetRenderer<'a, S> {
    fn new(
        sink: &'a mut S,
        registry: &'a mut StyleRegistry,
        report: &'a mut SpecExportReport,
        defaults: StyleDefaults,
        layout: &'a SpecSheetLayout,
        rules: &'a [Box<dyn ProtectionRule>],
        sheet_name: String,
    ) -> Result<Self> {
        let acc = derive_protection_accumulator(rules)?;
        Ok(Self {
            sink,
            registry,
            report,
            defaults,
            layout,
            rules,
            acc,
            cursor: LayoutCursor::default(),
            set_cells_written: HashSet::new(),
            dict_width_by_col: BTreeMap::new(),
            set_cols_width_configured: BTreeSet::new(),
            n_row_first_header: None,
            if_any_section_locked: false,
            sheet_report: SpecSheetReport {
                sheet_name,
                ..Default::default()
            },
        })
    }

    fn write_styled(
        &mut self,
        row: usize,
        col: usize,
        value: &EnumCellValue,
        style: SpecCellStyle,
    ) -> Result<()> {
        let style_ref = self.registry.intern_ref(style);
        self.sink.write_cell(row - 1, col, value, style_ref)?;
        self.set_cells_written.insert((row, col));
        Ok(())
    }

    /// Final lock flag for one cell; the section clamp and lock rules win.
    fn finalize_locked(
        &self,
        if_section_locked: bool,
        row: usize,
        col: usize,
        style: SpecCellStyle,
    ) -> SpecCellStyle {
        let if_locked = if if_section_locked || self.acc.is_explicitly_locked(row, col) {
            true
        } else if style.locked == Some(false) {
            false
        } else {
            !self.acc.is_unlocked(row, col)
        };
        style.with_locked(if_locked)
    }

    fn track_width(&mut self, col: usize, n_width: usize) {
        let n_width_seen = self.dict_width_by_col.entry(col).or_insert(0);
        *n_width_seen = usize::max(*n_width_seen, n_width);
    }

    fn render_section(&mut self, n_idx_section: usize, section: SpecSection) -> Result<()> {
        let c_label = section.label(n_idx_section);
        let if_data_empty = section.data.as_ref().is_none_or(|data| data.is_empty());
        if if_data_empty && section.title.is_none() {
            tracing::debug!(section = c_label.as_str(), "skipping section with nothing to render");
            self.sheet_report.sections_skipped.push(c_label);
            return Ok(());
        }

        let (l_cols, l_unmatched) = match section.data.as_deref() {
            Some(data) => resolve_columns(data, &section.columns)?,
            None => (Vec::new(), Vec::new()),
        };
        for c_name in l_unmatched {
            self.report.warn(format!(
                "Section {c_label:?}: column override {c_name:?} matches no field."
            ));
        }

        let style_title = self
            .defaults
            .resolve_section_style(EnumCellRole::Title, section.title_style.as_ref());
        let style_header = self
            .defaults
            .resolve_section_style(EnumCellRole::Header, section.header_style.as_ref());
        let style_data = self
            .defaults
            .resolve_section_style(EnumCellRole::Data, section.data_style.as_ref());
        let l_styles_col: Vec<SpecCellStyle> = l_cols
            .iter()
            .map(|col| {
                let style_format = col
                    .format
                    .as_ref()
                    .map(|c_fmt| SpecCellStyle::default().with_num_format(c_fmt.clone()));
                cascade_styles([
                    Some(&style_data),
                    col.style.as_ref(),
                    style_format.as_ref(),
                ])
            })
            .collect();

        if section.direction == EnumDirection::Vertical
            && section.position.is_none()
            && section.start_row.is_some()
            && section.start_column.is_none()
        {
            self.report.warn(format!(
                "Section {c_label:?}: start_row is ignored without start_column in a vertical section."
            ));
        }
        let (n_col_start, n_row_start) = self.cursor.resolve_anchor(&section)?;
        let n_cols_visible = if l_cols.is_empty() && section.title.is_some() {
            1
        } else {
            l_cols.len()
        };
        let mut n_row = n_row_start;

        if let Some(c_title) = &section.title {
            let style = self.finalize_locked(section.locked, n_row, n_col_start, style_title);
            if n_cols_visible > 1 {
                let n_col_last = n_col_start + n_cols_visible - 1;
                let style_ref = self.registry.intern_ref(style);
                self.sink.merge_cells(
                    n_row - 1,
                    n_col_start,
                    n_row - 1,
                    n_col_last,
                    c_title,
                    style_ref,
                )?;
                for n_col in n_col_start..=n_col_last {
                    self.set_cells_written.insert((n_row, n_col));
                }
            } else {
                self.write_styled(n_row, n_col_start, &EnumCellValue::from(c_title.as_str()), style)?;
            }
            n_row += 1;
        }

        if (section.show_header || section.title.is_none()) && !l_cols.is_empty() {
            for (n_idx_col, col) in l_cols.iter().enumerate() {
                let n_col = n_col_start + n_idx_col;
                let style = self.finalize_locked(section.locked, n_row, n_col, style_header.clone());
                self.write_styled(n_row, n_col, &EnumCellValue::from(col.header.as_str()), style)?;
                self.track_width(n_col, estimate_unicode_string_width(&col.header));
            }
            self.n_row_first_header.get_or_insert(n_row);
            n_row += 1;
        }

        if let Some(data) = section.data.as_deref() {
            let l_field_ids: Vec<&str> = l_cols.iter().map(|col| col.field_id.as_str()).collect();
            for n_idx_row in 0..data.len() {
                let l_values = l_cols
                    .iter()
                    .map(|col| data.value(n_idx_row, &col.field_id))
                    .collect::<Result<Vec<_>>>()?;

                let row_ctx = SpecRowContext {
                    data_row_index: n_idx_row,
                    sheet_row: n_row,
                    start_col: n_col_start,
                    fields: &l_field_ids,
                    values: &l_values,
                };
                for rule in self.rules {
                    rule.apply_row(&mut self.acc, &row_ctx);
                }

                for (n_idx_col, (col, value)) in l_cols.iter().zip(&l_values).enumerate() {
                    let n_col = n_col_start + n_idx_col;
                    let mut style = match select_conditional_style(value, &col.conditions) {
                        Some(style_matched) => l_styles_col[n_idx_col].merge(style_matched),
                        None => l_styles_col[n_idx_col].clone(),
                    };
                    if style.num_format.is_none() {
                        style.num_format = match value {
                            EnumCellValue::DateTime(_) => Some(C_NUM_FORMAT_DATETIME_DEFAULT.to_string()),
                            EnumCellValue::Date(_) => Some(C_NUM_FORMAT_DATE_DEFAULT.to_string()),
                            _ => None,
                        };
                    }
                    let style = self.finalize_locked(section.locked, n_row, n_col, style);
                    self.write_styled(n_row, n_col, value, style)?;
                    self.track_width(n_col, estimate_width_len(value));
                }
                n_row += 1;
            }
        }

        for (n_idx_col, col) in l_cols.iter().enumerate() {
            if let Some(n_width) = col.width {
                let n_col = n_col_start + n_idx_col;
                self.sink.set_column_width(n_col, n_width)?;
                self.set_cols_width_configured.insert(n_col);
            }
        }

        let n_rows_written = n_row - n_row_start;
        let (n_gap_rows, n_gap_cols) = match section.direction {
            EnumDirection::Vertical => (section.gap_after, 0),
            EnumDirection::Horizontal => (0, section.gap_after),
        };
        let placement = SpecSectionPlacement {
            label: c_label,
            start_col: n_col_start,
            start_row: n_row_start,
            end_col: n_col_start + n_cols_visible + n_gap_cols,
            end_row: n_row + n_gap_rows,
            rows_written: n_rows_written,
        };
        self.cursor
            .advance(section.direction, &placement, n_cols_visible);
        self.if_any_section_locked |= section.locked;

        tracing::debug!(
            section = placement.label.as_str(),
            anchor = name_for_cell(placement.start_col, placement.start_row).as_str(),
            rows = placement.rows_written,
            cols = n_cols_visible,
            "section placed"
        );
        self.sheet_report.sections.push(placement);
        Ok(())
    }

    fn apply_unlocked_ranges(&mut self) -> Result<()> {
        let style_unlocked = cascade_styles([
            self.defaults.document.as_ref(),
            self.defaults.sheet.as_ref(),
        ])
        .with_locked(false);

        for range in self.acc.unlocked_ranges.clone() {
            if range.is_full_height() {
                for n_col in range.first_col..=usize::min(range.last_col, N_NCOLS_EXCEL_MAX - 1) {
                    let style_ref = self.registry.intern_ref(style_unlocked.clone());
                    self.sink.set_column_style(n_col, style_ref)?;
                }
                continue;
            }

            if range.area() > N_CELLS_UNLOCK_FILL_MAX {
                self.report.warn(format!(
                    "Unlocked range {}:{} spans {} cells; only written cells inside it are unlocked.",
                    name_for_cell(range.first_col, range.first_row),
                    name_for_cell(range.last_col, range.last_row),
                    range.area()
                ));
                continue;
            }
            for n_row in range.first_row..=range.last_row {
                for n_col in range.first_col..=range.last_col {
                    if self.set_cells_written.contains(&(n_row, n_col))
                        || !self.acc.is_unlocked(n_row, n_col)
                    {
                        continue;
                    }
                    self.write_styled(n_row, n_col, &EnumCellValue::None, style_unlocked.clone())?;
                }
            }
        }
        Ok(())
    }

    fn finalize(mut self) -> Result<SpecSheetReport> {
        let layout = self.layout;
        if layout.freeze_rows > 0 || layout.freeze_cols > 0 {
            self.sink
                .set_freeze_panes(layout.freeze_rows, layout.freeze_cols)?;
        }

        match self.n_row_first_header {
            Some(n_row_header) if layout.auto_filter && self.cursor.max_col > 0 => {
                self.sink.set_autofilter(
                    n_row_header - 1,
                    0,
                    usize::max(self.cursor.max_row, n_row_header) - 1,
                    self.cursor.max_col - 1,
                )?;
            }
            _ => {}
        }

        if layout.auto_fit_columns {
            let n_width_max = f64::max(layout.max_column_width, N_WIDTH_COLUMN_MIN);
            for (n_col, n_width_seen) in &self.dict_width_by_col {
                if self.set_cols_width_configured.contains(n_col) {
                    continue;
                }
                let n_width = (*n_width_seen as f64 + N_WIDTH_COLUMN_PADDING)
                    .clamp(N_WIDTH_COLUMN_MIN, n_width_max);
                self.sink.set_column_width(*n_col, n_width)?;
            }
        }

        let if_protect = self.if_any_section_locked || self.acc.if_protect_sheet;
        if if_protect {
            self.apply_unlocked_ranges()?;
            self.sink.protect_sheet(&self.acc)?;
        }
        self.sheet_report.if_protected = if_protect;
        Ok(self.sheet_report)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WorkbookRendering

fn render_sheet<S: GridSink>(
    sheet: SpecSheet,
    document_style: Option<&SpecCellStyle>,
    sink: &mut S,
    registry: &mut StyleRegistry,
    set_sheet_names_existing: &mut BTreeSet<String>,
    report: &mut SpecExportReport,
) -> Result<SpecSheetReport> {
    let SpecSheet {
        name,
        sections,
        layout,
        protection,
        default_style,
    } = sheet;

    let c_name_clean = sanitize_sheet_name(&name, "_");
    if c_name_clean != name {
        report.warn(format!("Sheet name {name:?} sanitized to {c_name_clean:?}."));
    }
    let c_name_unique = derive_unique_sheet_name(set_sheet_names_existing, &c_name_clean);
    let _span = tracing::info_span!("render_sheet", sheet = c_name_unique.as_str()).entered();
    sink.add_sheet(&c_name_unique)?;

    let defaults = StyleDefaults {
        document: document_style.cloned(),
        sheet: default_style,
    };
    let mut renderer = SheetRenderer::new(
        sink,
        registry,
        report,
        defaults,
        &layout,
        &protection,
        c_name_unique,
    )?;
    for (n_idx_section, section) in sections.into_iter().enumerate() {
        let c_label = section.label(n_idx_section);
        renderer
            .render_section(n_idx_section, section)
            .map_err(|err| err.in_section(&c_label))?;
    }
    renderer.finalize()
}

fn render_workbook_with<S: GridSink>(
    workbook: SpecWorkbook,
    sink: &mut S,
    registry: &mut StyleRegistry,
    set_sheet_names_existing: &mut BTreeSet<String>,
    report: &mut SpecExportReport,
) -> Result<()> {
    let SpecWorkbook {
        sheets,
        default_style,
    } = workbook;
    tracing::info!(sheets = sheets.len(), "rendering workbook");

    for sheet in sheets {
        let sheet_report = render_sheet(
            sheet,
            default_style.as_ref(),
            sink,
            registry,
            set_sheet_names_existing,
            report,
        )?;
        report.sheets.push(sheet_report);
    }
    Ok(())
}

/// Render every sheet of `workbook` into `sink` with a fresh style registry.
pub fn render_workbook<S: GridSink>(
    workbook: SpecWorkbook,
    sink: &mut S,
) -> Result<SpecExportReport> {
    let mut registry = StyleRegistry::new();
    let mut set_sheet_names_existing = BTreeSet::new();
    let mut report = SpecExportReport::default();
    render_workbook_with(
        workbook,
        sink,
        &mut registry,
        &mut set_sheet_names_existing,
        &mut report,
    )?;
    Ok(report)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region XlsxExport

/// Render `workbook` and serialize it to xlsx bytes.
pub fn write_xlsx_to_buffer(workbook: SpecWorkbook) -> Result<(Vec<u8>, SpecExportReport)> {
    let mut sink = XlsxGridSink::new();
    let report = render_workbook(workbook, &mut sink)?;
    let v_bytes = sink.save_to_buffer()?;
    tracing::info!(
        bytes = v_bytes.len(),
        sheets = report.sheets.len(),
        warnings = report.warnings.len(),
        "xlsx export finished"
    );
    Ok((v_bytes, report))
}

/// Render `workbook` and write the document to `writer`.
///
/// Nothing reaches `writer` unless rendering and serialization both succeed.
pub fn write_xlsx_to_writer<W: Write>(
    workbook: SpecWorkbook,
    writer: &mut W,
) -> Result<SpecExportReport> {
    let (v_bytes, report) = write_xlsx_to_buffer(workbook)?;
    writer.write_all(&v_bytes)?;
    Ok(report)
}

/// Render `workbook` and write the document to `path`.
pub fn write_xlsx_to_path(
    workbook: SpecWorkbook,
    path: impl AsRef<Path>,
) -> Result<SpecExportReport> {
    let (v_bytes, report) = write_xlsx_to_buffer(workbook)?;
    std::fs::write(path, v_bytes)?;
    Ok(report)
}

/// Stateful workbook writer.
///
/// Several workbook specs can be written into one document; sheet names stay
/// unique and styles are shared across calls. Nothing touches the disk until
/// [`Self::close`]. A failed [`Self::write_workbook`] poisons the writer:
/// the partially rendered document is never written.
pub struct XlsxWriter {
    path_file_out: PathBuf,
    sink: XlsxGridSink,
    registry: StyleRegistry,
    set_sheet_names_existing: BTreeSet<String>,
    report: SpecExportReport,
    if_closed: bool,
    /// First render error; set once, blocks every later write and close.
    c_error_poisoned: Option<String>,
}

impl XlsxWriter {
    pub fn new(path_file_out: impl Into<PathBuf>) -> Self {
        Self {
            path_file_out: path_file_out.into(),
            sink: XlsxGridSink::new(),
            registry: StyleRegistry::new(),
            set_sheet_names_existing: BTreeSet::new(),
            report: SpecExportReport::default(),
            if_closed: false,
            c_error_poisoned: None,
        }
    }

    /// Return output file path as string.
    pub fn file_out(&self) -> String {
        self.path_file_out.to_string_lossy().to_string()
    }

    /// Snapshot of the accumulated export report.
    pub fn report(&self) -> SpecExportReport {
        self.report.clone()
    }

    /// Render the sheets of `workbook` into the pending document.
    pub fn write_workbook(&mut self, workbook: SpecWorkbook) -> Result<()> {
        if self.if_closed {
            return Err(GridkitError::GridSink(
                "Cannot write after close().".to_string(),
            ));
        }
        self.validate_not_poisoned()?;
        let result = render_workbook_with(
            workbook,
            &mut self.sink,
            &mut self.registry,
            &mut self.set_sheet_names_existing,
            &mut self.report,
        );
        if let Err(err) = &result {
            self.c_error_poisoned = Some(err.to_string());
        }
        result
    }

    fn validate_not_poisoned(&self) -> Result<()> {
        match &self.c_error_poisoned {
            Some(c_err) => Err(GridkitError::GridSink(format!(
                "Writer holds a partially rendered document after an earlier failure: {c_err}"
            ))),
            None => Ok(()),
        }
    }

    /// Serialize and flush the document to disk. Idempotent.
    ///
    /// Fails without touching the disk when the writer is poisoned.
    pub fn close(&mut self) -> Result<()> {
        if self.if_closed {
            return Ok(());
        }
        self.validate_not_poisoned()?;
        let v_bytes = self.sink.save_to_buffer()?;
        std::fs::write(&self.path_file_out, v_bytes)?;
        self.if_closed = true;
        tracing::info!(file = self.file_out().as_str(), "xlsx document written");
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::{Columns, LockAllExcept, LockCellsWhere, LockRowsWhere, UnlockRange};
    use crate::record::{RowTable, SpecRecordField};
    use crate::sink::GridBuffer;
    use crate::spec::SpecCellRange;

    fn table_ab(n_rows: usize) -> RowTable {
        let mut table = RowTable::new(["a", "b"]);
        for n_idx in 0..n_rows {
            table = table.with_row([
                EnumCellValue::from(format!("r{n_idx}")),
                EnumCellValue::from(n_idx as i64),
            ]);
        }
        table
    }

    fn render(sheet: SpecSheet) -> (GridBuffer, SpecExportReport) {
        let mut sink = GridBuffer::new();
        let report = render_workbook(SpecWorkbook::new().with_sheet(sheet), &mut sink).unwrap();
        (sink, report)
    }

    #[test]
    fn test_vertical_sections_stack_below_each_other() {
        let sheet = SpecSheet::new("S")
            .with_section(
                SpecSection::new()
                    .with_title("A")
                    .with_show_header(true)
                    .with_data(table_ab(2)),
            )
            .with_section(SpecSection::new().with_title("B").with_data(table_ab(1)));
        let (sink, report) = render(sheet);

        let l_placements = &report.sheets[0].sections;
        assert_eq!(l_placements[0].start_row, 1);
        assert_eq!(l_placements[0].rows_written, 4);
        assert_eq!(l_placements[0].end_row, 5);
        assert_eq!(l_placements[1].start_row, 5);

        let grid = sink.sheet("S").unwrap();
        assert_eq!(grid.value("A1"), EnumCellValue::from("A"));
        assert_eq!(grid.value("B2"), EnumCellValue::from("b"));
        assert_eq!(grid.value("A4"), EnumCellValue::from("r1"));
        assert_eq!(grid.value("A5"), EnumCellValue::from("B"));
        // title without show_header suppresses the header row
        assert_eq!(grid.value("A6"), EnumCellValue::from("r0"));
        assert_eq!(grid.merges[0].last_col, 1);
    }

    #[test]
    fn test_vertical_gap_after_leaves_blank_rows() {
        let sheet = SpecSheet::new("S")
            .with_section(
                SpecSection::new()
                    .with_title("A")
                    .with_show_header(true)
                    .with_gap_after(2)
                    .with_data(table_ab(2)),
            )
            .with_section(SpecSection::new().with_title("B").with_data(table_ab(1)));
        let (sink, report) = render(sheet);

        let l_placements = &report.sheets[0].sections;
        assert_eq!(l_placements[0].rows_written, 4);
        assert_eq!(l_placements[0].end_row, 7);
        assert_eq!(l_placements[1].start_row, 7);

        let grid = sink.sheet("S").unwrap();
        assert_eq!(grid.value("A4"), EnumCellValue::from("r1"));
        for c_ref in ["A5", "B5", "A6", "B6"] {
            assert!(grid.cell(c_ref).is_none(), "{c_ref} should stay blank");
        }
        assert_eq!(grid.value("A7"), EnumCellValue::from("B"));
        assert_eq!(grid.value("A8"), EnumCellValue::from("r0"));
    }

    #[test]
    fn test_vertical_start_row_without_column_warns() {
        let sheet = SpecSheet::new("S")
            .with_section(SpecSection::new().with_data(table_ab(1)))
            .with_section(
                SpecSection::new()
                    .with_id("low")
                    .with_start(None, Some(10))
                    .with_data(table_ab(1)),
            );
        let (_, report) = render(sheet);

        assert_eq!(report.sheets[0].sections[1].start_row, 3);
        assert!(
            report
                .warnings
                .iter()
                .any(|c_msg| c_msg.contains("\"low\"") && c_msg.contains("start_row is ignored"))
        );
    }

    #[test]
    fn test_horizontal_sections_with_explicit_positions() {
        let table_abc = RowTable::new(["x", "y", "z"]).with_row([1_i64, 2, 3]);
        let sheet = SpecSheet::new("S")
            .with_section(
                SpecSection::new()
                    .with_direction(EnumDirection::Horizontal)
                    .with_position("A1")
                    .with_data(table_abc),
            )
            .with_section(
                SpecSection::new()
                    .with_direction(EnumDirection::Horizontal)
                    .with_position("D1")
                    .with_data(table_ab(1)),
            );
        let (sink, report) = render(sheet);

        let l_placements = &report.sheets[0].sections;
        assert_eq!(l_placements[0].start_col, 0);
        assert_eq!(l_placements[0].end_col, 3);
        assert_eq!(l_placements[1].start_col, 3);

        let grid = sink.sheet("S").unwrap();
        assert_eq!(grid.value("C1"), EnumCellValue::from("z"));
        assert_eq!(grid.value("D1"), EnumCellValue::from("a"));
        assert_eq!(grid.value("E2"), EnumCellValue::Number(0.0));
    }

    #[test]
    fn test_horizontal_automatic_anchor_uses_gap() {
        let sheet = SpecSheet::new("S")
            .with_section(
                SpecSection::new()
                    .with_direction(EnumDirection::Horizontal)
                    .with_gap_after(1)
                    .with_data(table_ab(1)),
            )
            .with_section(
                SpecSection::new()
                    .with_direction(EnumDirection::Horizontal)
                    .with_start(None, Some(3))
                    .with_data(table_ab(1)),
            );
        let (sink, report) = render(sheet);
        let l_placements = &report.sheets[0].sections;
        assert_eq!(l_placements[0].end_col, 3);
        assert_eq!((l_placements[1].start_col, l_placements[1].start_row), (3, 3));
        assert_eq!(sink.sheets[0].value("D3"), EnumCellValue::from("a"));
    }

    #[test]
    fn test_anchor_priority() {
        let cursor = LayoutCursor {
            current_row: 7,
            max_row: 6,
            max_col: 4,
            prev_section_end_col: 4,
        };
        let section = SpecSection::new()
            .with_position("C2")
            .with_start(Some(9), Some(9));
        assert_eq!(cursor.resolve_anchor(&section).unwrap(), (2, 2));

        let section = SpecSection::new().with_start(Some(5), None);
        assert_eq!(cursor.resolve_anchor(&section).unwrap(), (5, 7));

        let section = SpecSection::new().with_direction(EnumDirection::Horizontal);
        assert_eq!(cursor.resolve_anchor(&section).unwrap(), (4, 1));

        assert_eq!(cursor.resolve_anchor(&SpecSection::new()).unwrap(), (0, 7));
    }

    #[test]
    fn test_invalid_position_aborts_with_section_label() {
        let sheet = SpecSheet::new("S")
            .with_section(SpecSection::new().with_data(table_ab(1)))
            .with_section(
                SpecSection::new()
                    .with_id("bad")
                    .with_position("A0")
                    .with_data(table_ab(1)),
            );
        let err = render_workbook(SpecWorkbook::new().with_sheet(sheet), &mut GridBuffer::new())
            .unwrap_err();
        match err {
            GridkitError::PositionFormat { literal, section } => {
                assert_eq!(literal, "A0");
                assert_eq!(section.as_deref(), Some("bad"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_position_writes_no_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xlsx");
        let sheet = SpecSheet::new("S")
            .with_section(SpecSection::new().with_position("A0").with_data(table_ab(1)));
        let err = write_xlsx_to_path(SpecWorkbook::new().with_sheet(sheet), &path).unwrap_err();
        assert!(err.to_string().contains("\"A0\""));
        assert!(!path.exists());
    }

    #[test]
    fn test_hidden_and_excluded_columns_do_not_reserve_slots() {
        let table = RowTable::with_fields(vec![
            SpecRecordField::new("a"),
            SpecRecordField::tagged("secret", "-"),
            SpecRecordField::new("b"),
            SpecRecordField::tagged("c", "header:Gamma,width:14"),
        ])
        .with_row([
            EnumCellValue::from(1_i64),
            EnumCellValue::from("x"),
            EnumCellValue::from(2_i64),
            EnumCellValue::from(3_i64),
        ]);
        let sheet = SpecSheet::new("S").with_section(
            SpecSection::new()
                .with_data(table)
                .with_column(SpecColumn::new("b").with_hidden(true))
                .with_column(SpecColumn::new("nope").with_header("ignored")),
        );
        let (sink, report) = render(sheet);

        let grid = sink.sheet("S").unwrap();
        assert_eq!(grid.value("A1"), EnumCellValue::from("a"));
        assert_eq!(grid.value("B1"), EnumCellValue::from("Gamma"));
        assert_eq!(grid.value("B2"), EnumCellValue::Number(3.0));
        assert_eq!(grid.value("C1"), EnumCellValue::None);
        assert_eq!(grid.column_widths.get(&1), Some(&14.0));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("\"nope\""));
    }

    #[test]
    fn test_conditional_first_match_and_column_format() {
        let style_x = SpecCellStyle::default().with_fill_color("#00FF00");
        let style_y = SpecCellStyle::default().with_fill_color("#FF0000");
        let table = RowTable::new(["qty"])
            .with_row([150_i64])
            .with_row([60_i64])
            .with_row([10_i64]);
        let sheet = SpecSheet::new("S").with_section(
            SpecSection::new().with_data(table).with_column(
                SpecColumn::new("qty")
                    .with_format("0.00")
                    .with_condition(">100", style_x)
                    .with_condition(">50", style_y),
            ),
        );
        let (sink, _) = render(sheet);

        let grid = sink.sheet("S").unwrap();
        let fill = |c_ref: &str| grid.cell(c_ref).unwrap().style.fill.color.clone();
        assert_eq!(fill("A2").as_deref(), Some("#00FF00"));
        assert_eq!(fill("A3").as_deref(), Some("#FF0000"));
        assert_eq!(fill("A4"), None);
        assert_eq!(grid.cell("A4").unwrap().style.num_format.as_deref(), Some("0.00"));
        assert_eq!(grid.cell("A1").unwrap().style.font.bold, Some(true));
    }

    #[test]
    fn test_locked_section_clamps_after_cascade() {
        let sheet = SpecSheet::new("S").with_section(
            SpecSection::new()
                .with_locked(true)
                .with_data_style(SpecCellStyle::default().with_locked(false))
                .with_data(table_ab(1)),
        );
        let (sink, report) = render(sheet);
        let grid = sink.sheet("S").unwrap();
        assert_eq!(grid.cell("A2").unwrap().style.locked, Some(true));
        assert!(grid.protection.is_some());
        assert!(report.sheets[0].if_protected);
    }

    #[test]
    fn test_explicit_unlock_style_survives_in_unlocked_section() {
        let sheet = SpecSheet::new("S").with_section(
            SpecSection::new()
                .with_data_style(SpecCellStyle::default().with_locked(false))
                .with_data(table_ab(1)),
        );
        let (sink, report) = render(sheet);
        let grid = sink.sheet("S").unwrap();
        assert_eq!(grid.cell("A2").unwrap().style.locked, Some(false));
        assert_eq!(grid.cell("A1").unwrap().style.locked, Some(true));
        assert!(grid.protection.is_none());
        assert!(!report.sheets[0].if_protected);
    }

    #[test]
    fn test_lock_all_except_columns_unlocks_cells_and_columns() {
        let sheet = SpecSheet::new("S")
            .with_section(SpecSection::new().with_data(table_ab(2)))
            .with_protection(LockAllExcept::new(vec![Box::new(Columns::new(["B"]))]));
        let (sink, _) = render(sheet);

        let grid = sink.sheet("S").unwrap();
        assert_eq!(grid.cell("A2").unwrap().style.locked, Some(true));
        assert_eq!(grid.cell("B2").unwrap().style.locked, Some(false));
        assert_eq!(grid.column_styles.get(&1).unwrap().locked, Some(false));
        let acc = grid.protection.as_ref().unwrap();
        assert_eq!(acc.unlocked_ranges, vec![SpecCellRange::full_columns(1, 1)]);
    }

    #[test]
    fn test_bounded_unlock_range_fills_blank_cells() {
        let sheet = SpecSheet::new("S")
            .with_section(SpecSection::new().with_data(table_ab(1)))
            .with_protection(LockAllExcept::new(vec![Box::new(UnlockRange::new([
                "B2:C3",
            ]))]));
        let (sink, _) = render(sheet);

        let grid = sink.sheet("S").unwrap();
        assert_eq!(grid.cell("B2").unwrap().value, EnumCellValue::Number(0.0));
        assert_eq!(grid.cell("B2").unwrap().style.locked, Some(false));
        assert_eq!(grid.cell("C3").unwrap().value, EnumCellValue::None);
        assert_eq!(grid.cell("C3").unwrap().style.locked, Some(false));
        assert!(grid.cell("D3").is_none());
    }

    #[test]
    fn test_data_dependent_rules_lock_rows_and_cells() {
        let table = RowTable::new(["name", "qty"])
            .with_row([EnumCellValue::from("a"), EnumCellValue::Number(-1.0)])
            .with_row([EnumCellValue::from("b"), EnumCellValue::Number(5.0)])
            .with_row([EnumCellValue::from("c"), EnumCellValue::Number(7.0)]);
        let sheet = SpecSheet::new("S")
            .with_section(SpecSection::new().with_data(table))
            .with_protection(LockAllExcept::new(vec![
                Box::new(Columns::new(["A", "B"])),
                Box::new(LockRowsWhere::new(|n_idx, _| n_idx == 2)),
                Box::new(LockCellsWhere::new(|field, _, value| {
                    field == "qty" && matches!(value, EnumCellValue::Number(n) if *n < 0.0)
                })),
            ]));
        let (sink, _) = render(sheet);

        let grid = sink.sheet("S").unwrap();
        let locked = |c_ref: &str| grid.cell(c_ref).unwrap().style.locked;
        assert_eq!(locked("A2"), Some(false));
        assert_eq!(locked("B2"), Some(true));
        assert_eq!(locked("B3"), Some(false));
        assert_eq!(locked("A4"), Some(true));
        assert_eq!(locked("B4"), Some(true));
    }

    #[test]
    fn test_row_lock_stays_within_section_columns() {
        let table_flags = RowTable::new(["flag", "qty"])
            .with_row([EnumCellValue::from("lock"), EnumCellValue::Number(1.0)])
            .with_row([EnumCellValue::from("keep"), EnumCellValue::Number(2.0)]);
        let sheet = SpecSheet::new("S")
            .with_section(
                SpecSection::new()
                    .with_direction(EnumDirection::Horizontal)
                    .with_data(table_ab(2)),
            )
            .with_section(
                SpecSection::new()
                    .with_direction(EnumDirection::Horizontal)
                    .with_data(table_flags),
            )
            .with_protection(LockAllExcept::new(vec![
                Box::new(Columns::new(["A", "B", "C", "D"])),
                Box::new(LockRowsWhere::new(|_, l_values| {
                    l_values.first() == Some(&EnumCellValue::from("lock"))
                })),
            ]));
        let (sink, _) = render(sheet);

        let grid = sink.sheet("S").unwrap();
        let locked = |c_ref: &str| grid.cell(c_ref).unwrap().style.locked;
        assert_eq!(locked("C2"), Some(true));
        assert_eq!(locked("D2"), Some(true));
        assert_eq!(locked("C3"), Some(false));
        // neighbouring section on the same sheet row keeps its unlock
        assert_eq!(locked("A2"), Some(false));
        assert_eq!(locked("B2"), Some(false));
        let acc = grid.protection.as_ref().unwrap();
        assert!(!acc.is_explicitly_locked(2, 0));
        assert!(!acc.is_explicitly_locked(2, 4));
    }

    #[test]
    fn test_empty_untitled_section_is_skipped() {
        let sheet = SpecSheet::new("S")
            .with_section(SpecSection::new().with_id("empty").with_data(RowTable::new(["a"])))
            .with_section(SpecSection::new().with_id("unbound"))
            .with_section(SpecSection::new().with_data(table_ab(1)));
        let (sink, report) = render(sheet);

        assert_eq!(report.sheets[0].sections_skipped, vec!["empty", "unbound"]);
        assert_eq!(report.sheets[0].sections[0].start_row, 1);
        assert_eq!(sink.sheets[0].value("A1"), EnumCellValue::from("a"));
    }

    #[test]
    fn test_titled_section_without_data_renders_title_only() {
        let sheet = SpecSheet::new("S")
            .with_section(SpecSection::new().with_title("Pending"))
            .with_section(SpecSection::new().with_data(table_ab(1)));
        let (sink, report) = render(sheet);

        assert_eq!(report.sheets[0].sections[0].rows_written, 1);
        assert!(sink.sheets[0].merges.is_empty());
        assert_eq!(sink.sheets[0].value("A2"), EnumCellValue::from("a"));
    }

    #[test]
    fn test_late_binding_by_id() {
        let workbook = SpecWorkbook::new()
            .with_sheet(
                SpecSheet::new("S")
                    .with_section(SpecSection::new().with_id("orders").with_title("Orders")),
            )
            .with_data("orders", table_ab(2))
            .unwrap();
        let mut sink = GridBuffer::new();
        let report = render_workbook(workbook, &mut sink).unwrap();
        assert_eq!(report.sheets[0].sections[0].rows_written, 3);
        assert_eq!(sink.sheets[0].value("B3"), EnumCellValue::Number(1.0));

        let err = SpecWorkbook::new()
            .with_sheet(SpecSheet::new("S"))
            .with_data("missing", table_ab(1))
            .unwrap_err();
        assert!(matches!(err, GridkitError::SchemaValidation(_)));
    }

    #[test]
    fn test_dates_get_default_number_format() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let table = RowTable::new(["day", "at"]).with_row([
            EnumCellValue::from(date),
            EnumCellValue::from(date.and_hms_opt(9, 0, 0).unwrap()),
        ]);
        let (sink, _) = render(SpecSheet::new("S").with_section(SpecSection::new().with_data(table)));
        let grid = sink.sheet("S").unwrap();
        assert_eq!(
            grid.cell("A2").unwrap().style.num_format.as_deref(),
            Some(C_NUM_FORMAT_DATE_DEFAULT)
        );
        assert_eq!(
            grid.cell("B2").unwrap().style.num_format.as_deref(),
            Some(C_NUM_FORMAT_DATETIME_DEFAULT)
        );
    }

    #[test]
    fn test_sheet_layout_freeze_filter_and_autofit() {
        let table = RowTable::new(["short", "long"]).with_row([
            EnumCellValue::from("x"),
            EnumCellValue::from("y".repeat(200)),
        ]);
        let sheet = SpecSheet::new("S")
            .with_section(SpecSection::new().with_title("T").with_show_header(true).with_data(table))
            .with_layout(SpecSheetLayout {
                freeze_rows: 2,
                freeze_cols: 1,
                auto_filter: true,
                auto_fit_columns: true,
                max_column_width: 30.0,
            });
        let (sink, _) = render(sheet);

        let grid = sink.sheet("S").unwrap();
        assert_eq!(grid.freeze_panes, Some((2, 1)));
        assert_eq!(grid.autofilter, Some((1, 0, 2, 1)));
        assert_eq!(grid.column_widths.get(&0), Some(&N_WIDTH_COLUMN_MIN));
        assert_eq!(grid.column_widths.get(&1), Some(&30.0));
    }

    #[test]
    fn test_sheet_names_are_sanitized_and_unique() {
        let workbook = SpecWorkbook::new()
            .with_sheet(SpecSheet::new("Q1/Q2"))
            .with_sheet(SpecSheet::new("Q1_Q2"));
        let mut sink = GridBuffer::new();
        let report = render_workbook(workbook, &mut sink).unwrap();
        assert_eq!(report.sheets[0].sheet_name, "Q1_Q2");
        assert_eq!(report.sheets[1].sheet_name, "Q1_Q2__2");
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_document_and_sheet_defaults_cascade() {
        let workbook = SpecWorkbook::new()
            .with_default_style(SpecCellStyle::default().with_font_color("#111111"))
            .with_sheet(
                SpecSheet::new("S")
                    .with_default_style(SpecCellStyle::default().with_fill_color("#EEEEEE"))
                    .with_section(
                        SpecSection::new()
                            .with_data(table_ab(1))
                            .with_column(
                                SpecColumn::new("b")
                                    .with_style(SpecCellStyle::default().with_font_color("#222222")),
                            ),
                    ),
            );
        let mut sink = GridBuffer::new();
        render_workbook(workbook, &mut sink).unwrap();
        let grid = &sink.sheets[0];
        let style_a = &grid.cell("A2").unwrap().style;
        let style_b = &grid.cell("B2").unwrap().style;
        assert_eq!(style_a.font.color.as_deref(), Some("#111111"));
        assert_eq!(style_a.fill.color.as_deref(), Some("#EEEEEE"));
        assert_eq!(style_b.font.color.as_deref(), Some("#222222"));
        // sheet default outranks the built-in header fill
        assert_eq!(grid.cell("A1").unwrap().style.fill.color.as_deref(), Some("#EEEEEE"));
    }

    #[test]
    fn test_xlsx_writer_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        let mut writer = XlsxWriter::new(&path);
        writer
            .write_workbook(
                SpecWorkbook::new()
                    .with_sheet(SpecSheet::new("A").with_section(SpecSection::new().with_data(table_ab(2)))),
            )
            .unwrap();
        writer
            .write_workbook(SpecWorkbook::new().with_sheet(SpecSheet::new("A")))
            .unwrap();
        assert!(!path.exists());
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(path.exists());
        assert_eq!(writer.report().sheets[1].sheet_name, "A__2");
        assert!(writer.write_workbook(SpecWorkbook::new()).is_err());
    }

    #[test]
    fn test_xlsx_writer_refuses_to_save_after_failed_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.xlsx");
        let mut writer = XlsxWriter::new(&path);
        let workbook = SpecWorkbook::new().with_sheet(
            SpecSheet::new("S")
                .with_section(SpecSection::new().with_data(table_ab(2)))
                .with_section(
                    SpecSection::new()
                        .with_id("broken")
                        .with_position("A0")
                        .with_data(table_ab(1)),
                ),
        );

        let err = writer.write_workbook(workbook).unwrap_err();
        assert!(matches!(err, GridkitError::PositionFormat { .. }));
        assert!(writer.report().sheets.is_empty());

        let err = writer.close().unwrap_err();
        assert!(matches!(err, GridkitError::GridSink(ref c_msg) if c_msg.contains("A0")));
        assert!(!path.exists());
        // stays poisoned
        assert!(writer.close().is_err());
        assert!(
            writer
                .write_workbook(SpecWorkbook::new().with_sheet(SpecSheet::new("T")))
                .is_err()
        );
        assert!(!path.exists());
    }
}
