//! Grid sinks: where rendered cells, merges and sheet directives land.
//!
//! All coordinates handed to a sink are 0-based rows and columns.
//! [`XlsxGridSink`] encodes through `rust_xlsxwriter`; [`GridBuffer`] records
//! everything in memory for inspection.

use std::collections::BTreeMap;

use rust_xlsxwriter::{Format, FormatAlign, FormatBorder, ProtectionOptions, Workbook, Worksheet};

use crate::error::{GridkitError, Result};
use crate::position::resolve_position;
use crate::protection::ProtectionAccumulator;
use crate::spec::{EnumCellValue, SpecCellStyle};
use crate::style::{StyleId, StyleRef};
use crate::util::{cast_col_num, cast_row_num};

/// Receiver of rendered grid content.
pub trait GridSink {
    /// Start a new sheet; later calls target it until the next `add_sheet`.
    fn add_sheet(&mut self, name: &str) -> Result<()>;

    fn write_cell(
        &mut self,
        row: usize,
        col: usize,
        value: &EnumCellValue,
        style: StyleRef<'_>,
    ) -> Result<()>;

    /// Merge an inclusive range and write `text` into it.
    fn merge_cells(
        &mut self,
        first_row: usize,
        first_col: usize,
        last_row: usize,
        last_col: usize,
        text: &str,
        style: StyleRef<'_>,
    ) -> Result<()>;

    fn set_column_width(&mut self, col: usize, width: f64) -> Result<()>;

    /// Default style for every cell of `col` that is never written.
    fn set_column_style(&mut self, col: usize, style: StyleRef<'_>) -> Result<()>;

    fn set_freeze_panes(&mut self, row: usize, col: usize) -> Result<()>;

    fn set_autofilter(
        &mut self,
        first_row: usize,
        first_col: usize,
        last_row: usize,
        last_col: usize,
    ) -> Result<()>;

    /// Enable protection on the current sheet.
    fn protect_sheet(&mut self, protection: &ProtectionAccumulator) -> Result<()>;

    /// Serialize the whole document.
    fn save_to_buffer(&mut self) -> Result<Vec<u8>>;
}

////////////////////////////////////////////////////////////////////////////////
// #region XlsxSink

/// Sink backed by an in-memory `rust_xlsxwriter` workbook.
pub struct XlsxGridSink {
    workbook: Workbook,
    /// One encoder format per style handle, built on first use.
    l_formats: Vec<Option<Format>>,
    n_idx_sheet_active: Option<usize>,
    n_sheets: usize,
}

impl Default for XlsxGridSink {
    fn default() -> Self {
        Self::new()
    }
}

impl XlsxGridSink {
    pub fn new() -> Self {
        Self {
            workbook: Workbook::new(),
            l_formats: Vec::new(),
            n_idx_sheet_active: None,
            n_sheets: 0,
        }
    }

    fn derive_active_sheet(&self) -> Result<usize> {
        self.n_idx_sheet_active
            .ok_or_else(|| GridkitError::GridSink("No active worksheet; call add_sheet first.".to_string()))
    }
}

fn cache_format<'a>(l_formats: &'a mut Vec<Option<Format>>, style: StyleRef<'_>) -> &'a Format {
    let StyleId(n_idx) = style.id;
    if l_formats.len() <= n_idx {
        l_formats.resize(n_idx + 1, None);
    }
    l_formats[n_idx].get_or_insert_with(|| derive_rust_xlsx_format(style.spec))
}

impl GridSink for XlsxGridSink {
    fn add_sheet(&mut self, name: &str) -> Result<()> {
        let worksheet = self.workbook.add_worksheet();
        worksheet.set_name(name)?;
        self.n_idx_sheet_active = Some(self.n_sheets);
        self.n_sheets += 1;
        Ok(())
    }

    fn write_cell(
        &mut self,
        row: usize,
        col: usize,
        value: &EnumCellValue,
        style: StyleRef<'_>,
    ) -> Result<()> {
        let n_idx_sheet = self.derive_active_sheet()?;
        let format = cache_format(&mut self.l_formats, style);
        let worksheet = self.workbook.worksheet_from_index(n_idx_sheet)?;
        write_cell_with_format(worksheet, row, col, value, format)
    }

    fn merge_cells(
        &mut self,
        first_row: usize,
        first_col: usize,
        last_row: usize,
        last_col: usize,
        text: &str,
        style: StyleRef<'_>,
    ) -> Result<()> {
        let n_idx_sheet = self.derive_active_sheet()?;
        let format = cache_format(&mut self.l_formats, style);
        let worksheet = self.workbook.worksheet_from_index(n_idx_sheet)?;
        worksheet.merge_range(
            cast_row_num(first_row)?,
            cast_col_num(first_col)?,
            cast_row_num(last_row)?,
            cast_col_num(last_col)?,
            text,
            format,
        )?;
        Ok(())
    }

    fn set_column_width(&mut self, col: usize, width: f64) -> Result<()> {
        let n_idx_sheet = self.derive_active_sheet()?;
        self.workbook
            .worksheet_from_index(n_idx_sheet)?
            .set_column_width(cast_col_num(col)?, width)?;
        Ok(())
    }

    fn set_column_style(&mut self, col: usize, style: StyleRef<'_>) -> Result<()> {
        let n_idx_sheet = self.derive_active_sheet()?;
        let format = cache_format(&mut self.l_formats, style);
        self.workbook
            .worksheet_from_index(n_idx_sheet)?
            .set_column_format(cast_col_num(col)?, format)?;
        Ok(())
    }

    fn set_freeze_panes(&mut self, row: usize, col: usize) -> Result<()> {
        let n_idx_sheet = self.derive_active_sheet()?;
        self.workbook
            .worksheet_from_index(n_idx_sheet)?
            .set_freeze_panes(cast_row_num(row)?, cast_col_num(col)?)?;
        Ok(())
    }

    fn set_autofilter(
        &mut self,
        first_row: usize,
        first_col: usize,
        last_row: usize,
        last_col: usize,
    ) -> Result<()> {
        let n_idx_sheet = self.derive_active_sheet()?;
        self.workbook.worksheet_from_index(n_idx_sheet)?.autofilter(
            cast_row_num(first_row)?,
            cast_col_num(first_col)?,
            cast_row_num(last_row)?,
            cast_col_num(last_col)?,
        )?;
        Ok(())
    }

    fn protect_sheet(&mut self, protection: &ProtectionAccumulator) -> Result<()> {
        let n_idx_sheet = self.derive_active_sheet()?;
        let worksheet = self.workbook.worksheet_from_index(n_idx_sheet)?;
        if let Some(c_password) = &protection.password {
            worksheet.protect_with_password(c_password);
        }
        worksheet.protect_with_options(&derive_protection_options(protection));
        Ok(())
    }

    fn save_to_buffer(&mut self) -> Result<Vec<u8>> {
        Ok(self.workbook.save_to_buffer()?)
    }
}

fn derive_protection_options(protection: &ProtectionAccumulator) -> ProtectionOptions {
    let allowed = &protection.allowed;
    let mut options = ProtectionOptions::new();
    options.select_locked_cells = allowed.select_locked_cells;
    options.select_unlocked_cells = allowed.select_unlocked_cells;
    options.format_cells = allowed.format_cells;
    options.format_columns = allowed.format_columns;
    options.format_rows = allowed.format_rows;
    options.insert_columns = allowed.insert_columns;
    options.insert_rows = allowed.insert_rows;
    options.insert_links = allowed.insert_links;
    options.delete_columns = allowed.delete_columns;
    options.delete_rows = allowed.delete_rows;
    options.sort = allowed.sort;
    options.use_autofilter = allowed.auto_filter;
    options.use_pivot_tables = allowed.pivot_tables;
    options.edit_objects = allowed.edit_objects;
    options.edit_scenarios = allowed.edit_scenarios;
    options
}

fn write_cell_with_format(
    worksheet: &mut Worksheet,
    row_idx: usize,
    col_idx: usize,
    value: &EnumCellValue,
    format: &Format,
) -> Result<()> {
    let n_row = cast_row_num(row_idx)?;
    let n_col = cast_col_num(col_idx)?;
    match value {
        EnumCellValue::None => {
            worksheet.write_blank(n_row, n_col, format)?;
        }
        EnumCellValue::String(val) => {
            worksheet.write_string_with_format(n_row, n_col, val, format)?;
        }
        EnumCellValue::Number(val) => {
            worksheet.write_number_with_format(n_row, n_col, *val, format)?;
        }
        EnumCellValue::Bool(val) => {
            worksheet.write_boolean_with_format(n_row, n_col, *val, format)?;
        }
        EnumCellValue::DateTime(val) => {
            worksheet.write_datetime_with_format(n_row, n_col, val, format)?;
        }
        EnumCellValue::Date(val) => {
            worksheet.write_datetime_with_format(n_row, n_col, val, format)?;
        }
        EnumCellValue::Formula(val) => {
            worksheet.write_formula_with_format(n_row, n_col, val.as_str(), format)?;
        }
    }
    Ok(())
}

/// Translate a resolved style into an encoder format.
pub fn derive_rust_xlsx_format(spec: &SpecCellStyle) -> Format {
    let mut format = Format::new();

    if let Some(val) = &spec.font.name {
        format = format.set_font_name(val.clone());
    }
    if let Some(val) = spec.font.size {
        format = format.set_font_size(val as f64);
    }
    if spec.font.bold.unwrap_or(false) {
        format = format.set_bold();
    }
    if spec.font.italic.unwrap_or(false) {
        format = format.set_italic();
    }
    if let Some(val) = &spec.font.color {
        format = format.set_font_color(val.as_str());
    }

    if let Some(val) = &spec.alignment.horizontal
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }
    if let Some(val) = &spec.alignment.vertical
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }

    if let Some(val) = &spec.num_format {
        format = format.set_num_format(val.clone());
    }
    if let Some(val) = &spec.fill.color {
        format = format.set_background_color(val.as_str());
    }

    if let Some(val) = spec.border.style {
        format = format.set_border(derive_format_border(val));
    }
    if let Some(val) = &spec.border.color {
        format = format.set_border_color(val.as_str());
    }

    if spec.text_wrap.unwrap_or(false) {
        format = format.set_text_wrap();
    }

    match spec.locked {
        Some(false) => format = format.set_unlocked(),
        Some(true) => format = format.set_locked(),
        None => {}
    }

    format
}

fn derive_format_border(border: i64) -> FormatBorder {
    match border {
        0 => FormatBorder::None,
        1 => FormatBorder::Thin,
        2 => FormatBorder::Medium,
        3 => FormatBorder::Dashed,
        4 => FormatBorder::Dotted,
        5 => FormatBorder::Thick,
        6 => FormatBorder::Double,
        7 => FormatBorder::Hair,
        8 => FormatBorder::MediumDashed,
        9 => FormatBorder::DashDot,
        10 => FormatBorder::MediumDashDot,
        11 => FormatBorder::DashDotDot,
        12 => FormatBorder::MediumDashDotDot,
        13 => FormatBorder::SlantDashDot,
        _ => FormatBorder::None,
    }
}

fn derive_format_align(align: &str) -> Option<FormatAlign> {
    let value = align.trim().to_ascii_lowercase();
    match value.as_str() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "fill" => Some(FormatAlign::Fill),
        "justify" => Some(FormatAlign::Justify),
        "center_across" => Some(FormatAlign::CenterAcross),
        "distributed" => Some(FormatAlign::Distributed),
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "vcenter" | "vertical_center" => Some(FormatAlign::VerticalCenter),
        "vjustify" | "vertical_justify" => Some(FormatAlign::VerticalJustify),
        "vdistributed" | "vertical_distributed" => Some(FormatAlign::VerticalDistributed),
        _ => None,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region BufferSink

/// One cell recorded by [`GridBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct GridBufferCell {
    pub value: EnumCellValue,
    pub style_id: StyleId,
    pub style: SpecCellStyle,
}

/// One merged range recorded by [`GridBuffer`] (0-based, inclusive).
#[derive(Debug, Clone, PartialEq)]
pub struct GridBufferMerge {
    pub first_row: usize,
    pub first_col: usize,
    pub last_row: usize,
    pub last_col: usize,
    pub text: String,
}

/// Everything written to one sheet of a [`GridBuffer`].
#[derive(Debug, Clone, Default)]
pub struct GridBufferSheet {
    pub name: String,
    /// Keyed by 0-based `(row, col)`.
    pub cells: BTreeMap<(usize, usize), GridBufferCell>,
    pub merges: Vec<GridBufferMerge>,
    pub column_widths: BTreeMap<usize, f64>,
    pub column_styles: BTreeMap<usize, SpecCellStyle>,
    pub freeze_panes: Option<(usize, usize)>,
    pub autofilter: Option<(usize, usize, usize, usize)>,
    pub protection: Option<ProtectionAccumulator>,
}

impl GridBufferSheet {
    /// Cell at an A1 reference, if anything was written there.
    pub fn cell(&self, reference: &str) -> Option<&GridBufferCell> {
        let (n_col, n_row) = resolve_position(reference).ok()?;
        self.cells.get(&(n_row - 1, n_col))
    }

    /// Value at an A1 reference; unwritten cells read as `None`.
    pub fn value(&self, reference: &str) -> EnumCellValue {
        self.cell(reference)
            .map_or(EnumCellValue::None, |cell| cell.value.clone())
    }

    /// One tab-separated line per row, up to the last written cell.
    pub fn to_text(&self) -> String {
        let Some(((n_row_last, _), _)) = self.cells.last_key_value() else {
            return String::new();
        };
        let n_col_last = self.cells.keys().map(|(_, col)| *col).max().unwrap_or(0);

        let mut l_lines = Vec::with_capacity(n_row_last + 1);
        for n_row in 0..=*n_row_last {
            let l_values: Vec<String> = (0..=n_col_last)
                .map(|n_col| {
                    self.cells
                        .get(&(n_row, n_col))
                        .map(|cell| cell.value.to_string())
                        .unwrap_or_default()
                })
                .collect();
            l_lines.push(l_values.join("\t").trim_end().to_string());
        }
        l_lines.join("\n")
    }
}

/// In-memory sink for tests and callers that inspect the grid.
#[derive(Debug, Clone, Default)]
pub struct GridBuffer {
    pub sheets: Vec<GridBufferSheet>,
}

impl GridBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(&self, name: &str) -> Option<&GridBufferSheet> {
        self.sheets.iter().find(|sheet| sheet.name == name)
    }

    fn active_sheet(&mut self) -> Result<&mut GridBufferSheet> {
        self.sheets
            .last_mut()
            .ok_or_else(|| GridkitError::GridSink("No active sheet; call add_sheet first.".to_string()))
    }
}

impl GridSink for GridBuffer {
    fn add_sheet(&mut self, name: &str) -> Result<()> {
        self.sheets.push(GridBufferSheet {
            name: name.to_string(),
            ..Default::default()
        });
        Ok(())
    }

    fn write_cell(
        &mut self,
        row: usize,
        col: usize,
        value: &EnumCellValue,
        style: StyleRef<'_>,
    ) -> Result<()> {
        self.active_sheet()?.cells.insert(
            (row, col),
            GridBufferCell {
                value: value.clone(),
                style_id: style.id,
                style: style.spec.clone(),
            },
        );
        Ok(())
    }

    fn merge_cells(
        &mut self,
        first_row: usize,
        first_col: usize,
        last_row: usize,
        last_col: usize,
        text: &str,
        style: StyleRef<'_>,
    ) -> Result<()> {
        let sheet = self.active_sheet()?;
        sheet.merges.push(GridBufferMerge {
            first_row,
            first_col,
            last_row,
            last_col,
            text: text.to_string(),
        });
        sheet.cells.insert(
            (first_row, first_col),
            GridBufferCell {
                value: EnumCellValue::from(text),
                style_id: style.id,
                style: style.spec.clone(),
            },
        );
        Ok(())
    }

    fn set_column_width(&mut self, col: usize, width: f64) -> Result<()> {
        self.active_sheet()?.column_widths.insert(col, width);
        Ok(())
    }

    fn set_column_style(&mut self, col: usize, style: StyleRef<'_>) -> Result<()> {
        self.active_sheet()?
            .column_styles
            .insert(col, style.spec.clone());
        Ok(())
    }

    fn set_freeze_panes(&mut self, row: usize, col: usize) -> Result<()> {
        self.active_sheet()?.freeze_panes = Some((row, col));
        Ok(())
    }

    fn set_autofilter(
        &mut self,
        first_row: usize,
        first_col: usize,
        last_row: usize,
        last_col: usize,
    ) -> Result<()> {
        self.active_sheet()?.autofilter = Some((first_row, first_col, last_row, last_col));
        Ok(())
    }

    fn protect_sheet(&mut self, protection: &ProtectionAccumulator) -> Result<()> {
        self.active_sheet()?.protection = Some(protection.clone());
        Ok(())
    }

    fn save_to_buffer(&mut self) -> Result<Vec<u8>> {
        let c_text = self
            .sheets
            .iter()
            .map(|sheet| format!("[{}]\n{}", sheet.name, sheet.to_text()))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(c_text.into_bytes())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
