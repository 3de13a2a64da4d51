//! Shared specification models: styles, sections, sheets, layout and reports.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::conf::N_NROWS_EXCEL_MAX;
use crate::protection::ProtectionRule;
use crate::record::RecordSet;

////////////////////////////////////////////////////////////////////////////////
// #region CellStyleSpecification

/// Partial font specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecFont {
    /// Font family name.
    pub name: Option<String>,
    /// Font size in points.
    pub size: Option<i64>,
    /// Bold style.
    pub bold: Option<bool>,
    /// Italic style.
    pub italic: Option<bool>,
    /// Font color (`#RRGGBB`).
    pub color: Option<String>,
}

/// Partial fill specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecFill {
    /// Solid background color (`#RRGGBB`).
    pub color: Option<String>,
}

/// Partial border specification (all four sides).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecBorder {
    /// Border style code, `0` (none) to `13` (slant dash-dot).
    pub style: Option<i64>,
    /// Border color (`#RRGGBB`).
    pub color: Option<String>,
}

/// Partial alignment specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecAlignment {
    /// Horizontal alignment keyword (`left`, `center`, ...).
    pub horizontal: Option<String>,
    /// Vertical alignment keyword (`top`, `vcenter`, ...).
    pub vertical: Option<String>,
}

/// Partial cell style; every leaf is independently set or unset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecCellStyle {
    pub font: SpecFont,
    pub fill: SpecFill,
    pub border: SpecBorder,
    pub alignment: SpecAlignment,
    /// Number format code.
    pub num_format: Option<String>,
    /// Text wrap.
    pub text_wrap: Option<bool>,
    /// Cell lock flag; unset resolves to locked.
    pub locked: Option<bool>,
}

impl SpecCellStyle {
    /// Return a new style by overlaying `patch` onto `self`.
    pub fn with_(&self, patch: SpecCellStyle) -> SpecCellStyle {
        self.merge(&patch)
    }

    /// Merge two styles with right-side set-field overwrite semantics, field by field.
    pub fn merge(&self, other: &SpecCellStyle) -> SpecCellStyle {
        SpecCellStyle {
            font: SpecFont {
                name: other.font.name.clone().or_else(|| self.font.name.clone()),
                size: other.font.size.or(self.font.size),
                bold: other.font.bold.or(self.font.bold),
                italic: other.font.italic.or(self.font.italic),
                color: other.font.color.clone().or_else(|| self.font.color.clone()),
            },
            fill: SpecFill {
                color: other.fill.color.clone().or_else(|| self.fill.color.clone()),
            },
            border: SpecBorder {
                style: other.border.style.or(self.border.style),
                color: other
                    .border
                    .color
                    .clone()
                    .or_else(|| self.border.color.clone()),
            },
            alignment: SpecAlignment {
                horizontal: other
                    .alignment
                    .horizontal
                    .clone()
                    .or_else(|| self.alignment.horizontal.clone()),
                vertical: other
                    .alignment
                    .vertical
                    .clone()
                    .or_else(|| self.alignment.vertical.clone()),
            },
            num_format: other.num_format.clone().or_else(|| self.num_format.clone()),
            text_wrap: other.text_wrap.or(self.text_wrap),
            locked: other.locked.or(self.locked),
        }
    }

    /// True when no field is set.
    pub fn is_unset(&self) -> bool {
        *self == SpecCellStyle::default()
    }

    pub fn with_bold(mut self, bold: bool) -> Self {
        self.font.bold = Some(bold);
        self
    }

    pub fn with_font_color(mut self, color: impl Into<String>) -> Self {
        self.font.color = Some(color.into());
        self
    }

    pub fn with_fill_color(mut self, color: impl Into<String>) -> Self {
        self.fill.color = Some(color.into());
        self
    }

    pub fn with_num_format(mut self, num_format: impl Into<String>) -> Self {
        self.num_format = Some(num_format.into());
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellValue

/// Normalized cell value flowing from record sets into the grid sink.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellValue {
    /// Missing/blank value.
    None,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Bool(bool),
    /// Date-time value; written unconverted, displayed through a number format.
    DateTime(NaiveDateTime),
    /// Date value; written unconverted, displayed through a number format.
    Date(NaiveDate),
    /// Formula text passed through verbatim.
    Formula(String),
}

impl EnumCellValue {
    /// True for values that rely on a date number format to display.
    pub fn is_time_like(&self) -> bool {
        matches!(self, Self::DateTime(_) | Self::Date(_))
    }
}

impl fmt::Display for EnumCellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::String(val) => write!(f, "{val}"),
            Self::Number(val) => {
                if val.is_finite() && val.fract() == 0.0 && val.abs() < 1e15 {
                    write!(f, "{}", *val as i64)
                } else {
                    write!(f, "{val}")
                }
            }
            Self::Bool(val) => write!(f, "{val}"),
            Self::DateTime(val) => write!(f, "{}", val.format("%Y-%m-%d %H:%M:%S")),
            Self::Date(val) => write!(f, "{}", val.format("%Y-%m-%d")),
            Self::Formula(val) => write!(f, "{val}"),
        }
    }
}

impl From<&str> for EnumCellValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for EnumCellValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for EnumCellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for EnumCellValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for EnumCellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<NaiveDateTime> for EnumCellValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl From<NaiveDate> for EnumCellValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl<T: Into<EnumCellValue>> From<Option<T>> for EnumCellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellRange

/// Inclusive rectangular range; rows are 1-based, columns 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpecCellRange {
    pub first_row: usize,
    pub first_col: usize,
    pub last_row: usize,
    pub last_col: usize,
}

impl SpecCellRange {
    /// Full-height range spanning columns `first_col..=last_col`.
    pub fn full_columns(first_col: usize, last_col: usize) -> Self {
        Self {
            first_row: 1,
            first_col,
            last_row: N_NROWS_EXCEL_MAX,
            last_col,
        }
    }

    /// Full-width range spanning rows `first_row..=last_row`.
    pub fn full_rows(first_row: usize, last_row: usize) -> Self {
        Self {
            first_row,
            first_col: 0,
            last_row,
            last_col: crate::conf::N_NCOLS_EXCEL_MAX - 1,
        }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        (self.first_row..=self.last_row).contains(&row)
            && (self.first_col..=self.last_col).contains(&col)
    }

    /// True when the range covers every row of its columns.
    pub fn is_full_height(&self) -> bool {
        self.first_row <= 1 && self.last_row >= N_NROWS_EXCEL_MAX
    }

    /// Number of cells covered.
    pub fn area(&self) -> usize {
        (self.last_row + 1 - self.first_row) * (self.last_col + 1 - self.first_col)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SectionSpecification

/// Stacking direction of a section relative to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumDirection {
    /// Stack below the previous section (default).
    #[default]
    Vertical,
    /// Stack to the right of the previous section.
    Horizontal,
}

/// Value-dependent style override; first matching rule of a column wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecConditionalRule {
    /// Condition expression, e.g. `">= 100"` or `contains "error"`.
    pub expression: String,
    /// Style applied when the expression matches.
    pub style: SpecCellStyle,
}

impl SpecConditionalRule {
    pub fn new(expression: impl Into<String>, style: SpecCellStyle) -> Self {
        Self {
            expression: expression.into(),
            style,
        }
    }
}

/// Per-column override matched by source field name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecColumn {
    /// Source field identifier.
    pub field_name: String,
    /// Display header.
    pub header: Option<String>,
    /// Column width in character units.
    pub width: Option<f64>,
    /// Number format code for data cells.
    pub format: Option<String>,
    /// Hide (or un-hide) the column.
    pub hidden: Option<bool>,
    /// Ordered conditional rules.
    pub conditions: Vec<SpecConditionalRule>,
    /// Style override for data cells of this column.
    pub style: Option<SpecCellStyle>,
}

impl SpecColumn {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = Some(hidden);
        self
    }

    pub fn with_condition(mut self, expression: impl Into<String>, style: SpecCellStyle) -> Self {
        self.conditions
            .push(SpecConditionalRule::new(expression, style));
        self
    }

    pub fn with_style(mut self, style: SpecCellStyle) -> Self {
        self.style = Some(style);
        self
    }
}

/// Column after record schema extraction, tag parsing and override application.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecResolvedColumn {
    pub field_id: String,
    pub header: String,
    pub width: Option<f64>,
    pub format: Option<String>,
    pub conditions: Vec<SpecConditionalRule>,
    pub style: Option<SpecCellStyle>,
}

/// One rendered block of tabular data.
///
/// Builder methods consume and return `Self`; a section is consumed once by
/// the layout engine.
#[derive(Debug, Default)]
pub struct SpecSection {
    /// Identifier for late data binding.
    pub id: Option<String>,
    /// Optional title row, merged across visible columns.
    pub title: Option<String>,
    /// Data collection; `None` until bound.
    pub data: Option<Box<dyn RecordSet>>,
    /// Show the header row even when a title is present.
    pub show_header: bool,
    /// Force every cell of this section to locked.
    pub locked: bool,
    /// Blank rows/columns inserted after this section along its stacking axis.
    pub gap_after: usize,
    pub direction: EnumDirection,
    /// Explicit anchor as an A1 reference; wins over everything else.
    pub position: Option<String>,
    /// Explicit 0-based anchor column.
    pub start_column: Option<usize>,
    /// Explicit 1-based anchor row.
    pub start_row: Option<usize>,
    pub title_style: Option<SpecCellStyle>,
    pub header_style: Option<SpecCellStyle>,
    pub data_style: Option<SpecCellStyle>,
    /// Ordered per-column overrides.
    pub columns: Vec<SpecColumn>,
}

impl SpecSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_data(mut self, data: impl RecordSet + 'static) -> Self {
        self.data = Some(Box::new(data));
        self
    }

    pub fn with_show_header(mut self, show_header: bool) -> Self {
        self.show_header = show_header;
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }

    pub fn with_gap_after(mut self, gap_after: usize) -> Self {
        self.gap_after = gap_after;
        self
    }

    pub fn with_direction(mut self, direction: EnumDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = Some(position.into());
        self
    }

    pub fn with_start(mut self, start_column: Option<usize>, start_row: Option<usize>) -> Self {
        self.start_column = start_column;
        self.start_row = start_row;
        self
    }

    pub fn with_title_style(mut self, style: SpecCellStyle) -> Self {
        self.title_style = Some(style);
        self
    }

    pub fn with_header_style(mut self, style: SpecCellStyle) -> Self {
        self.header_style = Some(style);
        self
    }

    pub fn with_data_style(mut self, style: SpecCellStyle) -> Self {
        self.data_style = Some(style);
        self
    }

    pub fn with_column(mut self, column: SpecColumn) -> Self {
        self.columns.push(column);
        self
    }

    /// Label used in logs, reports and error messages.
    pub fn label(&self, n_idx_section: usize) -> String {
        self.id
            .clone()
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| format!("#{n_idx_section}"))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetSpecification

/// Sheet-wide layout options applied after all sections are rendered.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecSheetLayout {
    /// Number of frozen rows from the top.
    pub freeze_rows: usize,
    /// Number of frozen columns from the left.
    pub freeze_cols: usize,
    /// Add an autofilter over the used column range.
    pub auto_filter: bool,
    /// Infer widths for columns without a configured width.
    pub auto_fit_columns: bool,
    /// Upper bound for inferred widths.
    pub max_column_width: f64,
}

impl Default for SpecSheetLayout {
    fn default() -> Self {
        Self {
            freeze_rows: 0,
            freeze_cols: 0,
            auto_filter: false,
            auto_fit_columns: false,
            max_column_width: crate::conf::N_WIDTH_COLUMN_MAX_DEFAULT,
        }
    }
}

/// End-user operations still permitted on a protected sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecAllowedOperations {
    pub select_locked_cells: bool,
    pub select_unlocked_cells: bool,
    pub format_cells: bool,
    pub format_columns: bool,
    pub format_rows: bool,
    pub insert_columns: bool,
    pub insert_rows: bool,
    pub insert_links: bool,
    pub delete_columns: bool,
    pub delete_rows: bool,
    pub sort: bool,
    pub auto_filter: bool,
    pub pivot_tables: bool,
    pub edit_objects: bool,
    pub edit_scenarios: bool,
}

impl Default for SpecAllowedOperations {
    fn default() -> Self {
        Self {
            select_locked_cells: true,
            select_unlocked_cells: true,
            format_cells: false,
            format_columns: false,
            format_rows: false,
            insert_columns: false,
            insert_rows: false,
            insert_links: false,
            delete_columns: false,
            delete_rows: false,
            sort: false,
            auto_filter: false,
            pivot_tables: false,
            edit_objects: false,
            edit_scenarios: false,
        }
    }
}

/// One sheet: ordered sections plus sheet-wide layout and protection rules.
#[derive(Debug, Default)]
pub struct SpecSheet {
    pub name: String,
    pub sections: Vec<SpecSection>,
    pub layout: SpecSheetLayout,
    /// Rules applied in order to a fresh protection accumulator.
    pub protection: Vec<Box<dyn ProtectionRule>>,
    /// Sheet-level default style, between document default and section styles.
    pub default_style: Option<SpecCellStyle>,
}

impl SpecSheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_section(mut self, section: SpecSection) -> Self {
        self.sections.push(section);
        self
    }

    pub fn with_layout(mut self, layout: SpecSheetLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_protection(mut self, rule: impl ProtectionRule + 'static) -> Self {
        self.protection.push(Box::new(rule));
        self
    }

    pub fn with_default_style(mut self, style: SpecCellStyle) -> Self {
        self.default_style = Some(style);
        self
    }
}

/// Ordered sheets plus the document-level default style.
#[derive(Debug, Default)]
pub struct SpecWorkbook {
    pub sheets: Vec<SpecSheet>,
    pub default_style: Option<SpecCellStyle>,
}

impl SpecWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, sheet: SpecSheet) -> Self {
        self.sheets.push(sheet);
        self
    }

    pub fn with_default_style(mut self, style: SpecCellStyle) -> Self {
        self.default_style = Some(style);
        self
    }

    /// Bind `data` to every section whose id equals `id`.
    ///
    /// Fails with a schema error when no section carries that id.
    pub fn with_data(
        mut self,
        id: &str,
        data: impl RecordSet + Clone + 'static,
    ) -> crate::error::Result<Self> {
        let mut if_bound = false;
        for section in self
            .sheets
            .iter_mut()
            .flat_map(|sheet| sheet.sections.iter_mut())
            .filter(|section| section.id.as_deref() == Some(id))
        {
            section.data = Some(Box::new(data.clone()));
            if_bound = true;
        }
        if !if_bound {
            return Err(crate::error::GridkitError::SchemaValidation(format!(
                "No section with id {id:?} to bind data to."
            )));
        }
        Ok(self)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// Where one section landed on its sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSectionPlacement {
    pub label: String,
    /// 0-based anchor column.
    pub start_col: usize,
    /// 1-based anchor row.
    pub start_row: usize,
    /// Exclusive end column, including `gap_after` for horizontal sections.
    pub end_col: usize,
    /// Next free row, including `gap_after` for vertical sections.
    pub end_row: usize,
    /// Title + header + data rows written.
    pub rows_written: usize,
}

/// Per-sheet outcome.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecSheetReport {
    /// Actual unique sheet name in workbook.
    pub sheet_name: String,
    pub sections: Vec<SpecSectionPlacement>,
    /// Labels of sections skipped because they had nothing to render.
    pub sections_skipped: Vec<String>,
    pub if_protected: bool,
}

/// Per-export report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecExportReport {
    pub sheets: Vec<SpecSheetReport>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecExportReport {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        tracing::warn!("{}", msg.as_ref());
        self.warnings.push(msg.as_ref().to_string());
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_is_field_wise_not_whole_object() {
        let base = SpecCellStyle::default()
            .with_bold(true)
            .with_font_color("#FF0000");
        let patch = SpecCellStyle {
            font: SpecFont {
                color: Some("#00FF00".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let merged = base.merge(&patch);
        assert_eq!(merged.font.bold, Some(true));
        assert_eq!(merged.font.color.as_deref(), Some("#00FF00"));
    }

    #[test]
    fn test_merge_bold_follows_override_when_set() {
        let base = SpecCellStyle::default().with_bold(true);
        assert_eq!(
            base.merge(&SpecCellStyle::default().with_bold(false)).font.bold,
            Some(false)
        );
        assert_eq!(base.merge(&SpecCellStyle::default()).font.bold, Some(true));
    }

    #[test]
    fn test_cell_value_display() {
        assert_eq!(EnumCellValue::Number(3.0).to_string(), "3");
        assert_eq!(EnumCellValue::Number(2.5).to_string(), "2.5");
        assert_eq!(EnumCellValue::None.to_string(), "");
        assert_eq!(EnumCellValue::from(Some("x")).to_string(), "x");
        assert_eq!(EnumCellValue::from(None::<i64>), EnumCellValue::None);
    }

    #[test]
    fn test_cell_range_contains_and_full_height() {
        let range = SpecCellRange::full_columns(4, 5);
        assert!(range.is_full_height());
        assert!(range.contains(1, 4));
        assert!(range.contains(N_NROWS_EXCEL_MAX, 5));
        assert!(!range.contains(3, 6));
    }

    #[test]
    fn test_section_label_prefers_id_then_title() {
        assert_eq!(SpecSection::new().with_id("a").with_title("T").label(0), "a");
        assert_eq!(SpecSection::new().with_title("T").label(0), "T");
        assert_eq!(SpecSection::new().label(3), "#3");
    }
}
