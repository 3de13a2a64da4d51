//! `gridkit_xlsx`:
//! Section layout & styling engine for spreadsheet exports.
//!
//! Module map:
//! - `conf`       : constants and built-in style presets
//! - `spec`       : styles, sections, sheets, workbook, reports
//! - `error`      : error taxonomy
//! - `position`   : A1 reference parsing
//! - `style`      : style cascade and per-export registry
//! - `condition`  : conditional-formatting expressions
//! - `protection` : composable lock rules
//! - `record`     : record schema extraction and data adapters
//! - `sink`       : grid sinks (xlsx, in-memory)
//! - `util`       : pure helper functions
//! - `writer`     : layout engine and export entry points
//! - `template`   : declarative YAML templates
pub mod condition;
pub mod conf;
pub mod error;
pub mod position;
pub mod protection;
pub mod record;
pub mod sink;
pub mod spec;
pub mod style;
pub mod template;
pub mod util;
pub mod writer;

pub use conf::{
    C_NUM_FORMAT_DATE_DEFAULT, C_NUM_FORMAT_DATETIME_DEFAULT, EnumCellRole,
    N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, TUP_EXCEL_ILLEGAL,
};
pub use error::{GridkitError, Result};
pub use position::{name_for_cell, name_for_column, resolve_position, resolve_range};
pub use protection::{
    AllowOperations, Columns, CombineRules, LockAllExcept, LockCellsWhere, LockColumns,
    LockRanges, LockRows, LockRowsAbove, LockRowsBelow, LockRowsWhere, Password,
    ProtectionAccumulator, ProtectionRule, UnlockRange,
};
pub use record::{JsonRecords, RecordSchema, RecordSet, RowTable, SpecRecordField};
pub use sink::{GridBuffer, GridSink, XlsxGridSink};
pub use spec::{
    EnumCellValue, EnumDirection, SpecAllowedOperations, SpecCellRange, SpecCellStyle,
    SpecColumn, SpecConditionalRule, SpecExportReport, SpecSection, SpecSectionPlacement,
    SpecSheet, SpecSheetLayout, SpecSheetReport, SpecWorkbook,
};
pub use style::{StyleId, StyleRegistry};
pub use template::SpecTemplate;
pub use writer::{
    XlsxWriter, render_workbook, write_xlsx_to_buffer, write_xlsx_to_path, write_xlsx_to_writer,
};
