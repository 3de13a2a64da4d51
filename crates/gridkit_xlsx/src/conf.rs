//! Constants and built-in style presets.

use crate::spec::{SpecAlignment, SpecBorder, SpecCellStyle, SpecFill, SpecFont};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];

/// Default upper bound for auto-fitted column widths.
pub const N_WIDTH_COLUMN_MAX_DEFAULT: f64 = 60.0;
/// Lower bound for auto-fitted column widths.
pub const N_WIDTH_COLUMN_MIN: f64 = 8.0;
/// Padding added to the widest estimated cell text.
pub const N_WIDTH_COLUMN_PADDING: f64 = 2.0;
/// Largest bounded unlocked range that is materialised as unlocked blank cells.
pub const N_CELLS_UNLOCK_FILL_MAX: usize = 100_000;

/// Number format used for date-time values when no format is configured.
pub const C_NUM_FORMAT_DATETIME_DEFAULT: &str = "yyyy-mm-dd hh:mm:ss";
/// Number format used for date values when no format is configured.
pub const C_NUM_FORMAT_DATE_DEFAULT: &str = "yyyy-mm-dd";

/// Role of a rendered cell inside a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumCellRole {
    /// Merged title row.
    Title,
    /// Column header row.
    Header,
    /// Data row.
    Data,
}

fn derive_base_style() -> SpecCellStyle {
    SpecCellStyle {
        font: SpecFont {
            name: Some("Calibri".to_string()),
            size: Some(11),
            ..Default::default()
        },
        alignment: SpecAlignment {
            vertical: Some("vcenter".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Built-in lowest-precedence style for one cell role.
///
/// The locked flag is never set here so that protection rules decide it.
pub fn derive_builtin_style(role: EnumCellRole) -> SpecCellStyle {
    let cfg_base_style = derive_base_style();
    match role {
        EnumCellRole::Title => cfg_base_style.with_(SpecCellStyle {
            font: SpecFont {
                size: Some(14),
                bold: Some(true),
                ..Default::default()
            },
            alignment: SpecAlignment {
                horizontal: Some("center".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }),
        EnumCellRole::Header => cfg_base_style.with_(SpecCellStyle {
            font: SpecFont {
                bold: Some(true),
                ..Default::default()
            },
            fill: SpecFill {
                color: Some("#D9D9D9".to_string()),
            },
            border: SpecBorder {
                style: Some(1),
                ..Default::default()
            },
            alignment: SpecAlignment {
                horizontal: Some("center".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }),
        EnumCellRole::Data => cfg_base_style.with_(SpecCellStyle {
            border: SpecBorder {
                style: Some(1),
                ..Default::default()
            },
            ..Default::default()
        }),
    }
}
