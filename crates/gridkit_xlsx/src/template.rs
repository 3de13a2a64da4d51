//! Declarative YAML templates.
//!
//! A template describes sheets, sections, columns and protection without any
//! data. [`SpecTemplate::into_workbook`] validates it and produces a
//! [`SpecWorkbook`] whose sections are then bound by id through
//! [`SpecWorkbook::with_data`].
//!
//! ```yaml
//! sheets:
//!   - name: Orders
//!     layout: { freeze_rows: 1, auto_filter: true }
//!     protection: { lock_sheet: true, unlocked_columns: [C] }
//!     sections:
//!       - id: orders
//!         title: Open orders
//!         show_header: true
//!         columns:
//!           - field_name: qty
//!             format: "0"
//!             conditions:
//!               - { when: "> 100", style: { fill: { color: "#C6EFCE" } } }
//! ```

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::{GridkitError, Result};
use crate::position::resolve_column;
use crate::protection::{
    AllowOperations, Columns, CombineRules, LockAllExcept, LockColumns, LockRows, Password,
    ProtectionRule, UnlockRange,
};
use crate::spec::{
    EnumDirection, SpecAllowedOperations, SpecCellStyle, SpecColumn, SpecConditionalRule,
    SpecSection, SpecSheet, SpecSheetLayout, SpecWorkbook,
};

////////////////////////////////////////////////////////////////////////////////
// #region TemplateModels

/// Root of a YAML template.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecTemplate {
    /// Document-level default style.
    #[serde(default)]
    pub default_style: Option<SpecCellStyle>,
    pub sheets: Vec<SpecTemplateSheet>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecTemplateSheet {
    pub name: String,
    #[serde(default)]
    pub default_style: Option<SpecCellStyle>,
    #[serde(default)]
    pub layout: SpecSheetLayout,
    #[serde(default)]
    pub protection: Option<SpecTemplateProtection>,
    #[serde(default)]
    pub sections: Vec<SpecTemplateSection>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecTemplateSection {
    pub id: Option<String>,
    pub title: Option<String>,
    pub show_header: bool,
    pub locked: bool,
    pub gap_after: usize,
    pub direction: EnumDirection,
    /// A1 anchor; excludes `start_row`/`start_column`.
    pub position: Option<String>,
    /// 1-based anchor row.
    pub start_row: Option<usize>,
    /// Anchor column letters (`"C"`).
    pub start_column: Option<String>,
    pub title_style: Option<SpecCellStyle>,
    pub header_style: Option<SpecCellStyle>,
    pub data_style: Option<SpecCellStyle>,
    pub columns: Vec<SpecTemplateColumn>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecTemplateColumn {
    pub field_name: String,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub hidden: Option<bool>,
    #[serde(default)]
    pub style: Option<SpecCellStyle>,
    #[serde(default)]
    pub conditions: Vec<SpecTemplateCondition>,
}

/// `{ when: "> 100", style: {...} }`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecTemplateCondition {
    pub when: String,
    pub style: SpecCellStyle,
}

/// Flat protection block; `allow_*` keys override [`SpecAllowedOperations`] defaults.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecTemplateProtection {
    pub password: Option<String>,
    /// Protect the sheet; only `unlocked_*` stay editable.
    pub lock_sheet: bool,
    pub locked_columns: Vec<String>,
    pub unlocked_columns: Vec<String>,
    /// 1-based rows.
    pub locked_rows: Vec<usize>,
    pub unlocked_ranges: Vec<String>,
    pub allow_select_locked_cells: Option<bool>,
    pub allow_select_unlocked_cells: Option<bool>,
    pub allow_format_cells: Option<bool>,
    pub allow_format_columns: Option<bool>,
    pub allow_format_rows: Option<bool>,
    pub allow_insert_columns: Option<bool>,
    pub allow_insert_rows: Option<bool>,
    pub allow_insert_links: Option<bool>,
    pub allow_delete_columns: Option<bool>,
    pub allow_delete_rows: Option<bool>,
    pub allow_sort: Option<bool>,
    pub allow_auto_filter: Option<bool>,
    pub allow_pivot_tables: Option<bool>,
    pub allow_edit_objects: Option<bool>,
    pub allow_edit_scenarios: Option<bool>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Loading

impl SpecTemplate {
    /// Parse a template from a YAML string slice.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a template by reading YAML from any reader.
    pub fn from_yaml_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        Ok(serde_yaml::from_reader(reader)?)
    }

    /// Parse a template file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_yaml_reader(std::io::BufReader::new(file))
    }

    /// Check structural rules a YAML schema cannot express.
    ///
    /// Every issue is reported at once, one `path: message` per line.
    pub fn validate(&self) -> Result<()> {
        let mut l_issues: Vec<String> = Vec::new();
        let mut set_section_ids: BTreeSet<&str> = BTreeSet::new();

        if self.sheets.is_empty() {
            l_issues.push("sheets: at least one sheet is required".to_string());
        }

        for (n_idx_sheet, sheet) in self.sheets.iter().enumerate() {
            let c_path_sheet = format!("sheets[{n_idx_sheet}]");
            if sheet.name.trim().is_empty() {
                l_issues.push(format!("{c_path_sheet}.name: must not be empty"));
            }

            for (n_idx_section, section) in sheet.sections.iter().enumerate() {
                let c_path = format!("{c_path_sheet}.sections[{n_idx_section}]");
                if let Some(c_id) = &section.id {
                    if !set_section_ids.insert(c_id.as_str()) {
                        l_issues.push(format!("{c_path}.id: duplicate section id {c_id:?}"));
                    }
                }
                if section.position.is_some()
                    && (section.start_row.is_some() || section.start_column.is_some())
                {
                    l_issues.push(format!(
                        "{c_path}: position conflicts with start_row/start_column"
                    ));
                }
                if section.direction == EnumDirection::Vertical
                    && section.position.is_none()
                    && section.start_row.is_some()
                    && section.start_column.is_none()
                {
                    l_issues.push(format!(
                        "{c_path}: start_row requires start_column for vertical sections"
                    ));
                }

                let mut set_fields: BTreeSet<&str> = BTreeSet::new();
                for (n_idx_col, col) in section.columns.iter().enumerate() {
                    if col.field_name.trim().is_empty() {
                        l_issues.push(format!(
                            "{c_path}.columns[{n_idx_col}].field_name: must not be empty"
                        ));
                    } else if !set_fields.insert(col.field_name.as_str()) {
                        l_issues.push(format!(
                            "{c_path}.columns[{n_idx_col}].field_name: duplicate column {:?}",
                            col.field_name
                        ));
                    }
                }
            }
        }

        if l_issues.is_empty() {
            Ok(())
        } else {
            Err(GridkitError::SchemaValidation(l_issues.join("\n")))
        }
    }

    /// Validate and convert into an unbound [`SpecWorkbook`].
    pub fn into_workbook(self) -> Result<SpecWorkbook> {
        self.validate()?;
        let mut workbook = SpecWorkbook {
            sheets: Vec::with_capacity(self.sheets.len()),
            default_style: self.default_style,
        };
        for sheet in self.sheets {
            workbook.sheets.push(sheet.into_sheet()?);
        }
        Ok(workbook)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Conversion

impl SpecTemplateSheet {
    fn into_sheet(self) -> Result<SpecSheet> {
        let protection = match self.protection {
            Some(protection) => protection.into_rules(),
            None => Vec::new(),
        };
        let sections = self
            .sections
            .into_iter()
            .enumerate()
            .map(|(n_idx, section)| section.into_section(n_idx))
            .collect::<Result<Vec<_>>>()?;
        Ok(SpecSheet {
            name: self.name,
            sections,
            layout: self.layout,
            protection,
            default_style: self.default_style,
        })
    }
}

impl SpecTemplateSection {
    fn into_section(self, n_idx_section: usize) -> Result<SpecSection> {
        let start_column = match &self.start_column {
            Some(c_letters) => Some(resolve_column(c_letters).map_err(|err| {
                err.in_section(
                    &self
                        .id
                        .clone()
                        .or_else(|| self.title.clone())
                        .unwrap_or_else(|| format!("#{n_idx_section}")),
                )
            })?),
            None => None,
        };

        Ok(SpecSection {
            id: self.id,
            title: self.title,
            data: None,
            show_header: self.show_header,
            locked: self.locked,
            gap_after: self.gap_after,
            direction: self.direction,
            position: self.position,
            start_column,
            start_row: self.start_row,
            title_style: self.title_style,
            header_style: self.header_style,
            data_style: self.data_style,
            columns: self.columns.into_iter().map(SpecColumn::from).collect(),
        })
    }
}

impl From<SpecTemplateColumn> for SpecColumn {
    fn from(col: SpecTemplateColumn) -> Self {
        Self {
            field_name: col.field_name,
            header: col.header,
            width: col.width,
            format: col.format,
            hidden: col.hidden,
            conditions: col
                .conditions
                .into_iter()
                .map(|cond| SpecConditionalRule::new(cond.when, cond.style))
                .collect(),
            style: col.style,
        }
    }
}

impl SpecTemplateProtection {
    fn derive_allowed_operations(&self) -> Option<SpecAllowedOperations> {
        let l_flags = [
            self.allow_select_locked_cells,
            self.allow_select_unlocked_cells,
            self.allow_format_cells,
            self.allow_format_columns,
            self.allow_format_rows,
            self.allow_insert_columns,
            self.allow_insert_rows,
            self.allow_insert_links,
            self.allow_delete_columns,
            self.allow_delete_rows,
            self.allow_sort,
            self.allow_auto_filter,
            self.allow_pivot_tables,
            self.allow_edit_objects,
            self.allow_edit_scenarios,
        ];
        if l_flags.iter().all(Option::is_none) {
            return None;
        }

        let base = SpecAllowedOperations::default();
        Some(SpecAllowedOperations {
            select_locked_cells: self
                .allow_select_locked_cells
                .unwrap_or(base.select_locked_cells),
            select_unlocked_cells: self
                .allow_select_unlocked_cells
                .unwrap_or(base.select_unlocked_cells),
            format_cells: self.allow_format_cells.unwrap_or(base.format_cells),
            format_columns: self.allow_format_columns.unwrap_or(base.format_columns),
            format_rows: self.allow_format_rows.unwrap_or(base.format_rows),
            insert_columns: self.allow_insert_columns.unwrap_or(base.insert_columns),
            insert_rows: self.allow_insert_rows.unwrap_or(base.insert_rows),
            insert_links: self.allow_insert_links.unwrap_or(base.insert_links),
            delete_columns: self.allow_delete_columns.unwrap_or(base.delete_columns),
            delete_rows: self.allow_delete_rows.unwrap_or(base.delete_rows),
            sort: self.allow_sort.unwrap_or(base.sort),
            auto_filter: self.allow_auto_filter.unwrap_or(base.auto_filter),
            pivot_tables: self.allow_pivot_tables.unwrap_or(base.pivot_tables),
            edit_objects: self.allow_edit_objects.unwrap_or(base.edit_objects),
            edit_scenarios: self.allow_edit_scenarios.unwrap_or(base.edit_scenarios),
        })
    }

    /// Expand into an ordered rule list.
    pub fn into_rules(self) -> Vec<Box<dyn ProtectionRule>> {
        let mut l_rules: Vec<Box<dyn ProtectionRule>> = Vec::new();
        if let Some(allowed) = self.derive_allowed_operations() {
            l_rules.push(Box::new(AllowOperations(allowed)));
        }
        if let Some(c_password) = self.password {
            l_rules.push(Box::new(Password(c_password)));
        }

        let mut l_unlocks: Vec<Box<dyn ProtectionRule>> = Vec::new();
        if !self.unlocked_columns.is_empty() {
            l_unlocks.push(Box::new(Columns(self.unlocked_columns)));
        }
        if !self.unlocked_ranges.is_empty() {
            l_unlocks.push(Box::new(UnlockRange(self.unlocked_ranges)));
        }
        if self.lock_sheet {
            l_rules.push(Box::new(LockAllExcept::new(l_unlocks)));
        } else if !l_unlocks.is_empty() {
            l_rules.push(Box::new(CombineRules(l_unlocks)));
        }

        if !self.locked_columns.is_empty() {
            l_rules.push(Box::new(LockColumns(self.locked_columns)));
        }
        if !self.locked_rows.is_empty() {
            l_rules.push(Box::new(LockRows(self.locked_rows)));
        }
        l_rules
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
