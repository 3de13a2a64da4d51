//! Style cascade and per-export style registry.
//!
//! Precedence, lowest first: built-in default, document default, sheet
//! default, section style, column override, matched conditional rule. A
//! locked section clamps the final locked flag after the cascade.

use std::collections::HashMap;

use crate::conf::{EnumCellRole, derive_builtin_style};
use crate::spec::SpecCellStyle;

/// Merge `override_` onto `base`, treating `None` as fully unset.
///
/// Returns `None` only when both sides are `None` or fully unset.
pub fn merge_styles(
    base: Option<&SpecCellStyle>,
    override_: Option<&SpecCellStyle>,
) -> Option<SpecCellStyle> {
    let merged = match (base, override_) {
        (None, None) => return None,
        (Some(val), None) | (None, Some(val)) => val.clone(),
        (Some(base), Some(patch)) => base.merge(patch),
    };
    if merged.is_unset() { None } else { Some(merged) }
}

/// Fold `layers` (lowest precedence first) into one style.
pub fn cascade_styles<'a>(
    layers: impl IntoIterator<Item = Option<&'a SpecCellStyle>>,
) -> SpecCellStyle {
    layers
        .into_iter()
        .fold(None, |acc, layer| merge_styles(acc.as_ref(), layer))
        .unwrap_or_default()
}

/// Document/sheet defaults shared by every section of one sheet.
#[derive(Debug, Clone, Default)]
pub struct StyleDefaults {
    pub document: Option<SpecCellStyle>,
    pub sheet: Option<SpecCellStyle>,
}

impl StyleDefaults {
    /// Resolve the cascade for one cell role up to the section level.
    pub fn resolve_section_style(
        &self,
        role: EnumCellRole,
        section_style: Option<&SpecCellStyle>,
    ) -> SpecCellStyle {
        let builtin = derive_builtin_style(role);
        cascade_styles([
            Some(&builtin),
            self.document.as_ref(),
            self.sheet.as_ref(),
            section_style,
        ])
    }
}

/// Integer handle into a [`StyleRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StyleId(pub usize);

/// Borrowed view of one registered style, as handed to grid sinks.
#[derive(Debug, Clone, Copy)]
pub struct StyleRef<'a> {
    pub id: StyleId,
    pub spec: &'a SpecCellStyle,
}

/// Arena of resolved styles for one export session.
///
/// Structurally equal styles share a handle, so sinks can cache one encoder
/// format per [`StyleId`].
#[derive(Debug, Default)]
pub struct StyleRegistry {
    l_styles: Vec<SpecCellStyle>,
    dict_ids: HashMap<SpecCellStyle, StyleId>,
}

impl StyleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle for `style`, registering it on first sight.
    pub fn intern(&mut self, style: SpecCellStyle) -> StyleId {
        if let Some(id) = self.dict_ids.get(&style) {
            return *id;
        }
        let id = StyleId(self.l_styles.len());
        self.dict_ids.insert(style.clone(), id);
        self.l_styles.push(style);
        id
    }

    /// Intern `style` and borrow it back as a [`StyleRef`].
    pub fn intern_ref(&mut self, style: SpecCellStyle) -> StyleRef<'_> {
        let id = self.intern(style);
        StyleRef {
            id,
            spec: &self.l_styles[id.0],
        }
    }

    pub fn get(&self, id: StyleId) -> Option<&SpecCellStyle> {
        self.l_styles.get(id.0)
    }

    /// Borrow a registered style as a [`StyleRef`].
    pub fn style_ref(&self, id: StyleId) -> Option<StyleRef<'_>> {
        self.get(id).map(|spec| StyleRef { id, spec })
    }

    pub fn len(&self) -> usize {
        self.l_styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.l_styles.is_empty()
    }
}
