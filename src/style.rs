//! Row style templates and per-sheet style resolution
//!
//! Styles are plain values. A [`ResolvedCellStyle`] is what a single cell is
//! written with; the container adapter interns equal values into one native
//! cell format.

use crate::types::{Align, BorderLine, Color, VerticalAlign, GENERAL_FORMAT, TEXT_FORMAT};
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Font settings; size is in whole points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FontSpec {
    pub size: u16,
    pub color: Color,
    pub bold: bool,
}

impl Default for FontSpec {
    fn default() -> Self {
        FontSpec {
            size: 11,
            color: Color::Black,
            bold: false,
        }
    }
}

/// Border drawn on all four sides of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BorderSpec {
    pub line: BorderLine,
    pub color: Color,
}

/// Visual definition applied to a whole row
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RowStyleTemplate {
    /// Zero-based row index; for the body template, the first body row
    pub row_index: u32,
    /// Row height in points
    pub height: f64,
    pub background: Option<Color>,
    pub border: Option<BorderSpec>,
    pub font: FontSpec,
    pub align: Align,
    pub valign: VerticalAlign,
    pub wrap_text: bool,
    /// Format used when a cell carries no format of its own
    pub default_format: Option<String>,
}

/// Default zero-based row index of the title row
pub const DEFAULT_TITLE_ROW: u32 = 0;
/// Default zero-based row index of the first body row
pub const DEFAULT_BODY_START_ROW: u32 = 1;

impl RowStyleTemplate {
    /// Title row: centered, yellow fill, bold 12pt blue-grey font, text format
    pub fn default_title() -> Self {
        RowStyleTemplate {
            row_index: DEFAULT_TITLE_ROW,
            height: 28.0,
            background: Some(Color::Yellow),
            border: Some(BorderSpec {
                line: BorderLine::Thin,
                color: Color::Grey25Percent,
            }),
            font: FontSpec {
                size: 12,
                color: Color::BlueGrey,
                bold: true,
            },
            align: Align::Center,
            valign: VerticalAlign::Center,
            wrap_text: false,
            default_format: Some(TEXT_FORMAT.to_string()),
        }
    }

    /// Body rows: light turquoise fill, 11pt grey font, wrapped text
    pub fn default_body() -> Self {
        RowStyleTemplate {
            row_index: DEFAULT_BODY_START_ROW,
            height: 24.0,
            background: Some(Color::LightTurquoise),
            border: Some(BorderSpec {
                line: BorderLine::Thin,
                color: Color::Grey25Percent,
            }),
            font: FontSpec {
                size: 11,
                color: Color::Grey50Percent,
                bold: false,
            },
            align: Align::Left,
            valign: VerticalAlign::Center,
            wrap_text: true,
            default_format: None,
        }
    }

    /// Footer row: body look with a bold font
    pub fn default_footer() -> Self {
        let mut footer = Self::default_body();
        footer.font.bold = true;
        footer.wrap_text = false;
        footer.default_format = Some(TEXT_FORMAT.to_string());
        footer
    }

    pub fn with_row_index(mut self, row_index: u32) -> Self {
        self.row_index = row_index;
        self
    }

    pub fn with_height(mut self, height: f64) -> Self {
        self.height = height;
        self
    }

    pub fn with_background(mut self, color: Option<Color>) -> Self {
        self.background = color;
        self
    }

    pub fn with_border(mut self, border: Option<BorderSpec>) -> Self {
        self.border = border;
        self
    }

    pub fn with_font(mut self, font: FontSpec) -> Self {
        self.font = font;
        self
    }

    pub fn with_align(mut self, align: Align) -> Self {
        self.align = align;
        self
    }

    pub fn with_valign(mut self, valign: VerticalAlign) -> Self {
        self.valign = valign;
        self
    }

    pub fn with_wrap_text(mut self, wrap: bool) -> Self {
        self.wrap_text = wrap;
        self
    }

    pub fn with_default_format(mut self, format: impl Into<String>) -> Self {
        self.default_format = Some(format.into());
        self
    }
}

/// Which template of a sheet a style comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateRole {
    Title,
    Body,
    Footer,
}

/// Concrete style of one cell
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedCellStyle {
    pub font: FontSpec,
    pub fill: Option<Color>,
    pub border: Option<BorderSpec>,
    pub align: Align,
    pub valign: VerticalAlign,
    pub wrap_text: bool,
    pub num_format: String,
}

type StyleKey = (TemplateRole, Option<String>, Option<Align>);

/// Per-sheet style cache keyed by `(role, format, alignment)`
#[derive(Debug, Default)]
pub struct StyleResolver {
    cache: HashMap<StyleKey, Arc<ResolvedCellStyle>>,
}

impl StyleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a style, returning the cached instance when one exists
    pub fn resolve(
        &mut self,
        role: TemplateRole,
        template: &RowStyleTemplate,
        format: Option<&str>,
        align: Option<Align>,
    ) -> Arc<ResolvedCellStyle> {
        let format = format.filter(|f| !f.is_empty());
        let key = (role, format.map(str::to_string), align);
        self.cache
            .entry(key)
            .or_insert_with(|| Arc::new(Self::resolve_uncached(template, format, align)))
            .clone()
    }

    /// Compute a style without consulting the cache
    ///
    /// The alignment override wins over the template. The format is the
    /// override, else the template default, else `General`.
    pub fn resolve_uncached(
        template: &RowStyleTemplate,
        format: Option<&str>,
        align: Option<Align>,
    ) -> ResolvedCellStyle {
        let num_format = format
            .filter(|f| !f.is_empty())
            .or(template.default_format.as_deref())
            .unwrap_or(GENERAL_FORMAT)
            .to_string();

        ResolvedCellStyle {
            font: template.font,
            fill: template.background,
            border: template.border,
            align: align.unwrap_or(template.align),
            valign: template.valign,
            wrap_text: template.wrap_text,
            num_format,
        }
    }

    /// Number of distinct styles resolved so far
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
