//! Style registry: interns resolved cell styles into `styles.xml` cell formats

use super::xml_writer::XmlWriter;
use crate::error::Result;
use crate::style::{BorderSpec, FontSpec, ResolvedCellStyle};
use crate::types::{Align, Color, VerticalAlign};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;

/// First id available for custom number formats
const FIRST_CUSTOM_NUM_FMT: u32 = 164;

/// Built-in number format ids that need no `<numFmt>` entry
fn builtin_num_fmt_id(code: &str) -> Option<u32> {
    let id = match code {
        "General" => 0,
        "0" => 1,
        "0.00" => 2,
        "#,##0" => 3,
        "#,##0.00" => 4,
        "0%" => 9,
        "0.00%" => 10,
        "0.00E+00" => 11,
        "mm-dd-yy" => 14,
        "h:mm" => 20,
        "h:mm:ss" => 21,
        "@" => 49,
        _ => return None,
    };
    Some(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Fill {
    None,
    Gray125,
    Solid(Color),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct XfEntry {
    num_fmt_id: u32,
    font_id: u32,
    fill_id: u32,
    border_id: u32,
    align: Align,
    valign: VerticalAlign,
    wrap_text: bool,
}

/// Registry of fonts, fills, borders, number formats and cell formats
#[derive(Debug)]
pub struct StyleRegistry {
    fonts: IndexSet<FontSpec>,
    fills: IndexSet<Fill>,
    borders: IndexSet<Option<BorderSpec>>,
    num_fmts: IndexMap<String, u32>,
    xfs: IndexSet<XfEntry>,
    by_style: HashMap<ResolvedCellStyle, u32>,
}

impl Default for StyleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StyleRegistry {
    pub fn new() -> Self {
        let mut registry = StyleRegistry {
            fonts: IndexSet::new(),
            fills: IndexSet::new(),
            borders: IndexSet::new(),
            num_fmts: IndexMap::new(),
            xfs: IndexSet::new(),
            by_style: HashMap::new(),
        };
        registry.fonts.insert(FontSpec::default());
        // The first two fills are reserved by the format.
        registry.fills.insert(Fill::None);
        registry.fills.insert(Fill::Gray125);
        registry.borders.insert(None);
        registry.xfs.insert(XfEntry {
            num_fmt_id: 0,
            font_id: 0,
            fill_id: 0,
            border_id: 0,
            align: Align::General,
            valign: VerticalAlign::Bottom,
            wrap_text: false,
        });
        registry
    }

    /// Cell format id for a resolved style, registering it on first use
    pub fn intern(&mut self, style: &ResolvedCellStyle) -> u32 {
        if let Some(&id) = self.by_style.get(style) {
            return id;
        }

        let fill = match style.fill {
            Some(color) => Fill::Solid(color),
            None => Fill::None,
        };
        let entry = XfEntry {
            num_fmt_id: self.num_fmt_id(&style.num_format),
            font_id: self.fonts.insert_full(style.font).0 as u32,
            fill_id: self.fills.insert_full(fill).0 as u32,
            border_id: self.borders.insert_full(style.border).0 as u32,
            align: style.align,
            valign: style.valign,
            wrap_text: style.wrap_text,
        };
        let id = self.xfs.insert_full(entry).0 as u32;
        self.by_style.insert(style.clone(), id);
        id
    }

    fn num_fmt_id(&mut self, code: &str) -> u32 {
        if let Some(id) = builtin_num_fmt_id(code) {
            return id;
        }
        let next = FIRST_CUSTOM_NUM_FMT + self.num_fmts.len() as u32;
        *self.num_fmts.entry(code.to_string()).or_insert(next)
    }

    /// Number of cell formats, including the default one
    pub fn len(&self) -> usize {
        self.xfs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xfs.is_empty()
    }

    /// Render `xl/styles.xml`
    pub fn to_xml(&self) -> Result<Vec<u8>> {
        let mut xml = XmlWriter::new(Vec::with_capacity(2048 + self.xfs.len() * 160));
        xml.declaration()?;
        xml.start_element("styleSheet")?;
        xml.attribute(
            "xmlns",
            "http://schemas.openxmlformats.org/spreadsheetml/2006/main",
        )?;
        xml.close_start_tag()?;

        if !self.num_fmts.is_empty() {
            xml.start_element("numFmts")?;
            xml.attribute_int("count", self.num_fmts.len() as u32)?;
            xml.close_start_tag()?;
            for (code, id) in &self.num_fmts {
                xml.start_element("numFmt")?;
                xml.attribute_int("numFmtId", *id)?;
                xml.attribute("formatCode", code)?;
                xml.close_empty()?;
            }
            xml.end_element("numFmts")?;
        }

        xml.start_element("fonts")?;
        xml.attribute_int("count", self.fonts.len() as u32)?;
        xml.close_start_tag()?;
        for font in &self.fonts {
            xml.write_str("<font>")?;
            if font.bold {
                xml.write_str("<b/>")?;
            }
            xml.start_element("sz")?;
            xml.attribute_int("val", font.size as u32)?;
            xml.close_empty()?;
            xml.start_element("color")?;
            xml.attribute("rgb", &font.color.argb())?;
            xml.close_empty()?;
            xml.write_str("<name val=\"Calibri\"/><family val=\"2\"/></font>")?;
        }
        xml.end_element("fonts")?;

        xml.start_element("fills")?;
        xml.attribute_int("count", self.fills.len() as u32)?;
        xml.close_start_tag()?;
        for fill in &self.fills {
            match fill {
                Fill::None => xml.write_str("<fill><patternFill patternType=\"none\"/></fill>")?,
                Fill::Gray125 => {
                    xml.write_str("<fill><patternFill patternType=\"gray125\"/></fill>")?
                }
                Fill::Solid(color) => {
                    xml.write_str("<fill><patternFill patternType=\"solid\"><fgColor")?;
                    xml.attribute("rgb", &color.argb())?;
                    xml.write_str("/><bgColor indexed=\"64\"/></patternFill></fill>")?;
                }
            }
        }
        xml.end_element("fills")?;

        xml.start_element("borders")?;
        xml.attribute_int("count", self.borders.len() as u32)?;
        xml.close_start_tag()?;
        for border in &self.borders {
            xml.write_str("<border>")?;
            for side in ["left", "right", "top", "bottom"] {
                match border {
                    Some(spec) => {
                        xml.start_element(side)?;
                        xml.attribute("style", spec.line.xml_value())?;
                        xml.close_start_tag()?;
                        xml.start_element("color")?;
                        xml.attribute("rgb", &spec.color.argb())?;
                        xml.close_empty()?;
                        xml.end_element(side)?;
                    }
                    None => {
                        xml.start_element(side)?;
                        xml.close_empty()?;
                    }
                }
            }
            xml.write_str("<diagonal/></border>")?;
        }
        xml.end_element("borders")?;

        xml.write_str(
            "<cellStyleXfs count=\"1\"><xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\"/></cellStyleXfs>",
        )?;

        xml.start_element("cellXfs")?;
        xml.attribute_int("count", self.xfs.len() as u32)?;
        xml.close_start_tag()?;
        for (idx, xf) in self.xfs.iter().enumerate() {
            xml.start_element("xf")?;
            xml.attribute_int("numFmtId", xf.num_fmt_id)?;
            xml.attribute_int("fontId", xf.font_id)?;
            xml.attribute_int("fillId", xf.fill_id)?;
            xml.attribute_int("borderId", xf.border_id)?;
            xml.attribute_int("xfId", 0)?;
            if idx == 0 {
                xml.close_empty()?;
                continue;
            }
            if xf.num_fmt_id > 0 {
                xml.attribute("applyNumberFormat", "1")?;
            }
            xml.attribute("applyFont", "1")?;
            if xf.fill_id > 0 {
                xml.attribute("applyFill", "1")?;
            }
            if xf.border_id > 0 {
                xml.attribute("applyBorder", "1")?;
            }
            xml.attribute("applyAlignment", "1")?;
            xml.close_start_tag()?;

            xml.start_element("alignment")?;
            xml.attribute("horizontal", xf.align.xml_value())?;
            xml.attribute("vertical", xf.valign.xml_value())?;
            if xf.wrap_text {
                xml.attribute("wrapText", "1")?;
            }
            xml.close_empty()?;
            xml.end_element("xf")?;
        }
        xml.end_element("cellXfs")?;

        xml.write_str(
            "<cellStyles count=\"1\"><cellStyle name=\"Normal\" xfId=\"0\" builtinId=\"0\"/></cellStyles>",
        )?;
        xml.end_element("styleSheet")?;
        xml.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::{RowStyleTemplate, StyleResolver};
    use crate::types::DATE_TIME_FORMAT;

    #[test]
    fn test_equal_styles_share_an_id() {
        let body = RowStyleTemplate::default_body();
        let a = StyleResolver::resolve_uncached(&body, Some("0.00"), None);
        let b = StyleResolver::resolve_uncached(&body, Some("0.00"), None);
        let c = StyleResolver::resolve_uncached(&body, Some("0.00"), Some(Align::Right));

        let mut registry = StyleRegistry::new();
        let id_a = registry.intern(&a);
        assert_eq!(id_a, 1);
        assert_eq!(registry.intern(&b), id_a);
        assert_eq!(registry.intern(&c), 2);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_styles_xml() {
        let mut registry = StyleRegistry::new();
        let title = RowStyleTemplate::default_title();
        let body = RowStyleTemplate::default_body();
        registry.intern(&StyleResolver::resolve_uncached(&title, None, None));
        registry.intern(&StyleResolver::resolve_uncached(
            &body,
            Some(DATE_TIME_FORMAT),
            None,
        ));

        let xml = String::from_utf8(registry.to_xml().unwrap()).unwrap();
        assert!(xml.contains("<numFmt numFmtId=\"164\" formatCode=\"yyyy-mm-dd hh:mm:ss\"/>"));
        assert!(xml.contains("<xf numFmtId=\"49\""));
        assert!(xml.contains("<fgColor rgb=\"FFFFFF00\"/>"));
        assert!(xml.contains("<fgColor rgb=\"FFCCFFFF\"/>"));
        assert!(xml.contains("<left style=\"thin\"><color rgb=\"FFC0C0C0\"/></left>"));
        assert!(xml.contains("wrapText=\"1\""));
        assert!(xml.contains("<cellXfs count=\"3\">"));
    }
}
