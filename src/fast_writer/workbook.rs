//! XLSX package writer
//!
//! Worksheets are compressed into the ZIP stream as their rows arrive; the
//! remaining parts (content types, relationships, workbook, styles and
//! document properties) are written by [`FastWorkbook::close`].

use std::io::Write;

use super::streaming_zip_writer::StreamingZipWriter;
use super::styles::StyleRegistry;
use super::worksheet::FastWorksheet;
use super::xml_writer::XmlWriter;
use crate::error::{ExcelError, Result};

/// Default deflate level, balancing speed and size
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const NS_PKG_REL: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// Streaming XLSX workbook over any byte sink
pub struct FastWorkbook<W: Write> {
    zip: StreamingZipWriter<W>,
    styles: StyleRegistry,
    worksheets: Vec<String>,
    sheet_open: bool,
}

impl<W: Write> FastWorkbook<W> {
    pub fn new(output: W, compression_level: u32) -> Self {
        FastWorkbook {
            zip: StreamingZipWriter::new(output, compression_level),
            styles: StyleRegistry::new(),
            worksheets: Vec::new(),
            sheet_open: false,
        }
    }

    /// Start the next worksheet; the previous one must be finished
    pub fn add_worksheet(&mut self, name: &str) -> Result<FastWorksheet<'_, W>> {
        if self.sheet_open {
            return Err(ExcelError::InvalidState(format!(
                "cannot add sheet '{}' while sheet '{}' is still open",
                name,
                self.worksheets.last().map(String::as_str).unwrap_or_default()
            )));
        }
        if self.worksheets.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            return Err(ExcelError::InvalidState(format!(
                "sheet name '{}' is already used",
                name
            )));
        }

        self.worksheets.push(name.to_string());
        self.sheet_open = true;
        let entry_name = format!("xl/worksheets/sheet{}.xml", self.worksheets.len());
        FastWorksheet::new(self, &entry_name)
    }

    /// Names of the worksheets added so far, in order
    pub fn worksheet_names(&self) -> &[String] {
        &self.worksheets
    }

    /// True while a worksheet was added but not finished
    pub fn has_open_sheet(&self) -> bool {
        self.sheet_open
    }

    /// Distinct cell formats registered so far
    pub fn style_count(&self) -> usize {
        self.styles.len()
    }

    /// Compressed bytes emitted so far
    pub fn bytes_written(&self) -> u64 {
        self.zip.bytes_written()
    }

    pub(crate) fn zip_mut(&mut self) -> &mut StreamingZipWriter<W> {
        &mut self.zip
    }

    pub(crate) fn styles_mut(&mut self) -> &mut StyleRegistry {
        &mut self.styles
    }

    pub(crate) fn close_sheet(&mut self) {
        self.sheet_open = false;
    }

    /// Write the package parts and return the output
    pub fn close(mut self) -> Result<W> {
        if self.sheet_open {
            return Err(ExcelError::InvalidState(
                "the last sheet was never finished".to_string(),
            ));
        }
        if self.worksheets.is_empty() {
            return Err(ExcelError::InvalidState(
                "a workbook needs at least one sheet".to_string(),
            ));
        }

        self.zip.start_entry("[Content_Types].xml")?;
        self.write_content_types()?;
        self.zip.start_entry("_rels/.rels")?;
        Self::write_root_rels(&mut self.zip)?;
        self.zip.start_entry("xl/workbook.xml")?;
        self.write_workbook_xml()?;
        self.zip.start_entry("xl/_rels/workbook.xml.rels")?;
        self.write_workbook_rels()?;
        self.zip.start_entry("xl/styles.xml")?;
        let styles = self.styles.to_xml()?;
        self.zip.write_data(&styles)?;
        self.zip.start_entry("docProps/core.xml")?;
        Self::write_core_props(&mut self.zip)?;
        self.zip.start_entry("docProps/app.xml")?;
        self.write_app_props()?;

        self.zip.finish()
    }

    fn write_content_types(&mut self) -> Result<()> {
        let mut xml = XmlWriter::new(&mut self.zip);
        xml.declaration()?;
        xml.write_str(
            r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>
<Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>
<Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/>"#,
        )?;
        for i in 1..=self.worksheets.len() {
            xml.write_str(&format!(
                "\n<Override PartName=\"/xl/worksheets/sheet{}.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml\"/>",
                i
            ))?;
        }
        xml.write_str("\n</Types>")?;
        xml.flush()
    }

    fn write_root_rels<T: Write>(writer: &mut T) -> Result<()> {
        let xml = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>
<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties" Target="docProps/app.xml"/>
</Relationships>"#;
        writer.write_all(xml.as_bytes())?;
        Ok(())
    }

    fn write_workbook_xml(&mut self) -> Result<()> {
        let mut xml = XmlWriter::new(&mut self.zip);
        xml.declaration()?;
        xml.start_element("workbook")?;
        xml.attribute("xmlns", NS_MAIN)?;
        xml.attribute("xmlns:r", NS_REL)?;
        xml.close_start_tag()?;

        xml.start_element("sheets")?;
        xml.close_start_tag()?;
        for (i, name) in self.worksheets.iter().enumerate() {
            let sheet_id = i as u32 + 1;
            xml.start_element("sheet")?;
            xml.attribute("name", name)?;
            xml.attribute_int("sheetId", sheet_id)?;
            xml.attribute("r:id", &format!("rId{}", sheet_id))?;
            xml.close_empty()?;
        }
        xml.end_element("sheets")?;
        xml.end_element("workbook")?;
        xml.flush()
    }

    fn write_workbook_rels(&mut self) -> Result<()> {
        let sheet_count = self.worksheets.len() as u32;
        let mut xml = XmlWriter::new(&mut self.zip);
        xml.declaration()?;
        xml.start_element("Relationships")?;
        xml.attribute("xmlns", NS_PKG_REL)?;
        xml.close_start_tag()?;

        for rid in 1..=sheet_count {
            xml.start_element("Relationship")?;
            xml.attribute("Id", &format!("rId{}", rid))?;
            xml.attribute(
                "Type",
                "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet",
            )?;
            xml.attribute("Target", &format!("worksheets/sheet{}.xml", rid))?;
            xml.close_empty()?;
        }

        xml.start_element("Relationship")?;
        xml.attribute("Id", &format!("rId{}", sheet_count + 1))?;
        xml.attribute(
            "Type",
            "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles",
        )?;
        xml.attribute("Target", "styles.xml")?;
        xml.close_empty()?;

        xml.end_element("Relationships")?;
        xml.flush()
    }

    fn write_core_props<T: Write>(writer: &mut T) -> Result<()> {
        let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:dcterms="http://purl.org/dc/terms/" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
<dc:creator>excelmap</dc:creator>
<dcterms:created xsi:type="dcterms:W3CDTF">{created}</dcterms:created>
</cp:coreProperties>"#
        );
        writer.write_all(xml.as_bytes())?;
        Ok(())
    }

    fn write_app_props(&mut self) -> Result<()> {
        let mut xml = XmlWriter::new(&mut self.zip);
        xml.declaration()?;
        xml.write_str(
            "<Properties xmlns=\"http://schemas.openxmlformats.org/officeDocument/2006/extended-properties\">",
        )?;
        xml.write_str("<Application>excelmap</Application>")?;
        xml.write_str("<TitlesOfParts><vt:vector xmlns:vt=\"http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes\"")?;
        xml.attribute_int("size", self.worksheets.len() as u32)?;
        xml.attribute("baseType", "lpstr")?;
        xml.close_start_tag()?;
        for name in &self.worksheets {
            xml.write_str("<vt:lpstr>")?;
            xml.write_escaped(name)?;
            xml.write_str("</vt:lpstr>")?;
        }
        xml.write_str("</vt:vector></TitlesOfParts></Properties>")?;
        xml.flush()
    }
}
