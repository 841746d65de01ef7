//! Multi-sheet export: the workbook session and the `WritableExcel` front end
//!
//! A [`WorkbookSession`] owns the XLSX package while sheets are added. Every
//! worksheet is compressed as its rows are written, so only compressed bytes
//! are held until [`WorkbookSession::finalize`] hands the package to a sink.

use crate::coerce::BooleanLabels;
use crate::config::SheetConfig;
use crate::error::{ExcelError, Result};
use crate::fast_writer::{FastWorkbook, FastWorksheet, DEFAULT_COMPRESSION_LEVEL};
use crate::schema::{ExcelRecord, FieldTable};
use crate::sheet::SheetBuilder;
use crate::style::RowStyleTemplate;
use log::{debug, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;

/// Longest sheet name a spreadsheet application accepts
pub const MAX_SHEET_NAME_LEN: usize = 31;

const ILLEGAL_SHEET_NAME_CHARS: [char; 7] = ['*', ':', '?', '/', '\\', '[', ']'];

/// Sheet builder writing into a session's package
pub type SessionSheet<'s, T> = SheetBuilder<T, FastWorksheet<'s, Vec<u8>>>;

/// State spanning every sheet of one export up to the final flush
///
/// ```
/// use excelmap::config::SheetConfig;
/// use excelmap::writer::WorkbookSession;
/// use excelmap::{excel_record, ExcelField};
///
/// struct Point { x: i32, y: i32 }
/// excel_record!(Point {
///     x => ExcelField::new(0, "X"),
///     y => ExcelField::new(1, "Y"),
/// });
///
/// let mut session = WorkbookSession::new();
/// let mut sheet = session.new_sheet::<Point>(SheetConfig::default(), None)?;
/// sheet.start()?;
/// sheet.append_rows(&[Point { x: 1, y: 2 }])?;
/// sheet.seal()?;
/// let bytes = session.finalize(Vec::new())?;
/// assert!(bytes.starts_with(b"PK"));
/// # Ok::<(), excelmap::ExcelError>(())
/// ```
pub struct WorkbookSession {
    book: FastWorkbook<Vec<u8>>,
    sheet_counter: u32,
    poisoned: bool,
}

impl Default for WorkbookSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkbookSession {
    pub fn new() -> Self {
        Self::with_compression_level(DEFAULT_COMPRESSION_LEVEL)
    }

    /// Session whose parts are deflated at `level` (0..=9)
    pub fn with_compression_level(level: u32) -> Self {
        WorkbookSession {
            book: FastWorkbook::new(Vec::new(), level),
            sheet_counter: 1,
            poisoned: false,
        }
    }

    /// Counter the next sheet will be numbered with
    pub fn sheet_counter(&self) -> u32 {
        self.sheet_counter
    }

    pub fn sheet_names(&self) -> &[String] {
        self.book.worksheet_names()
    }

    /// True once a sheet failed; the session only reports errors afterwards
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Mark the session unusable after a failed sheet
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Open the next sheet for records of type `T`
    ///
    /// The name is `name_override`, else `config.name`, else `Sheet{n}` where
    /// `n` is the running counter. The counter moves on every call. A sheet
    /// left unsealed poisons the session at the next call.
    pub fn new_sheet<T: ExcelRecord>(
        &mut self,
        config: SheetConfig,
        name_override: Option<&str>,
    ) -> Result<SessionSheet<'_, T>> {
        self.check_usable("open a new sheet")?;
        let table = FieldTable::<T>::get()?;

        let counter = self.sheet_counter;
        self.sheet_counter += 1;
        let requested = name_override.or(config.name.as_deref());
        let name = self.assign_name(requested, counter);
        debug!("Opening sheet #{} '{}' for {}", counter, name, table.type_name());

        let worksheet = match self.book.add_worksheet(&name) {
            Ok(worksheet) => worksheet,
            Err(e) => {
                self.poisoned = true;
                return Err(e);
            }
        };
        Ok(SheetBuilder::new(name, config, table, worksheet))
    }

    fn check_usable(&mut self, action: &str) -> Result<()> {
        if !self.poisoned && self.book.has_open_sheet() {
            self.poisoned = true;
            warn!("A sheet was left unsealed; the workbook session is poisoned");
        }
        if self.poisoned {
            return Err(ExcelError::InvalidState(format!(
                "cannot {}: an earlier sheet failed",
                action
            )));
        }
        Ok(())
    }

    fn assign_name(&self, requested: Option<&str>, counter: u32) -> String {
        let base = match requested.filter(|n| !n.trim().is_empty()) {
            Some(name) => {
                let clean = sanitize_sheet_name(name);
                if clean != name {
                    warn!("Sheet name '{}' was changed to '{}'", name, clean);
                }
                clean
            }
            None => format!("Sheet{}", counter),
        };

        let mut candidate = base.clone();
        let mut suffix = counter;
        while self.name_taken(&candidate) {
            candidate = with_suffix(&base, suffix);
            suffix += 1;
        }
        if candidate != base {
            warn!("Sheet name '{}' is already used; writing '{}'", base, candidate);
        }
        candidate
    }

    fn name_taken(&self, name: &str) -> bool {
        self.sheet_names()
            .iter()
            .any(|used| used.eq_ignore_ascii_case(name))
    }

    /// Write the remaining package parts and hand every byte to `sink`
    ///
    /// The sink is flushed and returned; the session is consumed.
    pub fn finalize<S: Write>(self, mut sink: S) -> Result<S> {
        let bytes = self.into_package()?;
        sink.write_all(&bytes)?;
        sink.flush()?;
        Ok(sink)
    }

    /// Close the package and return its bytes without touching any sink
    ///
    /// Fails on a poisoned session or an open sheet, before any output exists.
    pub fn into_package(mut self) -> Result<Vec<u8>> {
        self.check_usable("finalize")?;
        let sheets = self.book.worksheet_names().len();
        let styles = self.book.style_count();
        let bytes = self.book.close()?;
        debug!(
            "Workbook finalized: {} sheets, {} cell formats, {} bytes",
            sheets,
            styles,
            bytes.len()
        );
        Ok(bytes)
    }
}

/// Replace characters spreadsheet applications reject and cut to 31 chars
pub fn sanitize_sheet_name(name: &str) -> String {
    let mut clean: String = name
        .chars()
        .map(|c| {
            if ILLEGAL_SHEET_NAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .take(MAX_SHEET_NAME_LEN)
        .collect();
    // Names may not start or end with an apostrophe.
    if clean.starts_with('\'') {
        clean.replace_range(..1, "_");
    }
    if clean.ends_with('\'') {
        clean.pop();
        clean.push('_');
    }
    clean
}

fn with_suffix(base: &str, n: u32) -> String {
    let suffix = format!(" ({})", n);
    let keep = MAX_SHEET_NAME_LEN.saturating_sub(suffix.chars().count());
    let mut name: String = base.chars().take(keep).collect();
    name.push_str(&suffix);
    name
}

/// Export front end for records of type `T`
///
/// Configuration applies to the sheets added after it is set.
///
/// ```no_run
/// use excelmap::{excel_record, export_writable, ExcelField};
///
/// struct User { name: String, active: bool }
/// excel_record!(User {
///     name => ExcelField::new(0, "Name"),
///     active => ExcelField::new(1, "Active"),
/// });
///
/// let users = vec![User { name: "Ann".into(), active: true }];
/// let mut excel = export_writable::<User>().with_sheet_name("Users");
/// excel.add_sheet(&users)?;
/// excel.write_to_path("users.xlsx")?;
/// # Ok::<(), excelmap::ExcelError>(())
/// ```
pub struct WritableExcel<T> {
    config: SheetConfig,
    footer_labels: Vec<String>,
    compression_level: u32,
    session: Option<WorkbookSession>,
    _record: PhantomData<fn(&T)>,
}

impl<T: ExcelRecord> Default for WritableExcel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ExcelRecord> WritableExcel<T> {
    pub fn new() -> Self {
        WritableExcel {
            config: SheetConfig::default(),
            footer_labels: Vec::new(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            session: None,
            _record: PhantomData,
        }
    }

    pub fn config(&self) -> &SheetConfig {
        &self.config
    }

    /// Name for the following sheets; repeats get a counter suffix
    pub fn with_sheet_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    /// Column width in characters
    pub fn with_cell_width(mut self, units: u32) -> Self {
        self.config.cell_width_units = units;
        self
    }

    pub fn with_title_style(mut self, template: RowStyleTemplate) -> Self {
        self.config.title = template;
        self
    }

    pub fn with_body_style(mut self, template: RowStyleTemplate) -> Self {
        self.config.body = template;
        self
    }

    /// Footer row written after the body of every following sheet
    pub fn with_footer_style<I, L>(mut self, template: RowStyleTemplate, labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.config.footer = Some(template);
        self.footer_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_boolean_labels(mut self, labels: BooleanLabels) -> Self {
        self.config.boolean_labels = labels;
        self
    }

    /// Deflate level 0..=9; only honoured before the first sheet
    pub fn with_compression_level(mut self, level: u32) -> Self {
        if self.session.is_some() {
            warn!("Compression level set after the first sheet; ignored");
        } else {
            self.compression_level = level;
        }
        self
    }

    /// Add a sheet named by the configuration or the running counter
    ///
    /// An empty record list produces a sheet holding only the title row.
    pub fn add_sheet<'r, I>(&mut self, records: I) -> Result<&mut Self>
    where
        T: 'r,
        I: IntoIterator,
        I::Item: Into<Option<&'r T>>,
    {
        self.write_sheet(None, records)
    }

    /// Add a sheet with an explicit name
    pub fn add_named_sheet<'r, I>(&mut self, name: &str, records: I) -> Result<&mut Self>
    where
        T: 'r,
        I: IntoIterator,
        I::Item: Into<Option<&'r T>>,
    {
        self.write_sheet(Some(name), records)
    }

    fn write_sheet<'r, I>(&mut self, name: Option<&str>, records: I) -> Result<&mut Self>
    where
        T: 'r,
        I: IntoIterator,
        I::Item: Into<Option<&'r T>>,
    {
        let level = self.compression_level;
        let session = self
            .session
            .get_or_insert_with(|| WorkbookSession::with_compression_level(level));
        let sheet_number = session.sheet_counter();
        let requested = name.or(self.config.name.as_deref()).unwrap_or_default();

        let mut sheet = session
            .new_sheet::<T>(self.config.clone(), name)
            .map_err(|e| sheet_error(requested, sheet_number, e))?;
        let sheet_name = sheet.name().to_string();
        let footer = self
            .config
            .footer
            .as_ref()
            .map(|_| self.footer_labels.as_slice());

        if let Err(e) = fill_sheet(&mut sheet, records, footer) {
            drop(sheet);
            session.poison();
            return Err(sheet_error(&sheet_name, sheet_number, e));
        }
        Ok(self)
    }

    fn into_session(self) -> Result<WorkbookSession> {
        self.session.ok_or_else(|| {
            ExcelError::InvalidState("no sheet was added to the workbook".to_string())
        })
    }

    /// Write the workbook to a file, closing it before returning
    ///
    /// The package is complete before the file is created, so a failed
    /// export leaves any existing file at `path` untouched.
    pub fn write_to_path<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let path = path.as_ref();
        let bytes = self.into_session()?.into_package()?;
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&bytes)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        debug!("Workbook written to {}", path.display());
        Ok(())
    }

    /// Write the workbook to any byte sink and return it flushed
    pub fn write_to_stream<S: Write>(self, sink: S) -> Result<S> {
        self.into_session()?.finalize(sink)
    }

    /// The finished package as bytes
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        self.write_to_stream(Vec::new())
    }
}

fn fill_sheet<'r, T, I>(
    sheet: &mut SessionSheet<'_, T>,
    records: I,
    footer: Option<&[String]>,
) -> Result<()>
where
    T: 'r,
    I: IntoIterator,
    I::Item: Into<Option<&'r T>>,
{
    sheet.start()?;
    sheet.append_rows(records)?;
    if let Some(labels) = footer {
        sheet.append_footer(labels)?;
    }
    sheet.seal()
}

fn sheet_error(sheet: &str, sheet_number: u32, source: ExcelError) -> ExcelError {
    ExcelError::Sheet {
        sheet: sheet.to_string(),
        sheet_number,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ExcelField, SchemaBuilder};
    use crate::sheet::SheetState;

    struct Item {
        code: String,
        qty: i64,
    }

    impl ExcelRecord for Item {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema
                .field(ExcelField::new(0, "Code"), |i: &Item| i.code.clone())
                .field(ExcelField::new(1, "Qty"), |i: &Item| i.qty);
        }
    }

    fn items(n: i64) -> Vec<Item> {
        (0..n)
            .map(|i| Item {
                code: format!("C{}", i),
                qty: i,
            })
            .collect()
    }

    #[test]
    fn test_sanitize_sheet_name() {
        assert_eq!(sanitize_sheet_name("Q1/Q2 [draft]*"), "Q1_Q2 _draft__");
        assert_eq!(sanitize_sheet_name("'quoted'"), "_quoted_");
        let long = "x".repeat(40);
        assert_eq!(sanitize_sheet_name(&long).chars().count(), MAX_SHEET_NAME_LEN);
    }

    #[test]
    fn test_suffix_keeps_limit() {
        let name = with_suffix(&"y".repeat(31), 12);
        assert_eq!(name.chars().count(), MAX_SHEET_NAME_LEN);
        assert!(name.ends_with(" (12)"));
    }

    #[test]
    fn test_counter_names_and_duplicates() {
        let mut session = WorkbookSession::new();
        for name in [None, Some("Data"), Some("data"), None] {
            let mut sheet = session
                .new_sheet::<Item>(SheetConfig::default(), name)
                .unwrap();
            sheet.start().unwrap();
            sheet.seal().unwrap();
        }
        assert_eq!(
            session.sheet_names(),
            ["Sheet1", "Data", "data (3)", "Sheet4"].map(String::from)
        );
        assert_eq!(session.sheet_counter(), 5);
        assert!(session.finalize(Vec::new()).is_ok());
    }

    #[test]
    fn test_unsealed_sheet_poisons_session() {
        let mut session = WorkbookSession::new();
        {
            let mut sheet = session
                .new_sheet::<Item>(SheetConfig::default(), None)
                .unwrap();
            sheet.start().unwrap();
            assert_eq!(sheet.state(), SheetState::HeaderWritten);
        }
        assert!(matches!(
            session.new_sheet::<Item>(SheetConfig::default(), None),
            Err(ExcelError::InvalidState(_))
        ));
        assert!(session.is_poisoned());
        assert!(session.finalize(Vec::new()).is_err());
    }

    #[test]
    fn test_writable_excel_multi_sheet_bytes() {
        let data = items(3);
        let mut excel = WritableExcel::<Item>::new();
        excel.add_sheet(&data).unwrap();
        excel.add_sheet(Vec::<&Item>::new()).unwrap();
        let bytes = excel.into_bytes().unwrap();
        assert!(bytes.starts_with(b"PK\x03\x04"));
    }

    #[test]
    fn test_missing_record_wraps_sheet_context() {
        let data = items(2);
        let mut excel = WritableExcel::<Item>::new();
        let rows = vec![Some(&data[0]), None, Some(&data[1])];
        let err = excel.add_sheet(rows).err().unwrap();
        match &err {
            ExcelError::Sheet {
                sheet,
                sheet_number,
                ..
            } => {
                assert_eq!(sheet, "Sheet1");
                assert_eq!(*sheet_number, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_row_build_error());
        assert!(excel.add_sheet(&data).is_err());
        assert!(excel.into_bytes().is_err());
    }

    #[test]
    fn test_failed_export_leaves_path_untouched() {
        let data = items(1);
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("report.xlsx");
        std::fs::write(&existing, b"previous report").unwrap();
        let missing = dir.path().join("new.xlsx");

        for path in [&existing, &missing] {
            let mut excel = WritableExcel::<Item>::new();
            assert!(excel.add_sheet(vec![Some(&data[0]), None]).is_err());
            assert!(excel.write_to_path(path).is_err());
        }

        assert_eq!(std::fs::read(&existing).unwrap(), b"previous report");
        assert!(!missing.exists());
    }

    #[test]
    fn test_nothing_to_write() {
        assert!(WritableExcel::<Item>::new().into_bytes().is_err());
    }
}
