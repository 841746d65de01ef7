//! Sheet building: header, body rows, footer and seal
//!
//! [`SheetBuilder`] decides which value and style lands at which coordinate
//! and hands every cell to a [`SheetSink`]. The XLSX worksheet writer and the
//! in-memory [`MemorySheet`] are the two sinks shipped with the crate.

use crate::coerce::coerce;
use crate::config::SheetConfig;
use crate::error::{ExcelError, Result};
use crate::schema::FieldTable;
use crate::style::{ResolvedCellStyle, StyleResolver, TemplateRole};
use crate::types::CellValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Receiver of the cells of one sheet
///
/// Calls arrive in order: column widths, then for each row `start_row`, its
/// cells in ascending column order and `end_row`, then `finish` once.
pub trait SheetSink {
    /// Width in 1/256 of a character
    fn set_column_width(&mut self, col: u32, stored_width: u32) -> Result<()>;

    /// Open a row; `height` is in points
    fn start_row(&mut self, row: u32, height: f64) -> Result<()>;

    fn write_cell(&mut self, col: u32, value: &CellValue, style: &ResolvedCellStyle)
        -> Result<()>;

    fn end_row(&mut self) -> Result<()>;

    /// Close the sheet; no calls follow
    fn finish(&mut self) -> Result<()>;
}

impl<S: SheetSink + ?Sized> SheetSink for &mut S {
    fn set_column_width(&mut self, col: u32, stored_width: u32) -> Result<()> {
        (**self).set_column_width(col, stored_width)
    }

    fn start_row(&mut self, row: u32, height: f64) -> Result<()> {
        (**self).start_row(row, height)
    }

    fn write_cell(
        &mut self,
        col: u32,
        value: &CellValue,
        style: &ResolvedCellStyle,
    ) -> Result<()> {
        (**self).write_cell(col, value, style)
    }

    fn end_row(&mut self) -> Result<()> {
        (**self).end_row()
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// Lifecycle of a sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetState {
    Empty,
    HeaderWritten,
    /// Number of body rows written so far
    BodyWritten(u32),
    FooterWritten,
    Sealed,
    /// A row failed; the sheet must be discarded
    Aborted,
}

/// Builds one sheet of records of type `T`
pub struct SheetBuilder<T, S: SheetSink> {
    name: String,
    config: SheetConfig,
    table: Arc<FieldTable<T>>,
    sink: S,
    resolver: StyleResolver,
    state: SheetState,
    next_row: u32,
    body_rows: u32,
}

impl<T, S: SheetSink> SheetBuilder<T, S> {
    pub fn new(
        name: impl Into<String>,
        config: SheetConfig,
        table: Arc<FieldTable<T>>,
        sink: S,
    ) -> Self {
        let next_row = config.body.row_index;
        SheetBuilder {
            name: name.into(),
            config,
            table,
            sink,
            resolver: StyleResolver::new(),
            state: SheetState::Empty,
            next_row,
            body_rows: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SheetState {
        self.state
    }

    /// Body rows written so far
    pub fn rows_written(&self) -> u32 {
        self.body_rows
    }

    /// Distinct cell styles used by this sheet
    pub fn style_count(&self) -> usize {
        self.resolver.len()
    }

    /// Write column widths and the title row
    pub fn start(&mut self) -> Result<()> {
        if self.state != SheetState::Empty {
            return Err(self.invalid("start", "the header is already written"));
        }
        self.config.validate()?;

        let width = self.config.stored_width();
        for descriptor in self.table.iter() {
            self.sink.set_column_width(descriptor.index(), width)?;
        }

        let title = &self.config.title;
        let style = self.resolver.resolve(TemplateRole::Title, title, None, None);
        self.sink.start_row(title.row_index, title.height)?;
        for descriptor in self.table.iter() {
            let header = CellValue::String(descriptor.header().to_string());
            self.sink.write_cell(descriptor.index(), &header, &style)?;
        }
        self.sink.end_row()?;

        log::debug!(
            "Sheet '{}': header written with {} columns",
            self.name,
            self.table.len()
        );
        self.state = SheetState::HeaderWritten;
        Ok(())
    }

    /// Write the next body row
    ///
    /// A missing record or a failing accessor is a row build error; a value
    /// that does not fit its column kind is a coercion error wrapped with the
    /// row number. Either way the sheet is aborted.
    pub fn append_row(&mut self, record: Option<&T>) -> Result<()> {
        if !matches!(
            self.state,
            SheetState::HeaderWritten | SheetState::BodyWritten(_)
        ) {
            return Err(self.invalid("append a row", "the sheet is not accepting body rows"));
        }

        let row = self.next_row;
        let cells = match self.build_cells(record, row) {
            Ok(cells) => cells,
            Err(e) => {
                self.state = SheetState::Aborted;
                return Err(e);
            }
        };

        let body = &self.config.body;
        let result = self.sink.start_row(row, body.height).and_then(|()| {
            for (col, value, style) in &cells {
                self.sink.write_cell(*col, value, style)?;
            }
            self.sink.end_row()
        });
        if let Err(e) = result {
            self.state = SheetState::Aborted;
            return Err(e);
        }

        self.next_row += 1;
        self.body_rows += 1;
        self.state = SheetState::BodyWritten(self.body_rows);
        Ok(())
    }

    fn build_cells(
        &mut self,
        record: Option<&T>,
        row: u32,
    ) -> Result<Vec<(u32, CellValue, Arc<ResolvedCellStyle>)>> {
        // Diagnostics use the 1-based row number shown by spreadsheet apps.
        let row_number = row + 1;
        let record = record.ok_or_else(|| ExcelError::RowBuild {
            sheet: self.name.clone(),
            row: row_number,
            reason: "record is missing".to_string(),
        })?;

        let labels = &self.config.boolean_labels;
        let body = &self.config.body;
        let mut cells = Vec::with_capacity(self.table.len());
        for descriptor in self.table.iter() {
            let value = descriptor.read(record).map_err(|reason| ExcelError::RowBuild {
                sheet: self.name.clone(),
                row: row_number,
                reason: format!("cannot read field '{}': {}", descriptor.header(), reason),
            })?;

            let coerced = coerce(
                descriptor.header(),
                &value,
                descriptor.kind(),
                descriptor.format(),
                Some(labels),
            )
            .map_err(|e| ExcelError::WriteRowError {
                row: row_number,
                sheet: self.name.clone(),
                source: Box::new(e),
            })?;

            // Field format, then the body template's default, then the kind's.
            let format = match (&coerced.format, &body.default_format) {
                (Some(format), _) => format.as_str(),
                (None, Some(default)) => default.as_str(),
                (None, None) => coerced.effective_format(descriptor.kind()),
            };
            let style = self.resolver.resolve(
                TemplateRole::Body,
                body,
                Some(format),
                Some(descriptor.align()),
            );
            cells.push((descriptor.index(), coerced.payload, style));
        }
        Ok(cells)
    }

    /// Write every record in order
    pub fn append_rows<'r, I>(&mut self, records: I) -> Result<()>
    where
        T: 'r,
        I: IntoIterator,
        I::Item: Into<Option<&'r T>>,
    {
        for record in records {
            self.append_row(record.into())?;
        }
        Ok(())
    }

    /// Write one text row after the last body row using the footer template
    ///
    /// Labels are placed on the mapped columns from left to right.
    pub fn append_footer<I, L>(&mut self, labels: I) -> Result<()>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        if !matches!(
            self.state,
            SheetState::HeaderWritten | SheetState::BodyWritten(_)
        ) {
            return Err(self.invalid("append a footer", "the sheet is not accepting rows"));
        }
        let Some(footer) = self.config.footer.as_ref() else {
            return Err(self.invalid("append a footer", "no footer template is configured"));
        };

        let style = self
            .resolver
            .resolve(TemplateRole::Footer, footer, None, None);
        self.sink.start_row(self.next_row, footer.height)?;
        for (descriptor, label) in self.table.iter().zip(labels) {
            let value = CellValue::String(label.as_ref().to_string());
            self.sink.write_cell(descriptor.index(), &value, &style)?;
        }
        self.sink.end_row()?;

        self.next_row += 1;
        self.state = SheetState::FooterWritten;
        Ok(())
    }

    /// Close the sheet; calling it again is a no-op
    pub fn seal(&mut self) -> Result<()> {
        match self.state {
            SheetState::Sealed => return Ok(()),
            SheetState::Empty => return Err(self.invalid("seal", "the header was never written")),
            SheetState::Aborted => return Err(self.invalid("seal", "the sheet was aborted")),
            _ => {}
        }
        self.sink.finish()?;
        log::debug!(
            "Sheet '{}' sealed after {} body rows ({} styles)",
            self.name,
            self.rows_written(),
            self.resolver.len()
        );
        self.state = SheetState::Sealed;
        Ok(())
    }

    /// Give back the sink, e.g. to inspect a [`MemorySheet`]
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn invalid(&self, action: &str, reason: &str) -> ExcelError {
        ExcelError::InvalidState(format!(
            "cannot {} on sheet '{}' ({:?}): {}",
            action, self.name, self.state, reason
        ))
    }
}

/// A cell captured by [`MemorySheet`]
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryCell {
    pub value: CellValue,
    pub style: ResolvedCellStyle,
}

/// Sheet held as an in-memory grid, for previews and tests
#[derive(Debug, Default)]
pub struct MemorySheet {
    cells: BTreeMap<(u32, u32), MemoryCell>,
    row_heights: BTreeMap<u32, f64>,
    column_widths: BTreeMap<u32, u32>,
    current_row: Option<u32>,
    finished: bool,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&MemoryCell> {
        self.cells.get(&(row, col))
    }

    pub fn value(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.cell(row, col).map(|c| &c.value)
    }

    /// Values of a row from column 0 to its last written column
    pub fn row_values(&self, row: u32) -> Vec<CellValue> {
        let mut values = Vec::new();
        for (&(_, col), cell) in self.cells.range((row, 0)..=(row, u32::MAX)) {
            let col = col as usize;
            if values.len() < col {
                values.resize(col, CellValue::Empty);
            }
            values.push(cell.value.clone());
        }
        values
    }

    /// Row indexes that were written, ascending
    pub fn rows(&self) -> Vec<u32> {
        self.row_heights.keys().copied().collect()
    }

    pub fn row_height(&self, row: u32) -> Option<f64> {
        self.row_heights.get(&row).copied()
    }

    pub fn column_width(&self, col: u32) -> Option<u32> {
        self.column_widths.get(&col).copied()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn check_open(&self) -> Result<()> {
        if self.finished {
            return Err(ExcelError::InvalidState(
                "memory sheet is already finished".to_string(),
            ));
        }
        Ok(())
    }
}

impl SheetSink for MemorySheet {
    fn set_column_width(&mut self, col: u32, stored_width: u32) -> Result<()> {
        self.check_open()?;
        self.column_widths.insert(col, stored_width);
        Ok(())
    }

    fn start_row(&mut self, row: u32, height: f64) -> Result<()> {
        self.check_open()?;
        if self.current_row.is_some() {
            return Err(ExcelError::InvalidState(format!(
                "row {} started while another row is open",
                row
            )));
        }
        self.current_row = Some(row);
        self.row_heights.insert(row, height);
        Ok(())
    }

    fn write_cell(
        &mut self,
        col: u32,
        value: &CellValue,
        style: &ResolvedCellStyle,
    ) -> Result<()> {
        let row = self
            .current_row
            .ok_or_else(|| ExcelError::InvalidState("cell written outside a row".to_string()))?;
        self.cells.insert(
            (row, col),
            MemoryCell {
                value: value.clone(),
                style: style.clone(),
            },
        );
        Ok(())
    }

    fn end_row(&mut self) -> Result<()> {
        self.current_row = None;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.check_open()?;
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ExcelField, ExcelRecord, SchemaBuilder};
    use crate::style::RowStyleTemplate;
    use crate::types::{Align, FieldValue, GENERAL_FORMAT, TEXT_FORMAT};

    struct Account {
        id: i64,
        active: bool,
        owner: Option<String>,
        balance: String,
    }

    impl ExcelRecord for Account {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema
                .field(ExcelField::new(0, "ID"), |a: &Account| a.id)
                .field(ExcelField::new(1, "Active"), |a: &Account| a.active)
                .field(ExcelField::new(3, "Owner"), |a: &Account| a.owner.clone())
                .field_with_type(
                    ExcelField::new(4, "Balance")
                        .with_format("0.00")
                        .with_align(Align::Right),
                    "f64",
                    |a: &Account| Ok(FieldValue::Text(a.balance.clone())),
                );
        }
    }

    fn account(id: i64, active: bool, balance: &str) -> Account {
        Account {
            id,
            active,
            owner: None,
            balance: balance.to_string(),
        }
    }

    fn builder(
        sheet: &mut MemorySheet,
        config: SheetConfig,
    ) -> SheetBuilder<Account, &mut MemorySheet> {
        let table = FieldTable::<Account>::get().unwrap();
        SheetBuilder::new("Accounts", config, table, sheet)
    }

    #[test]
    fn test_header_and_rows() {
        let mut sheet = MemorySheet::new();
        let mut b = builder(&mut sheet, SheetConfig::default());
        b.start().unwrap();
        b.append_row(Some(&account(1, true, "10.5"))).unwrap();
        b.append_row(Some(&account(2, false, "-3"))).unwrap();
        assert_eq!(b.state(), SheetState::BodyWritten(2));
        b.seal().unwrap();
        b.seal().unwrap();

        assert_eq!(
            sheet.row_values(0),
            vec![
                CellValue::from("ID"),
                CellValue::from("Active"),
                CellValue::Empty,
                CellValue::from("Owner"),
                CellValue::from("Balance"),
            ]
        );
        assert_eq!(sheet.value(1, 0), Some(&CellValue::Number(1.0)));
        assert_eq!(sheet.value(1, 1), Some(&CellValue::from("Y")));
        assert_eq!(sheet.value(2, 1), Some(&CellValue::from("N")));
        assert_eq!(sheet.value(1, 3), Some(&CellValue::from("")));
        assert_eq!(sheet.value(2, 4), Some(&CellValue::Number(-3.0)));
        assert_eq!(sheet.rows(), vec![0, 1, 2]);
        assert_eq!(sheet.row_height(0), Some(28.0));
        assert_eq!(sheet.row_height(1), Some(24.0));
        assert_eq!(sheet.column_width(3), Some(5304));
        assert_eq!(sheet.column_width(2), None);
        assert!(sheet.is_finished());
    }

    #[test]
    fn test_styles_follow_templates_and_fields() {
        let mut sheet = MemorySheet::new();
        let mut b = builder(&mut sheet, SheetConfig::default());
        b.start().unwrap();
        b.append_row(Some(&account(1, true, "1"))).unwrap();
        b.seal().unwrap();

        let header = &sheet.cell(0, 4).unwrap().style;
        assert_eq!(header.align, Align::Center);
        assert!(header.font.bold);
        assert_eq!(header.num_format, TEXT_FORMAT);

        let balance = &sheet.cell(1, 4).unwrap().style;
        assert_eq!(balance.align, Align::Right);
        assert_eq!(balance.num_format, "0.00");
        assert!(balance.wrap_text);

        let owner = &sheet.cell(1, 3).unwrap().style;
        assert_eq!(owner.num_format, TEXT_FORMAT);
        assert_eq!(owner.align, Align::Left);

        let id = &sheet.cell(1, 0).unwrap().style;
        assert_eq!(id.num_format, GENERAL_FORMAT);
    }

    #[test]
    fn test_body_template_format_fills_unformatted_fields() {
        let config = SheetConfig {
            body: RowStyleTemplate::default_body().with_default_format("0.000"),
            ..SheetConfig::default()
        };
        let mut sheet = MemorySheet::new();
        let mut b = builder(&mut sheet, config);
        b.start().unwrap();
        b.append_row(Some(&account(1, true, "2.5"))).unwrap();
        b.seal().unwrap();

        // No field format on ID, so the template default applies
        assert_eq!(sheet.cell(1, 0).unwrap().style.num_format, "0.000");
        // An explicit field format still wins
        assert_eq!(sheet.cell(1, 4).unwrap().style.num_format, "0.00");
        // Text payloads keep the text format
        assert_eq!(sheet.cell(1, 1).unwrap().style.num_format, TEXT_FORMAT);
        assert_eq!(sheet.cell(1, 3).unwrap().style.num_format, TEXT_FORMAT);
    }

    #[test]
    fn test_header_only_sheet() {
        let mut sheet = MemorySheet::new();
        let mut b = builder(&mut sheet, SheetConfig::default());
        b.start().unwrap();
        b.append_rows(Vec::<&Account>::new()).unwrap();
        assert_eq!(b.rows_written(), 0);
        b.seal().unwrap();
        assert_eq!(sheet.rows(), vec![0]);
    }

    #[test]
    fn test_missing_record_aborts() {
        let mut sheet = MemorySheet::new();
        let mut b = builder(&mut sheet, SheetConfig::default());
        b.start().unwrap();
        let first = account(1, true, "1");
        let err = b.append_rows(vec![Some(&first), None]).unwrap_err();

        assert!(err.is_row_build_error());
        assert!(err.to_string().contains("row 3"));
        assert_eq!(b.state(), SheetState::Aborted);
        assert!(b.seal().is_err());
    }

    #[test]
    fn test_bad_number_is_wrapped_coercion_error() {
        let mut sheet = MemorySheet::new();
        let mut b = builder(&mut sheet, SheetConfig::default());
        b.start().unwrap();
        let err = b.append_row(Some(&account(9, false, "ten"))).unwrap_err();

        assert!(matches!(err, ExcelError::WriteRowError { row: 2, .. }));
        assert!(err.is_coercion_error());
        assert!(sheet.rows().len() == 1);
    }

    #[test]
    fn test_footer_row() {
        let mut sheet = MemorySheet::new();
        let config = SheetConfig {
            footer: Some(RowStyleTemplate::default_footer()),
            ..SheetConfig::default()
        };
        let mut b = builder(&mut sheet, config);
        b.start().unwrap();
        b.append_row(Some(&account(1, true, "5"))).unwrap();
        b.append_footer(["Total", "", "", "5"]).unwrap();
        assert!(b.append_row(Some(&account(2, true, "5"))).is_err());
        b.seal().unwrap();

        assert_eq!(sheet.value(2, 0), Some(&CellValue::from("Total")));
        assert_eq!(sheet.value(2, 4), Some(&CellValue::from("5")));
        assert!(sheet.cell(2, 0).unwrap().style.font.bold);
    }

    #[test]
    fn test_footer_requires_template() {
        let mut sheet = MemorySheet::new();
        let mut b = builder(&mut sheet, SheetConfig::default());
        b.start().unwrap();
        assert!(matches!(
            b.append_footer(["x"]),
            Err(ExcelError::InvalidState(_))
        ));
    }

    #[test]
    fn test_custom_body_start_row() {
        let mut sheet = MemorySheet::new();
        let config = SheetConfig {
            body: RowStyleTemplate::default_body().with_row_index(3),
            ..SheetConfig::default()
        };
        let mut b = builder(&mut sheet, config);
        b.start().unwrap();
        b.append_row(Some(&account(1, true, "1"))).unwrap();
        b.append_row(Some(&account(2, true, "1"))).unwrap();
        b.seal().unwrap();
        assert_eq!(sheet.rows(), vec![0, 3, 4]);
    }

    #[test]
    fn test_rows_rejected_before_start() {
        let mut sheet = MemorySheet::new();
        let mut b = builder(&mut sheet, SheetConfig::default());
        assert!(b.append_row(Some(&account(1, true, "1"))).is_err());
        assert!(b.seal().is_err());
    }
}
