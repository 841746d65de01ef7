//! # excelmap
//!
//! Map typed Rust records to styled Excel sheets and back.
//!
//! A record type registers its mapped fields once (column index, header,
//! display format and alignment). Export then turns any list of records into
//! a sheet with a styled title row and one styled body row per record, and a
//! workbook can hold as many sheets as needed. The XLSX package is produced by
//! a streaming writer that compresses every worksheet as its rows arrive.
//!
//! ## Features
//!
//! - **Field tables**: explicit registration through [`ExcelRecord`] or the
//!   [`excel_record!`] macro, validated once and cached per type
//! - **Value coercion**: strings, numbers, booleans (optionally as labels such
//!   as `Y`/`N`) and dates, each with its display format
//! - **Row templates**: title, body and footer rows with fill, border, font,
//!   alignment, wrap and height; equal styles are shared in `styles.xml`
//! - **Import**: map rows back into records with [`FromExcelRow`]
//!
//! ## Quick Start
//!
//! ### Writing records
//!
//! ```rust,no_run
//! use excelmap::{excel_record, export_writable, ExcelField};
//!
//! struct Order {
//!     id: u64,
//!     customer: String,
//!     total: f64,
//!     shipped: bool,
//! }
//!
//! excel_record!(Order {
//!     id => ExcelField::new(0, "Order #"),
//!     customer => ExcelField::new(1, "Customer"),
//!     total => ExcelField::new(2, "Total").with_format("#,##0.00"),
//!     shipped => ExcelField::new(3, "Shipped"),
//! });
//!
//! # fn main() -> excelmap::Result<()> {
//! let orders = vec![Order { id: 1, customer: "Ann".into(), total: 12.5, shipped: true }];
//! let mut excel = export_writable::<Order>().with_sheet_name("Orders");
//! excel.add_sheet(&orders)?;
//! excel.write_to_path("orders.xlsx")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Reading records
//!
//! ```rust,no_run
//! use excelmap::{import_readable, FromExcelRow, RecordRow};
//!
//! struct Order {
//!     id: u64,
//!     customer: String,
//! }
//!
//! impl FromExcelRow for Order {
//!     fn from_row(row: &RecordRow<'_>) -> excelmap::Result<Self> {
//!         Ok(Order { id: row.get(0)?, customer: row.get(1)? })
//!     }
//! }
//!
//! # fn main() -> excelmap::Result<()> {
//! let mut excel = import_readable("orders.xlsx")?;
//! let orders: Vec<Order> = excel.read_sheet(0)?;
//! # Ok(())
//! # }
//! ```

pub mod coerce;
pub mod config;
pub mod error;
pub mod fast_writer;
pub mod reader;
pub mod schema;
pub mod sheet;
pub mod streaming_reader;
pub mod style;
pub mod types;
pub mod writer;

pub use coerce::{coerce, BooleanLabels, CoercedCell};
pub use config::SheetConfig;
pub use error::{ExcelError, Result};
pub use reader::{FromExcelRow, ReadableExcel, RecordRow};
pub use schema::{ExcelField, ExcelRecord, ExcelScalar, FieldDescriptor, FieldTable, SchemaBuilder};
pub use sheet::{MemorySheet, SheetBuilder, SheetSink, SheetState};
pub use style::{ResolvedCellStyle, RowStyleTemplate, StyleResolver, TemplateRole};
pub use types::{Align, CellValue, Color, FieldValue, Row, ScalarKind, VerticalAlign};
pub use writer::{WorkbookSession, WritableExcel};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Export front end with the default layout and `Y`/`N` boolean labels
pub fn export_writable<T: ExcelRecord>() -> WritableExcel<T> {
    WritableExcel::new()
}

/// Open a workbook for import; records start at row 2
pub fn import_readable<P: AsRef<Path>>(path: P) -> Result<ReadableExcel<BufReader<File>>> {
    ReadableExcel::open(path)
}
