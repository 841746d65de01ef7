//! Streaming XLSX package writer
//!
//! Worksheets go straight into a deflate stream as rows are appended; only
//! the style registry and the sheet list are kept in memory.
//!
//! ```
//! use excelmap::fast_writer::{FastWorkbook, DEFAULT_COMPRESSION_LEVEL};
//! use excelmap::sheet::SheetSink;
//! use excelmap::style::{RowStyleTemplate, StyleResolver};
//! use excelmap::types::CellValue;
//!
//! let style = StyleResolver::resolve_uncached(&RowStyleTemplate::default_body(), None, None);
//! let mut workbook = FastWorkbook::new(Vec::new(), DEFAULT_COMPRESSION_LEVEL);
//! let mut sheet = workbook.add_worksheet("Sheet1")?;
//! sheet.start_row(0, 24.0)?;
//! sheet.write_cell(0, &CellValue::from("hello"), &style)?;
//! sheet.end_row()?;
//! sheet.finish()?;
//! let bytes = workbook.close()?;
//! assert!(bytes.starts_with(b"PK"));
//! # Ok::<(), excelmap::ExcelError>(())
//! ```

pub mod streaming_zip_reader;
pub mod streaming_zip_writer;
pub mod styles;
pub mod workbook;
pub mod worksheet;
pub mod xml_writer;

pub use streaming_zip_reader::{StreamingZipReader, ZipEntry};
pub use streaming_zip_writer::StreamingZipWriter;
pub use styles::StyleRegistry;
pub use workbook::{FastWorkbook, DEFAULT_COMPRESSION_LEVEL};
pub use worksheet::FastWorksheet;
