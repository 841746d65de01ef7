//! Type definitions for Excel data

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Coercion target category of a mapped field
///
/// Decided once per field when the descriptor table is built and never
/// inspected from runtime values afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ScalarKind {
    String,
    Boolean,
    Number,
    Date,
}

impl ScalarKind {
    /// Map a declared type name to a scalar kind
    ///
    /// Used by dynamically typed registrations. `u8` and `char` map to text,
    /// matching the rule that byte and character fields are not numeric columns.
    pub fn from_type_name(name: &str) -> Option<ScalarKind> {
        let kind = match name.trim() {
            "String" | "&str" | "str" | "string" | "text" | "char" | "u8" => ScalarKind::String,
            "bool" | "boolean" => ScalarKind::Boolean,
            "i8" | "i16" | "i32" | "i64" | "i128" | "isize" | "u16" | "u32" | "u64" | "u128"
            | "usize" | "f32" | "f64" | "number" => ScalarKind::Number,
            "NaiveDate" | "NaiveDateTime" | "date" | "datetime" => ScalarKind::Date,
            _ => return None,
        };
        Some(kind)
    }

    /// Format code used when a field declares no format
    pub fn default_format(&self) -> &'static str {
        match self {
            ScalarKind::String => TEXT_FORMAT,
            ScalarKind::Boolean | ScalarKind::Number => GENERAL_FORMAT,
            ScalarKind::Date => DATE_TIME_FORMAT,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::String => "STRING",
            ScalarKind::Boolean => "BOOLEAN",
            ScalarKind::Number => "NUMBER",
            ScalarKind::Date => "DATE",
        };
        f.write_str(name)
    }
}

/// Excel text format code
pub const TEXT_FORMAT: &str = "@";
/// Excel general format code
pub const GENERAL_FORMAT: &str = "General";
/// Default display format for date fields
pub const DATE_TIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// Horizontal alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Align {
    General,
    #[default]
    Left,
    Center,
    Right,
    Fill,
    Justify,
    CenterSelection,
    Distributed,
}

impl Align {
    /// Value of the `horizontal` attribute in SpreadsheetML
    pub fn xml_value(&self) -> &'static str {
        match self {
            Align::General => "general",
            Align::Left => "left",
            Align::Center => "center",
            Align::Right => "right",
            Align::Fill => "fill",
            Align::Justify => "justify",
            Align::CenterSelection => "centerContinuous",
            Align::Distributed => "distributed",
        }
    }
}

/// Vertical alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VerticalAlign {
    Top,
    Center,
    #[default]
    Bottom,
    Justify,
}

impl VerticalAlign {
    pub fn xml_value(&self) -> &'static str {
        match self {
            VerticalAlign::Top => "top",
            VerticalAlign::Center => "center",
            VerticalAlign::Bottom => "bottom",
            VerticalAlign::Justify => "justify",
        }
    }
}

/// Palette colors used by row templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Color {
    Black,
    White,
    Yellow,
    LightTurquoise,
    Grey25Percent,
    Grey50Percent,
    BlueGrey,
    /// Custom color as 0xRRGGBB
    Rgb(u32),
}

impl Color {
    /// ARGB hex string as written into styles.xml
    pub fn argb(&self) -> String {
        let rgb = match self {
            Color::Black => 0x000000,
            Color::White => 0xFFFFFF,
            Color::Yellow => 0xFFFF00,
            Color::LightTurquoise => 0xCCFFFF,
            Color::Grey25Percent => 0xC0C0C0,
            Color::Grey50Percent => 0x808080,
            Color::BlueGrey => 0x666699,
            Color::Rgb(value) => *value & 0xFFFFFF,
        };
        format!("FF{:06X}", rgb)
    }
}

/// Border line style applied on all four sides of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BorderLine {
    Thin,
    Medium,
    Thick,
    Dashed,
    Dotted,
    Double,
    Hair,
}

impl BorderLine {
    pub fn xml_value(&self) -> &'static str {
        match self {
            BorderLine::Thin => "thin",
            BorderLine::Medium => "medium",
            BorderLine::Thick => "thick",
            BorderLine::Dashed => "dashed",
            BorderLine::Dotted => "dotted",
            BorderLine::Double => "double",
            BorderLine::Hair => "hair",
        }
    }
}

/// Raw value read off a record by a field accessor
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Absent value
    Null,
    Text(String),
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Date(NaiveDateTime),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Textual form of the value; dates use ISO-8601
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Null => String::new(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => itoa::Buffer::new().format(*i).to_string(),
            FieldValue::UInt(u) => itoa::Buffer::new().format(*u).to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Date(d) => d.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

/// Payload stored in one cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Empty cell
    Empty,
    /// String value
    String(String),
    /// Numeric value (all numbers are stored as 64-bit floats)
    Number(f64),
    /// Boolean value
    Bool(bool),
    /// Date/time value, stored as an Excel serial number
    DateTime(NaiveDateTime),
}

impl CellValue {
    /// Convert cell value to string
    pub fn as_string(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::String(s) => s.clone(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::DateTime(d) => d.to_string(),
        }
    }

    /// Check if cell is empty
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Try to convert to float
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::DateTime(d) => excel_serial_from_datetime(d),
            CellValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            CellValue::Number(n) => Some(*n != 0.0),
            CellValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::String(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::String(s)
    }
}

impl From<f64> for CellValue {
    fn from(f: f64) -> Self {
        CellValue::Number(f)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

fn excel_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Serial 60 is 1900-02-29, a day the 1900 system counts but the calendar lacks
const PHANTOM_LEAP_DAY: f64 = 60.0;

fn first_serial_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default()
}

fn first_date_after_leap_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 3, 1).unwrap_or_default()
}

/// Convert a date-time to an Excel 1900-system serial number
///
/// Dates before 1900-01-01 have no serial and yield `None`. Dates before
/// 1900-03-01 are shifted by one day to skip the phantom 1900-02-29.
pub fn excel_serial_from_datetime(dt: &NaiveDateTime) -> Option<f64> {
    let date = dt.date();
    if date < first_serial_date() {
        return None;
    }
    let mut days = (date - excel_epoch().date()).num_days() as f64;
    if date < first_date_after_leap_day() {
        days -= 1.0;
    }
    let seconds = dt.num_seconds_from_midnight() as f64 + dt.nanosecond() as f64 / 1e9;
    Some(days + seconds / 86_400.0)
}

/// Convert an Excel 1900-system serial number back to a date-time
///
/// Serials below 1 are times of day on the epoch; serial 60 has no date.
pub fn datetime_from_excel_serial(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let serial = if serial >= PHANTOM_LEAP_DAY + 1.0 || serial < 1.0 {
        serial
    } else if serial < PHANTOM_LEAP_DAY {
        serial + 1.0
    } else {
        return None;
    };
    let millis = (serial * 86_400_000.0).round() as i64;
    excel_epoch().checked_add_signed(chrono::Duration::milliseconds(millis))
}

/// Convert 0-based column index to Excel letters (0 -> A, 25 -> Z, 26 -> AA)
pub fn col_to_letter(col: u32) -> String {
    let mut result = String::new();
    let mut col = col + 1;

    while col > 0 {
        col -= 1;
        result.insert(0, (b'A' + (col % 26) as u8) as char);
        col /= 26;
    }

    result
}

/// Represents a row of cells read back from a sheet
#[derive(Debug, Clone)]
pub struct Row {
    /// Row index (0-based)
    pub index: u32,
    /// Cells in this row
    pub cells: Vec<CellValue>,
}

impl Row {
    /// Create a new row
    pub fn new(index: u32, cells: Vec<CellValue>) -> Self {
        Row { index, cells }
    }

    /// Get cell at column index
    pub fn get(&self, col: usize) -> Option<&CellValue> {
        self.cells.get(col)
    }

    /// Get number of cells
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Check if row is empty
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() || self.cells.iter().all(|c| c.is_empty())
    }

    /// Convert row to vector of strings
    pub fn to_strings(&self) -> Vec<String> {
        self.cells.iter().map(|c| c.as_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(col_to_letter(0), "A");
        assert_eq!(col_to_letter(25), "Z");
        assert_eq!(col_to_letter(26), "AA");
        assert_eq!(col_to_letter(701), "ZZ");
    }

    #[test]
    fn test_scalar_kind_from_type_name() {
        assert_eq!(ScalarKind::from_type_name("i32"), Some(ScalarKind::Number));
        assert_eq!(ScalarKind::from_type_name("f64"), Some(ScalarKind::Number));
        assert_eq!(ScalarKind::from_type_name("bool"), Some(ScalarKind::Boolean));
        assert_eq!(ScalarKind::from_type_name("u8"), Some(ScalarKind::String));
        assert_eq!(ScalarKind::from_type_name("char"), Some(ScalarKind::String));
        assert_eq!(
            ScalarKind::from_type_name("NaiveDateTime"),
            Some(ScalarKind::Date)
        );
        assert_eq!(ScalarKind::from_type_name("Vec<u8>"), None);
    }

    #[test]
    fn test_excel_serial_roundtrip() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let serial = excel_serial_from_datetime(&dt).unwrap();
        assert!((serial - 45292.5).abs() < 1e-9);
        assert_eq!(datetime_from_excel_serial(serial), Some(dt));
    }

    #[test]
    fn test_excel_serial_around_1900_leap_day() {
        let at = |y, m, d| {
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        };
        assert_eq!(excel_serial_from_datetime(&at(1900, 1, 1)), Some(1.0));
        assert_eq!(excel_serial_from_datetime(&at(1900, 2, 28)), Some(59.0));
        assert_eq!(excel_serial_from_datetime(&at(1900, 3, 1)), Some(61.0));
        assert_eq!(excel_serial_from_datetime(&at(1899, 12, 31)), None);

        assert_eq!(datetime_from_excel_serial(1.0), Some(at(1900, 1, 1)));
        assert_eq!(datetime_from_excel_serial(59.0), Some(at(1900, 2, 28)));
        assert_eq!(datetime_from_excel_serial(60.0), None);
        assert_eq!(datetime_from_excel_serial(61.0), Some(at(1900, 3, 1)));
    }

    #[test]
    fn test_color_argb() {
        assert_eq!(Color::Yellow.argb(), "FFFFFF00");
        assert_eq!(Color::Rgb(0x123456).argb(), "FF123456");
    }
}
