//! Field descriptor tables
//!
//! A record type opts into mapping by implementing [`ExcelRecord`] and
//! registering its columns on a [`SchemaBuilder`]. The resulting
//! [`FieldTable`] is validated once, ordered by column index and cached for
//! the lifetime of the process.
//!
//! # Examples
//!
//! ```
//! use excelmap::schema::{ExcelField, ExcelRecord, FieldTable, SchemaBuilder};
//! use excelmap::types::Align;
//!
//! struct Order {
//!     id: u64,
//!     customer: String,
//!     amount: f64,
//! }
//!
//! impl ExcelRecord for Order {
//!     fn describe(schema: &mut SchemaBuilder<Self>) {
//!         schema
//!             .field(ExcelField::new(0, "Order ID"), |o: &Order| o.id)
//!             .field(ExcelField::new(2, "Amount").with_format("0.00").with_align(Align::Right), |o: &Order| o.amount)
//!             .field(ExcelField::new(1, "Customer"), |o: &Order| o.customer.clone());
//!     }
//! }
//!
//! let table = FieldTable::<Order>::get().unwrap();
//! let headers: Vec<&str> = table.iter().map(|d| d.header()).collect();
//! assert_eq!(headers, ["Order ID", "Customer", "Amount"]);
//! ```

use crate::error::{ExcelError, Result};
use crate::types::{datetime_from_excel_serial, Align, CellValue, FieldValue, ScalarKind};
use chrono::{NaiveDate, NaiveDateTime};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, RwLock};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-field column declaration
///
/// `index` and `name` are mandatory. An empty `format` means the scalar
/// kind's default format.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExcelField {
    pub index: Option<u32>,
    pub name: String,
    pub format: String,
    pub align: Align,
}

impl ExcelField {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        ExcelField {
            index: Some(index),
            name: name.into(),
            format: String::new(),
            align: Align::Left,
        }
    }

    /// Declaration without a column index; rejected when the table is built
    pub fn unindexed(name: impl Into<String>) -> Self {
        ExcelField {
            index: None,
            name: name.into(),
            format: String::new(),
            align: Align::Left,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_align(mut self, align: Align) -> Self {
        self.align = align;
        self
    }
}

/// Rust types that can be stored in a mapped column
///
/// The scalar kind is a property of the static type, so it is fixed when the
/// field is registered and never re-derived from values.
pub trait ExcelScalar: Sized {
    const KIND: ScalarKind;

    fn to_field_value(&self) -> FieldValue;

    /// Parse a cell read back from a sheet; `None` if the cell does not fit
    fn from_cell(cell: &CellValue) -> Option<Self>;
}

fn cell_number(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Number(n) => Some(*n),
        CellValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

macro_rules! impl_signed_scalar {
    ($($t:ty),*) => {$(
        impl ExcelScalar for $t {
            const KIND: ScalarKind = ScalarKind::Number;

            fn to_field_value(&self) -> FieldValue {
                FieldValue::Int(*self as i64)
            }

            fn from_cell(cell: &CellValue) -> Option<Self> {
                if let CellValue::String(s) = cell {
                    if let Ok(v) = s.trim().parse::<$t>() {
                        return Some(v);
                    }
                }
                let n = cell_number(cell)?;
                if n.fract() != 0.0 || n < <$t>::MIN as f64 || n > <$t>::MAX as f64 {
                    return None;
                }
                Some(n as $t)
            }
        }
    )*};
}

macro_rules! impl_unsigned_scalar {
    ($($t:ty),*) => {$(
        impl ExcelScalar for $t {
            const KIND: ScalarKind = ScalarKind::Number;

            fn to_field_value(&self) -> FieldValue {
                FieldValue::UInt(*self as u64)
            }

            fn from_cell(cell: &CellValue) -> Option<Self> {
                if let CellValue::String(s) = cell {
                    if let Ok(v) = s.trim().parse::<$t>() {
                        return Some(v);
                    }
                }
                let n = cell_number(cell)?;
                if n.fract() != 0.0 || n < 0.0 || n > <$t>::MAX as f64 {
                    return None;
                }
                Some(n as $t)
            }
        }
    )*};
}

impl_signed_scalar!(i8, i16, i32, i64, isize);
impl_unsigned_scalar!(u16, u32, u64, usize);

impl ExcelScalar for f64 {
    const KIND: ScalarKind = ScalarKind::Number;

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Float(*self)
    }

    fn from_cell(cell: &CellValue) -> Option<Self> {
        cell_number(cell)
    }
}

impl ExcelScalar for f32 {
    const KIND: ScalarKind = ScalarKind::Number;

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Float(*self as f64)
    }

    fn from_cell(cell: &CellValue) -> Option<Self> {
        cell_number(cell).map(|n| n as f32)
    }
}

impl ExcelScalar for bool {
    const KIND: ScalarKind = ScalarKind::Boolean;

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }

    fn from_cell(cell: &CellValue) -> Option<Self> {
        cell.as_bool()
    }
}

impl ExcelScalar for String {
    const KIND: ScalarKind = ScalarKind::String;

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Text(self.clone())
    }

    fn from_cell(cell: &CellValue) -> Option<Self> {
        Some(cell.as_string())
    }
}

// Byte and character fields are written as text columns.
impl ExcelScalar for char {
    const KIND: ScalarKind = ScalarKind::String;

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Text(self.to_string())
    }

    fn from_cell(cell: &CellValue) -> Option<Self> {
        let text = cell.as_string();
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    }
}

impl ExcelScalar for u8 {
    const KIND: ScalarKind = ScalarKind::String;

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Text(self.to_string())
    }

    fn from_cell(cell: &CellValue) -> Option<Self> {
        match cell {
            CellValue::String(s) => s.trim().parse().ok(),
            CellValue::Number(n) if n.fract() == 0.0 && (0.0..=255.0).contains(n) => {
                Some(*n as u8)
            }
            _ => None,
        }
    }
}

impl ExcelScalar for NaiveDateTime {
    const KIND: ScalarKind = ScalarKind::Date;

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Date(*self)
    }

    fn from_cell(cell: &CellValue) -> Option<Self> {
        match cell {
            CellValue::DateTime(d) => Some(*d),
            CellValue::Number(n) => datetime_from_excel_serial(*n),
            CellValue::String(s) => parse_datetime_text(s.trim()),
            _ => None,
        }
    }
}

impl ExcelScalar for NaiveDate {
    const KIND: ScalarKind = ScalarKind::Date;

    fn to_field_value(&self) -> FieldValue {
        match self.and_hms_opt(0, 0, 0) {
            Some(dt) => FieldValue::Date(dt),
            None => FieldValue::Null,
        }
    }

    fn from_cell(cell: &CellValue) -> Option<Self> {
        NaiveDateTime::from_cell(cell).map(|dt| dt.date())
    }
}

impl<V: ExcelScalar> ExcelScalar for Option<V> {
    const KIND: ScalarKind = V::KIND;

    fn to_field_value(&self) -> FieldValue {
        match self {
            Some(v) => v.to_field_value(),
            None => FieldValue::Null,
        }
    }

    fn from_cell(cell: &CellValue) -> Option<Self> {
        if cell.is_empty() {
            return Some(None);
        }
        V::from_cell(cell).map(Some)
    }
}

pub(crate) fn parse_datetime_text(text: &str) -> Option<NaiveDateTime> {
    const LAYOUTS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
    LAYOUTS
        .iter()
        .find_map(|layout| NaiveDateTime::parse_from_str(text, layout).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// A record type that can be written to (and described for) a sheet
pub trait ExcelRecord: Sized + 'static {
    /// Register the mapped fields; fields not registered are ignored
    fn describe(schema: &mut SchemaBuilder<Self>);
}

type Accessor<T> = Box<dyn Fn(&T) -> std::result::Result<FieldValue, String> + Send + Sync>;

enum DeclaredKind {
    Known(ScalarKind),
    Named(String),
}

struct PendingField<T> {
    field: ExcelField,
    kind: DeclaredKind,
    accessor: Accessor<T>,
}

/// Collects field registrations for one record type
pub struct SchemaBuilder<T> {
    type_name: &'static str,
    fields: Vec<PendingField<T>>,
}

impl<T: 'static> SchemaBuilder<T> {
    fn new() -> Self {
        SchemaBuilder {
            type_name: std::any::type_name::<T>(),
            fields: Vec::new(),
        }
    }

    /// Register a statically typed field
    pub fn field<V, F>(&mut self, field: ExcelField, get: F) -> &mut Self
    where
        V: ExcelScalar,
        F: Fn(&T) -> V + Send + Sync + 'static,
    {
        self.fields.push(PendingField {
            field,
            kind: DeclaredKind::Known(V::KIND),
            accessor: Box::new(move |record| Ok(get(record).to_field_value())),
        });
        self
    }

    /// Register a field whose type is only known by name
    ///
    /// The name is mapped with [`ScalarKind::from_type_name`] when the table
    /// is built. The accessor may fail, which aborts the row being written.
    pub fn field_with_type<F>(&mut self, field: ExcelField, type_name: &str, get: F) -> &mut Self
    where
        F: Fn(&T) -> std::result::Result<FieldValue, String> + Send + Sync + 'static,
    {
        self.fields.push(PendingField {
            field,
            kind: DeclaredKind::Named(type_name.to_string()),
            accessor: Box::new(get),
        });
        self
    }

    fn finish(self) -> Result<FieldTable<T>> {
        let type_name = self.type_name;
        if self.fields.is_empty() {
            return Err(ExcelError::schema(type_name, "no mapped fields"));
        }

        let mut seen = HashSet::new();
        let mut descriptors = Vec::with_capacity(self.fields.len());
        for pending in self.fields {
            let header = pending.field.name.trim();
            if header.is_empty() {
                return Err(ExcelError::schema(
                    type_name,
                    "a mapped field has no header name",
                ));
            }
            let index = pending.field.index.ok_or_else(|| {
                ExcelError::schema(type_name, format!("field '{}' has no column index", header))
            })?;
            if !seen.insert(index) {
                return Err(ExcelError::schema(
                    type_name,
                    format!("duplicate column index {} on field '{}'", index, header),
                ));
            }
            let kind = match pending.kind {
                DeclaredKind::Known(kind) => kind,
                DeclaredKind::Named(name) => ScalarKind::from_type_name(&name).ok_or_else(|| {
                    ExcelError::schema(
                        type_name,
                        format!("field '{}' has unsupported type '{}'", header, name),
                    )
                })?,
            };
            let format = Some(pending.field.format).filter(|f| !f.is_empty());

            descriptors.push(FieldDescriptor {
                index,
                header: header.to_string(),
                format,
                align: pending.field.align,
                kind,
                accessor: pending.accessor,
            });
        }

        descriptors.sort_by_key(|d| d.index);
        Ok(FieldTable {
            type_name,
            descriptors,
        })
    }
}

/// Compiled metadata of one mapped field
pub struct FieldDescriptor<T> {
    index: u32,
    header: String,
    format: Option<String>,
    align: Align,
    kind: ScalarKind,
    accessor: Accessor<T>,
}

impl<T> FieldDescriptor<T> {
    /// Zero-based column index
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    pub fn align(&self) -> Align {
        self.align
    }

    pub fn kind(&self) -> ScalarKind {
        self.kind
    }

    /// Read this field off a record
    pub fn read(&self, record: &T) -> std::result::Result<FieldValue, String> {
        (self.accessor)(record)
    }
}

impl<T> std::fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("index", &self.index)
            .field("header", &self.header)
            .field("format", &self.format)
            .field("align", &self.align)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Ordered descriptors of one record type, ascending by column index
pub struct FieldTable<T> {
    type_name: &'static str,
    descriptors: Vec<FieldDescriptor<T>>,
}

type DescriptorCache = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

static DESCRIPTOR_CACHE: OnceLock<RwLock<DescriptorCache>> = OnceLock::new();

fn descriptor_cache() -> &'static RwLock<DescriptorCache> {
    DESCRIPTOR_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

impl<T: ExcelRecord> FieldTable<T> {
    /// Build and validate the table without touching the cache
    pub fn build() -> Result<Self> {
        let mut builder = SchemaBuilder::new();
        T::describe(&mut builder);
        let table = builder.finish()?;
        log::debug!(
            "Built field table for {} ({} columns)",
            table.type_name,
            table.descriptors.len()
        );
        Ok(table)
    }

    /// Cached table for `T`, built on first use
    ///
    /// Concurrent first calls may each build a table; the first one inserted
    /// is kept and handed to every caller.
    pub fn get() -> Result<Arc<Self>> {
        let key = TypeId::of::<T>();
        let cached = descriptor_cache()
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .cloned();
        if let Some(entry) = cached {
            return Self::downcast(entry);
        }

        let built: Arc<dyn Any + Send + Sync> = Arc::new(Self::build()?);
        let entry = descriptor_cache()
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key)
            .or_insert(built)
            .clone();
        Self::downcast(entry)
    }

    fn downcast(entry: Arc<dyn Any + Send + Sync>) -> Result<Arc<Self>> {
        entry.downcast::<Self>().map_err(|_| {
            ExcelError::InvalidState(format!(
                "descriptor cache entry for {} has the wrong type",
                std::any::type_name::<T>()
            ))
        })
    }
}

impl<T> FieldTable<T> {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldDescriptor<T>> {
        self.descriptors.iter()
    }

    /// Descriptor mapped to a column index
    pub fn by_index(&self, index: u32) -> Option<&FieldDescriptor<T>> {
        self.descriptors
            .binary_search_by_key(&index, |d| d.index)
            .ok()
            .map(|pos| &self.descriptors[pos])
    }

    /// Header texts in column order
    pub fn headers(&self) -> Vec<&str> {
        self.descriptors.iter().map(|d| d.header.as_str()).collect()
    }
}

impl<'a, T> IntoIterator for &'a FieldTable<T> {
    type Item = &'a FieldDescriptor<T>;
    type IntoIter = std::slice::Iter<'a, FieldDescriptor<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.descriptors.iter()
    }
}

/// Implement [`ExcelRecord`] for a struct from a list of `field => declaration`
///
/// ```
/// use excelmap::{excel_record, ExcelField};
///
/// struct Person {
///     name: String,
///     age: u32,
///     active: bool,
/// }
///
/// excel_record!(Person {
///     name => ExcelField::new(0, "Name"),
///     age => ExcelField::new(1, "Age"),
///     active => ExcelField::new(2, "Active"),
/// });
/// ```
#[macro_export]
macro_rules! excel_record {
    ($ty:ty { $($field:ident => $decl:expr),+ $(,)? }) => {
        impl $crate::schema::ExcelRecord for $ty {
            fn describe(schema: &mut $crate::schema::SchemaBuilder<Self>) {
                $(
                    schema.field($decl, |record: &$ty| ::std::clone::Clone::clone(&record.$field));
                )+
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Product {
        sku: String,
        price: f64,
        stock: Option<u32>,
        listed: bool,
    }

    impl ExcelRecord for Product {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema
                .field(ExcelField::new(5, "Listed"), |p: &Product| p.listed)
                .field(ExcelField::new(0, "SKU"), |p: &Product| p.sku.clone())
                .field(
                    ExcelField::new(2, "Price")
                        .with_format("0.00")
                        .with_align(Align::Right),
                    |p: &Product| p.price,
                )
                .field(ExcelField::new(3, "Stock"), |p: &Product| p.stock);
        }
    }

    struct Cached {
        id: i64,
    }

    static CACHED_DESCRIBES: AtomicUsize = AtomicUsize::new(0);

    impl ExcelRecord for Cached {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            CACHED_DESCRIBES.fetch_add(1, Ordering::SeqCst);
            schema.field(ExcelField::new(0, "ID"), |c: &Cached| c.id);
        }
    }

    struct Clash;

    impl ExcelRecord for Clash {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema
                .field(ExcelField::new(0, "A"), |_: &Clash| 1i32)
                .field(ExcelField::new(0, "B"), |_: &Clash| 2i32);
        }
    }

    struct Headless;

    impl ExcelRecord for Headless {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.field(ExcelField::new(0, "  "), |_: &Headless| 1i32);
        }
    }

    struct NoIndex;

    impl ExcelRecord for NoIndex {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.field(ExcelField::unindexed("Name"), |_: &NoIndex| 1i32);
        }
    }

    struct Dynamic(HashMap<&'static str, String>);

    impl ExcelRecord for Dynamic {
        fn describe(schema: &mut SchemaBuilder<Self>) {
            schema.field_with_type(ExcelField::new(0, "Blob"), "Vec<u8>", |d: &Dynamic| {
                d.0.get("blob")
                    .map(|v| FieldValue::Text(v.clone()))
                    .ok_or_else(|| "missing blob".to_string())
            });
        }
    }

    #[test]
    fn test_descriptors_ordered_by_index() {
        let table = FieldTable::<Product>::build().unwrap();
        let indexes: Vec<u32> = table.iter().map(|d| d.index()).collect();
        assert_eq!(indexes, vec![0, 2, 3, 5]);
        assert_eq!(table.headers(), vec!["SKU", "Price", "Stock", "Listed"]);

        let price = table.by_index(2).unwrap();
        assert_eq!(price.kind(), ScalarKind::Number);
        assert_eq!(price.format(), Some("0.00"));
        assert_eq!(price.align(), Align::Right);

        assert_eq!(table.by_index(3).unwrap().kind(), ScalarKind::Number);
        assert_eq!(table.by_index(5).unwrap().kind(), ScalarKind::Boolean);
        assert_eq!(table.by_index(0).unwrap().format(), None);
        assert!(table.by_index(1).is_none());
    }

    #[test]
    fn test_accessors_read_values() {
        let table = FieldTable::<Product>::build().unwrap();
        let product = Product {
            sku: "A-1".to_string(),
            price: 9.5,
            stock: None,
            listed: true,
        };
        let values: Vec<FieldValue> = table.iter().map(|d| d.read(&product).unwrap()).collect();
        assert_eq!(
            values,
            vec![
                FieldValue::Text("A-1".to_string()),
                FieldValue::Float(9.5),
                FieldValue::Null,
                FieldValue::Bool(true),
            ]
        );
    }

    #[test]
    fn test_cached_table_is_reused() {
        let first = FieldTable::<Cached>::get().unwrap();
        let second = FieldTable::<Cached>::get().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(CACHED_DESCRIBES.load(Ordering::SeqCst), 1);
        assert_eq!(first.by_index(0).unwrap().read(&Cached { id: 7 }), Ok(FieldValue::Int(7)));
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = FieldTable::<Product>::build().unwrap();
        let b = FieldTable::<Product>::build().unwrap();
        assert_eq!(format!("{:?}", a.descriptors), format!("{:?}", b.descriptors));
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let err = FieldTable::<Clash>::get().err().unwrap();
        assert!(err.is_schema_error());
        assert!(err.to_string().contains("duplicate column index 0"));
    }

    #[test]
    fn test_missing_header_or_index_rejected() {
        assert!(FieldTable::<Headless>::build().err().unwrap().is_schema_error());
        let err = FieldTable::<NoIndex>::build().err().unwrap();
        assert!(err.to_string().contains("no column index"));
    }

    #[test]
    fn test_unknown_type_name_rejected() {
        let err = FieldTable::<Dynamic>::build().err().unwrap();
        assert!(err.is_schema_error());
        assert!(err.to_string().contains("Vec<u8>"));
    }

    #[test]
    fn test_option_scalar_from_cell() {
        assert_eq!(Option::<i32>::from_cell(&CellValue::Empty), Some(None));
        assert_eq!(
            Option::<i32>::from_cell(&CellValue::Number(4.0)),
            Some(Some(4))
        );
        assert_eq!(i32::from_cell(&CellValue::Number(4.5)), None);
        assert_eq!(u64::from_cell(&CellValue::String("12".into())), Some(12));
        assert_eq!(
            NaiveDate::from_cell(&CellValue::String("2024-03-01".into())),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
    }
}
