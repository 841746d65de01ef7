//! Export orders to a two-sheet workbook and read them back

use chrono::NaiveDate;
use excelmap::{
    export_writable, import_readable, Align, ExcelField, ExcelRecord, FromExcelRow, RecordRow,
    RowStyleTemplate, SchemaBuilder,
};

struct Order {
    number: u32,
    customer: String,
    placed: NaiveDate,
    total: f64,
    paid: bool,
    note: Option<String>,
}

impl ExcelRecord for Order {
    fn describe(schema: &mut SchemaBuilder<Self>) {
        schema
            .field(ExcelField::new(0, "Order #").with_align(Align::Center), |o: &Order| o.number)
            .field(ExcelField::new(1, "Customer"), |o: &Order| o.customer.clone())
            .field(
                ExcelField::new(2, "Placed").with_format("yyyy-mm-dd"),
                |o: &Order| o.placed,
            )
            .field(
                ExcelField::new(3, "Total")
                    .with_format("#,##0.00")
                    .with_align(Align::Right),
                |o: &Order| o.total,
            )
            .field(ExcelField::new(4, "Paid"), |o: &Order| o.paid)
            .field(ExcelField::new(6, "Note"), |o: &Order| o.note.clone());
    }
}

impl FromExcelRow for Order {
    fn from_row(row: &RecordRow<'_>) -> excelmap::Result<Self> {
        Ok(Order {
            number: row.get(0)?,
            customer: row.get(1)?,
            placed: row.get(2)?,
            total: row.get(3)?,
            paid: row.get(4)?,
            note: row.get(6)?,
        })
    }
}

fn orders(month: u32, count: u32) -> Vec<Order> {
    (1..=count)
        .map(|i| Order {
            number: month * 1000 + i,
            customer: format!("Customer {}", i),
            placed: NaiveDate::from_ymd_opt(2024, month, i.min(28)).unwrap_or_default(),
            total: i as f64 * 19.99,
            paid: i % 3 != 0,
            note: (i % 4 == 0).then(|| "gift wrap".to_string()),
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = "demos/orders.xlsx";
    let january = orders(1, 25);
    let february = orders(2, 40);

    let mut excel = export_writable::<Order>()
        .with_cell_width(18)
        .with_title_style(RowStyleTemplate::default_title().with_height(32.0));
    excel.add_named_sheet("January", &january)?;
    excel.add_named_sheet("February", &february)?;
    excel.write_to_path(path)?;
    println!("Wrote {} orders to {}", january.len() + february.len(), path);

    let mut readable = import_readable(path)?;
    for name in readable.sheet_names().to_vec() {
        let read: Vec<Order> = readable.read_sheet_by_name(&name)?;
        let unpaid = read.iter().filter(|o| !o.paid).count();
        let total: f64 = read.iter().map(|o| o.total).sum();
        println!(
            "{}: {} orders, {} unpaid, {:.2} total",
            name,
            read.len(),
            unpaid,
            total
        );
    }
    Ok(())
}
