//! Typed records for the four ingested tables.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{Row, TableName};

/// A record type that can be written through the store layer.
pub trait Record: Clone + Send + Sync + 'static {
    /// The table this record belongs to.
    const TABLE: TableName;

    /// All columns, in storage order.
    const COLUMNS: &'static [&'static str];

    /// Converts the record into a table-agnostic row.
    fn to_row(&self) -> Row;
}

/// A building that hosts products.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    /// Building id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Building type (hotel, villa, ...).
    #[serde(rename = "type")]
    pub kind: String,
}

impl Record for Building {
    const TABLE: TableName = TableName::Buildings;
    const COLUMNS: &'static [&'static str] = &["id", "name", "type"];

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id.as_str())
            .with("name", self.name.as_str())
            .with("type", self.kind.as_str())
    }
}

/// A sellable room on a given arrival date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product id.
    pub id: String,
    /// Soft reference to [`Building::id`].
    pub building_id: String,
    /// Room name.
    pub room_name: String,
    /// Arrival date.
    pub arrival_date: NaiveDate,
    /// Number of beds.
    pub no_of_beds: u32,
    /// Room type (suite, double, ...).
    pub room_type: String,
    /// Quality grade.
    pub grade: i32,
    /// Whether the room has a private pool.
    pub private_pool: bool,
}

impl Record for Product {
    const TABLE: TableName = TableName::Products;
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "building_id",
        "room_name",
        "arrival_date",
        "no_of_beds",
        "room_type",
        "grade",
        "private_pool",
    ];

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id.as_str())
            .with("building_id", self.building_id.as_str())
            .with("room_name", self.room_name.as_str())
            .with("arrival_date", self.arrival_date)
            .with("no_of_beds", self.no_of_beds)
            .with("room_type", self.room_type.as_str())
            .with("grade", self.grade)
            .with("private_pool", self.private_pool)
    }
}

/// A booking made against a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking id.
    pub id: String,
    /// Soft reference to [`Product::id`].
    pub product_id: String,
    /// Arrival date.
    pub arrival_date: NaiveDate,
    /// Length of stay.
    pub nights: u32,
    /// Amount paid.
    pub price_paid: f64,
}

impl Record for Booking {
    const TABLE: TableName = TableName::Bookings;
    const COLUMNS: &'static [&'static str] =
        &["id", "product_id", "arrival_date", "nights", "price_paid"];

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", self.id.as_str())
            .with("product_id", self.product_id.as_str())
            .with("arrival_date", self.arrival_date)
            .with("nights", self.nights)
            .with("price_paid", self.price_paid)
    }
}

/// The current price of a product in one currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    /// Soft reference to [`Product::id`].
    pub product_id: String,
    /// ISO currency code.
    pub currency: String,
    /// Price value.
    pub value: f64,
    /// When the price was last changed upstream.
    pub last_updated: NaiveDateTime,
}

impl Record for Price {
    const TABLE: TableName = TableName::Prices;
    const COLUMNS: &'static [&'static str] = &["product_id", "currency", "value", "last_updated"];

    fn to_row(&self) -> Row {
        Row::new()
            .with("product_id", self.product_id.as_str())
            .with("currency", self.currency.as_str())
            .with("value", self.value)
            .with("last_updated", self.last_updated)
    }
}

/// One table's records for a single run.
#[derive(Debug, Clone, PartialEq)]
pub enum TableBatch {
    /// Building records.
    Buildings(Vec<Building>),
    /// Product records.
    Products(Vec<Product>),
    /// Booking records.
    Bookings(Vec<Booking>),
    /// Price records.
    Prices(Vec<Price>),
}

impl TableBatch {
    /// Returns the table this batch belongs to.
    #[must_use]
    pub const fn table(&self) -> TableName {
        match self {
            Self::Buildings(_) => TableName::Buildings,
            Self::Products(_) => TableName::Products,
            Self::Bookings(_) => TableName::Bookings,
            Self::Prices(_) => TableName::Prices,
        }
    }

    /// Returns an empty batch for a table.
    #[must_use]
    pub const fn empty(table: TableName) -> Self {
        match table {
            TableName::Buildings => Self::Buildings(Vec::new()),
            TableName::Products => Self::Products(Vec::new()),
            TableName::Bookings => Self::Bookings(Vec::new()),
            TableName::Prices => Self::Prices(Vec::new()),
        }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Buildings(v) => v.len(),
            Self::Products(v) => v.len(),
            Self::Bookings(v) => v.len(),
            Self::Prices(v) => v.len(),
        }
    }

    /// Returns true if the batch has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts every record into a row.
    #[must_use]
    pub fn rows(&self) -> Vec<Row> {
        match self {
            Self::Buildings(v) => v.iter().map(Record::to_row).collect(),
            Self::Products(v) => v.iter().map(Record::to_row).collect(),
            Self::Bookings(v) => v.iter().map(Record::to_row).collect(),
            Self::Prices(v) => v.iter().map(Record::to_row).collect(),
        }
    }

    /// Serializes every record as one JSON object per line.
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        fn lines<T: Serialize>(records: &[T]) -> Result<String, serde_json::Error> {
            let mut out = String::new();
            for record in records {
                out.push_str(&serde_json::to_string(record)?);
                out.push('\n');
            }
            Ok(out)
        }

        match self {
            Self::Buildings(v) => lines(v),
            Self::Products(v) => lines(v),
            Self::Bookings(v) => lines(v),
            Self::Prices(v) => lines(v),
        }
    }
}
