//! Record types, table names and the row representation shared by the
//! store layer.

mod records;
mod row;
mod table;

pub use records::{Booking, Building, Price, Product, Record, TableBatch};
pub use row::{Row, RowKey, Value, DATE_FORMAT, TIMESTAMP_FORMAT};
pub use table::TableName;
