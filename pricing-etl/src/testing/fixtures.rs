//! Record fixtures.

use chrono::{NaiveDate, NaiveDateTime};

use crate::model::{Booking, Building, Price, Product};
use crate::source::MemorySource;

/// Builds a date.
///
/// # Panics
///
/// Panics on an invalid calendar day.
#[must_use]
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_else(|| {
        panic!("invalid fixture date {year}-{month}-{day}")
    })
}

/// Builds a timestamp on 2024-06-01 at the given hour.
///
/// # Panics
///
/// Panics if `hour` is not below 24.
#[must_use]
pub fn at_hour(hour: u32) -> NaiveDateTime {
    date(2024, 6, 1)
        .and_hms_opt(hour, 0, 0)
        .unwrap_or_else(|| panic!("invalid fixture hour {hour}"))
}

/// A hotel building.
#[must_use]
pub fn building(id: &str) -> Building {
    Building {
        id: id.to_string(),
        name: format!("Building {id}"),
        kind: "hotel".to_string(),
    }
}

/// Builder for product fixtures.
///
/// Defaults to a two-bed grade 5 suite with a private pool arriving on
/// 2024-06-01 in building `B1`.
#[derive(Debug, Clone)]
pub struct ProductBuilder {
    product: Product,
}

impl ProductBuilder {
    /// Starts a product with the given id.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            product: Product {
                id: id.to_string(),
                building_id: "B1".to_string(),
                room_name: format!("Room {id}"),
                arrival_date: date(2024, 6, 1),
                no_of_beds: 2,
                room_type: "suite".to_string(),
                grade: 5,
                private_pool: true,
            },
        }
    }

    /// Sets the arrival date.
    #[must_use]
    pub fn arrival(mut self, arrival: NaiveDate) -> Self {
        self.product.arrival_date = arrival;
        self
    }

    /// Sets the room type.
    #[must_use]
    pub fn room_type(mut self, room_type: &str) -> Self {
        self.product.room_type = room_type.to_string();
        self
    }

    /// Sets the bed count.
    #[must_use]
    pub fn beds(mut self, beds: u32) -> Self {
        self.product.no_of_beds = beds;
        self
    }

    /// Sets the grade.
    #[must_use]
    pub fn grade(mut self, grade: i32) -> Self {
        self.product.grade = grade;
        self
    }

    /// Sets the private pool flag.
    #[must_use]
    pub fn private_pool(mut self, private_pool: bool) -> Self {
        self.product.private_pool = private_pool;
        self
    }

    /// Sets the building.
    #[must_use]
    pub fn building(mut self, building_id: &str) -> Self {
        self.product.building_id = building_id.to_string();
        self
    }

    /// Returns the product.
    #[must_use]
    pub fn build(self) -> Product {
        self.product
    }
}

/// A default product (see [`ProductBuilder`]).
#[must_use]
pub fn product(id: &str) -> Product {
    ProductBuilder::new(id).build()
}

/// A one-night booking of a product.
#[must_use]
pub fn booking(id: &str, product_id: &str) -> Booking {
    Booking {
        id: id.to_string(),
        product_id: product_id.to_string(),
        arrival_date: date(2024, 6, 1),
        nights: 1,
        price_paid: 250.0,
    }
}

/// A price row.
#[must_use]
pub fn price(product_id: &str, currency: &str, value: f64, last_updated: NaiveDateTime) -> Price {
    Price {
        product_id: product_id.to_string(),
        currency: currency.to_string(),
        value,
        last_updated,
    }
}

/// A small, fully consistent snapshot of all four tables.
///
/// P1 and P2 share a cluster, P3 is a double room in its own cluster and
/// booking K4 references a product that is not in the snapshot.
#[must_use]
pub fn sample_source() -> MemorySource {
    MemorySource::new()
        .with_buildings(vec![building("B1"), building("B2")])
        .with_products(vec![
            product("P1"),
            product("P2"),
            ProductBuilder::new("P3")
                .building("B2")
                .room_type("double")
                .beds(1)
                .grade(3)
                .private_pool(false)
                .build(),
        ])
        .with_bookings(vec![
            booking("K1", "P1"),
            booking("K2", "P2"),
            booking("K3", "P3"),
            booking("K4", "P404"),
        ])
        .with_prices(vec![
            price("P1", "USD", 100.0, at_hour(9)),
            price("P1", "EUR", 92.0, at_hour(9)),
            price("P2", "USD", 110.0, at_hour(9)),
        ])
}
