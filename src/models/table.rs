use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "table_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Free,
    Occupied,
    Reserved,
    Maintenance,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Occupied => "occupied",
            Self::Reserved => "reserved",
            Self::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "table_category", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableCategory {
    Standard,
    /// Window or private seating.
    Premium,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Table {
    pub id: i64,
    pub number: i32,
    pub capacity: i32,
    pub category: TableCategory,
    pub status: TableStatus,
}

impl Table {
    /// Whether the table can seat `party_size` at all, ignoring its bookings.
    ///
    /// Only maintenance takes a table out of the pool; `Occupied` and
    /// `Reserved` describe the dining room right now, not a future slot.
    pub fn accepts(&self, party_size: i32) -> bool {
        self.status != TableStatus::Maintenance && self.capacity >= party_size
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table {} (capacity {})", self.number, self.capacity)
    }
}
