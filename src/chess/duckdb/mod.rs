pub mod bind_info_ffi;
pub mod scalar;
pub mod string;

use chrono::{Datelike, NaiveDate};
use libduckdb_sys::duckdb_date;

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// DuckDB `DATE` is days since the Unix epoch.
pub fn to_duckdb_date(date: NaiveDate) -> duckdb_date {
    duckdb_date {
        days: date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE,
    }
}
