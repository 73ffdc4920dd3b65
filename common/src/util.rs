use std::cmp::Ordering;

use log::LevelFilter;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use time::{
    format_description::{self, FormatItem},
    OffsetDateTime, UtcOffset,
};

pub static TIME_FORMAT: Lazy<Vec<FormatItem<'static>>> = Lazy::new(|| {
    format_description::parse("[hour repr:24]:[minute]:[second]")
        .expect("Invalid time format description")
});

pub static DATE_FORMAT: Lazy<Vec<FormatItem<'static>>> =
    Lazy::new(|| format_description::parse("[year]-[month]-[day]").expect("Invalid date format"));

/// The current time in the machine's local offset, or UTC if the offset can't be determined.
pub fn local_now() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    match UtcOffset::current_local_offset() {
        Ok(offset) => now.to_offset(offset),
        Err(_) => now,
    }
}

/// Formats a fractional return as a percentage with two decimals, e.g. `0.0123` as `1.23%`.
pub fn percent(value: f64) -> String {
    format!("{:.2}%", value * 100.0)
}

#[derive(Clone, Copy, Debug)]
pub struct TotalF64(pub f64);

impl PartialEq for TotalF64 {
    fn eq(&self, other: &Self) -> bool {
        f64::total_cmp(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for TotalF64 {}

impl PartialOrd for TotalF64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF64 {
    fn cmp(&self, other: &Self) -> Ordering {
        f64::total_cmp(&self.0, &other.0)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(remote = "LevelFilter")]
pub enum SerdeLevelFilter {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}
