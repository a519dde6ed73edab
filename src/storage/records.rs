use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

const SECOND_ID_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day]_[hour][minute][second]");
const MILLISECOND_ID_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year][month][day]_[hour][minute][second]_[subsecond digits:3]");

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Major,
    Minor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccidentRecord {
    pub time: String,
    pub location: GeoPoint,
    pub severity: Severity,
    pub ai_conf: f64,
    pub er_informed: bool,
    pub er_dispatched: bool,
    pub patient_rec: bool,
    pub real: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficDensityRecord {
    pub time: String,
    pub location: GeoPoint,
    pub density: u32,
}

pub fn format_time(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.format(&Rfc3339)
}

/// `YYYYMMDD_HHMMSS` in UTC.
pub fn traffic_document_id(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.to_offset(time::UtcOffset::UTC).format(SECOND_ID_FORMAT)
}

/// `YYYYMMDD_HHMMSS_mmm_<lat>_<lng>` in UTC, unique per episode start.
pub fn accident_document_id(
    at: OffsetDateTime,
    location: GeoPoint,
) -> Result<String, time::error::Format> {
    let stamp = at.to_offset(time::UtcOffset::UTC).format(MILLISECOND_ID_FORMAT)?;
    Ok(format!("{stamp}_{}_{}", location.latitude, location.longitude))
}
