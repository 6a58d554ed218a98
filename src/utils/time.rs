/// Date helpers shared by the provider clients
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

/// Convert a millisecond UNIX timestamp to its UTC calendar date.
pub fn date_from_millis(ms: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}

/// Millisecond UNIX timestamp for midnight UTC of `date`.
pub fn millis_at_midnight(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Today's date in UTC.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}
