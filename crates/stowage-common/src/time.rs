use chrono::{DateTime, SecondsFormat, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// `YYYY-mm-ddTHH:MM:SS.fffZ`, e.g. `2020-09-18T00:31:33.328Z`.
pub fn to_serialized_date(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
