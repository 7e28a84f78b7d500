use chrono::Utc;

pub struct GroupTime;

impl GroupTime {
    pub fn now_nanos() -> i64 {
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    }
}
