use chrono::{DateTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;

pub fn chrono_to_bson(dt: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(dt.timestamp_millis())
}

/// BSON dates carry millisecond precision; values outside chrono's range clamp to the epoch.
pub fn bson_to_chrono(dt: BsonDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(dt.timestamp_millis()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_keeps_millisecond_precision() {
        let now = Utc::now();
        let restored = bson_to_chrono(chrono_to_bson(now));
        assert_eq!(restored.timestamp_millis(), now.timestamp_millis());
    }
}
