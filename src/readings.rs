// src/readings.rs
//
// Typed view over stored sensor records, as shown on the dashboard: latest
// readings, per-metric assessment against growing ranges, and daily
// temperature averages for the trend chart.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::cipher::{is_encrypted, FieldCipher};
use crate::store::{QueryOptions, Record, RecordStore, StoreError, StoredRecord};

pub const TEMPERATURE_FIELD: &str = "temperature_reading";
pub const MOISTURE_FIELD: &str = "moisture_percentage";
pub const PH_FIELD: &str = "ph_reading";
pub const READING_DATE_FIELD: &str = "reading_date";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SensorReading {
    pub id: i64,
    /// Device-reported time, falling back to the storage time
    pub reading_date: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub moisture: Option<f64>,
    pub ph: Option<f64>,
}

impl SensorReading {
    /// Build from a stored record. Encrypted metric fields are opened with
    /// `cipher` when one is given and treated as missing otherwise.
    pub fn from_stored(record: &StoredRecord, cipher: Option<&FieldCipher>) -> Self {
        let metric = |field: &str| {
            record
                .fields
                .get(field)
                .and_then(|v| open_value(v, cipher))
                .and_then(|v| numeric(&v))
        };
        let reading_date = record
            .fields
            .get(READING_DATE_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(record.created_at);

        SensorReading {
            id: record.id,
            reading_date,
            temperature: metric(TEMPERATURE_FIELD),
            moisture: metric(MOISTURE_FIELD),
            ph: metric(PH_FIELD),
        }
    }
}

fn open_value(value: &Value, cipher: Option<&FieldCipher>) -> Option<Value> {
    if !is_encrypted(value) {
        return Some(value.clone());
    }
    let sealed = value.as_str()?;
    cipher?.decrypt_value(sealed).ok()
}

/// Numbers, or strings holding a number (some devices quote their values)
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Latest `limit` readings from `table`, newest first
pub async fn recent_readings(
    store: &dyn RecordStore,
    table: &str,
    limit: usize,
    cipher: Option<&FieldCipher>,
) -> Result<Vec<SensorReading>, StoreError> {
    let records = store
        .query(
            table,
            &Record::new(),
            &QueryOptions::latest(READING_DATE_FIELD, limit),
        )
        .await?;
    Ok(records
        .iter()
        .map(|r| SensorReading::from_stored(r, cipher))
        .collect())
}

/// Mean temperature per UTC day, oldest day first, rounded to 0.1.
/// Zero readings are treated as sensor glitches and skipped.
pub fn daily_temperature_averages(readings: &[SensorReading]) -> Vec<(NaiveDate, f64)> {
    let mut days: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for reading in readings {
        let Some(temp) = reading.temperature.filter(|t| *t != 0.0) else {
            continue;
        };
        let entry = days.entry(reading.reading_date.date_naive()).or_default();
        entry.0 += temp;
        entry.1 += 1;
    }
    days.into_iter()
        .map(|(day, (sum, count))| (day, (sum / count as f64 * 10.0).round() / 10.0))
        .collect()
}

// ============================================================================
// Assessment
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Temperature,
    Moisture,
    Ph,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Optimal,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Assessment {
    pub metric: Metric,
    pub value: f64,
    pub level: Level,
    /// "optimal", "too low", "too dry", "too acidic", ...
    pub status: &'static str,
    pub recommendation: &'static str,
}

impl Metric {
    /// Inclusive optimal range
    pub fn optimal_range(&self) -> (f64, f64) {
        match self {
            Metric::Temperature => (20.0, 30.0),
            Metric::Moisture => (30.0, 70.0),
            Metric::Ph => (6.0, 7.5),
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Temperature => "°C",
            Metric::Moisture => "%",
            Metric::Ph => "pH",
        }
    }

    fn describe(&self, level: Level) -> (&'static str, &'static str) {
        match (self, level) {
            (Metric::Temperature, Level::Optimal) => {
                ("optimal", "Temperature is within ideal range.")
            }
            (Metric::Temperature, Level::Low) => (
                "too low",
                "Consider increasing temperature for better growth.",
            ),
            (Metric::Temperature, Level::High) => (
                "too high",
                "Consider cooling or ventilation to reduce temperature.",
            ),
            (Metric::Moisture, Level::Optimal) => ("optimal", "Moisture level is ideal."),
            (Metric::Moisture, Level::Low) => ("too dry", "Increase watering or humidity."),
            (Metric::Moisture, Level::High) => {
                ("too wet", "Reduce watering and improve drainage.")
            }
            (Metric::Ph, Level::Optimal) => ("optimal", "pH level is within ideal range."),
            (Metric::Ph, Level::Low) => ("too acidic", "Add lime or wood ash to increase pH."),
            (Metric::Ph, Level::High) => (
                "too alkaline",
                "Add sulfur or organic matter to decrease pH.",
            ),
        }
    }
}

pub fn assess(metric: Metric, value: f64) -> Assessment {
    let (low, high) = metric.optimal_range();
    let level = if value < low {
        Level::Low
    } else if value > high {
        Level::High
    } else {
        Level::Optimal
    };
    let (status, recommendation) = metric.describe(level);
    Assessment {
        metric,
        value,
        level,
        status,
        recommendation,
    }
}

/// Assessments for every metric present in a reading
pub fn assess_reading(reading: &SensorReading) -> Vec<Assessment> {
    [
        (Metric::Temperature, reading.temperature),
        (Metric::Moisture, reading.moisture),
        (Metric::Ph, reading.ph),
    ]
    .into_iter()
    .filter_map(|(metric, value)| value.map(|v| assess(metric, v)))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use serde_json::json;

    fn stored(id: i64, fields: Value) -> StoredRecord {
        StoredRecord {
            id,
            created_at: DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            fields: fields.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_assessment_ranges() {
        assert_eq!(assess(Metric::Temperature, 24.5).status, "optimal");
        assert_eq!(assess(Metric::Temperature, 19.9).status, "too low");
        assert_eq!(assess(Metric::Temperature, 30.1).level, Level::High);
        assert_eq!(assess(Metric::Moisture, 30.0).level, Level::Optimal);
        assert_eq!(assess(Metric::Moisture, 71.0).status, "too wet");
        assert_eq!(assess(Metric::Ph, 5.5).status, "too acidic");
        assert_eq!(assess(Metric::Ph, 7.5).level, Level::Optimal);
        assert_eq!(
            assess(Metric::Ph, 8.0).recommendation,
            "Add sulfur or organic matter to decrease pH."
        );
    }

    #[test]
    fn test_reading_accepts_numeric_strings() {
        let reading = SensorReading::from_stored(
            &stored(
                3,
                json!({
                    "temperature_reading": "23.4",
                    "moisture_percentage": 55,
                    "ph_reading": "n/a",
                    "reading_date": "2024-06-02T08:30:00Z"
                }),
            ),
            None,
        );
        assert_eq!(reading.temperature, Some(23.4));
        assert_eq!(reading.moisture, Some(55.0));
        assert_eq!(reading.ph, None);
        assert_eq!(reading.reading_date.to_rfc3339(), "2024-06-02T08:30:00+00:00");
        assert_eq!(assess_reading(&reading).len(), 2);
    }

    #[test]
    fn test_reading_date_falls_back_to_created_at() {
        let reading = SensorReading::from_stored(&stored(1, json!({"reading_date": "soon"})), None);
        assert_eq!(reading.reading_date.to_rfc3339(), "2024-06-01T12:00:00+00:00");
    }

    #[test]
    fn test_encrypted_metric_needs_cipher() {
        let cipher = FieldCipher::new(&[4u8; 32]);
        let sealed = cipher.encrypt_value(&json!(6.7)).unwrap();
        let record = stored(1, json!({"ph_reading": sealed}));

        assert_eq!(SensorReading::from_stored(&record, None).ph, None);
        assert_eq!(SensorReading::from_stored(&record, Some(&cipher)).ph, Some(6.7));
    }

    #[test]
    fn test_daily_averages() {
        let at = |s: &str| DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);
        let reading = |id, date: &str, temp| SensorReading {
            id,
            reading_date: at(date),
            temperature: temp,
            moisture: None,
            ph: None,
        };
        let averages = daily_temperature_averages(&[
            reading(1, "2024-06-02T10:00:00Z", Some(25.0)),
            reading(2, "2024-06-01T10:00:00Z", Some(22.0)),
            reading(3, "2024-06-01T18:00:00Z", Some(23.15)),
            reading(4, "2024-06-01T19:00:00Z", Some(0.0)),
            reading(5, "2024-06-03T10:00:00Z", None),
        ]);
        assert_eq!(
            averages,
            vec![
                (NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), 22.6),
                (NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(), 25.0),
            ]
        );
    }

    #[tokio::test]
    async fn test_recent_readings_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (date, temp) in [
            ("2024-06-01T00:00:00Z", 21.0),
            ("2024-06-03T00:00:00Z", 23.0),
            ("2024-06-02T00:00:00Z", 22.0),
        ] {
            let record = json!({"reading_date": date, "temperature_reading": temp});
            store
                .insert("sensor_data", record.as_object().unwrap())
                .await
                .unwrap();
        }

        let readings = recent_readings(&store, "sensor_data", 2, None).await.unwrap();
        let temps: Vec<Option<f64>> = readings.iter().map(|r| r.temperature).collect();
        assert_eq!(temps, vec![Some(23.0), Some(22.0)]);
    }
}
