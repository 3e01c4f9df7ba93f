use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("malformed reading: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("field is not a finite number: {0}")]
    NonFinite(&'static str),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Ingestion message as sent by the device.
///
/// Every field is optional at this layer so that a missing value is reported
/// by name instead of as a generic decode failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingReading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    #[serde(default)]
    pub light: Option<f64>,
    #[serde(rename = "CH2O")]
    pub ch2o: Option<f64>,
    pub gas: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// A validated point-in-time observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub light: f64,
    pub tvoc: f64,
    pub smoke: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl IncomingReading {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Check required fields and assign `now` when the message carries no timestamp.
    pub fn validate(self, now: OffsetDateTime) -> Result<SensorReading, ValidationError> {
        let temperature = required("temperature", self.temperature)?;
        let humidity = required("humidity", self.humidity)?;
        let pressure = required("pressure", self.pressure)?;
        let tvoc = required("CH2O", self.ch2o)?;
        let smoke = required("gas", self.gas)?;
        let light = match self.light {
            Some(value) => finite("light", value)?,
            None => 0.0,
        };

        let timestamp = match self.timestamp.as_deref() {
            Some(raw) => OffsetDateTime::parse(raw, &Rfc3339)
                .map_err(|err| ValidationError::InvalidTimestamp(format!("{raw}: {err}")))?,
            None => now,
        }
        .to_offset(UtcOffset::UTC);

        Ok(SensorReading {
            temperature,
            humidity,
            pressure,
            light,
            tvoc,
            smoke,
            timestamp,
        })
    }
}

/// Parse and validate raw message bytes in one step.
pub fn parse_reading(bytes: &[u8], now: OffsetDateTime) -> Result<SensorReading, ValidationError> {
    IncomingReading::from_slice(bytes)?.validate(now)
}

fn required(field: &'static str, value: Option<f64>) -> Result<f64, ValidationError> {
    let value = value.ok_or(ValidationError::MissingField(field))?;
    finite(field, value)
}

fn finite(field: &'static str, value: f64) -> Result<f64, ValidationError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::NonFinite(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2026-01-11 12:30:00 UTC);

    #[test]
    fn full_message_maps_device_field_names() -> Result<(), Box<dyn std::error::Error>> {
        let body = br#"{"temperature":25.0,"humidity":50.0,"pressure":101.0,"light":10.0,"CH2O":0.05,"gas":20.0}"#;

        let reading = parse_reading(body, NOW)?;

        assert_eq!(reading.tvoc, 0.05);
        assert_eq!(reading.smoke, 20.0);
        assert_eq!(reading.light, 10.0);
        assert_eq!(reading.timestamp, NOW);
        Ok(())
    }

    #[test]
    fn light_defaults_to_zero() -> Result<(), Box<dyn std::error::Error>> {
        let body = br#"{"temperature":25.0,"humidity":50.0,"pressure":101.0,"CH2O":0.05,"gas":20.0}"#;

        let reading = parse_reading(body, NOW)?;

        assert_eq!(reading.light, 0.0);
        Ok(())
    }

    #[test]
    fn missing_gas_is_reported_by_device_name() {
        let body = br#"{"temperature":25.0,"humidity":50.0,"pressure":101.0,"CH2O":0.05}"#;

        let result = parse_reading(body, NOW);

        assert!(matches!(result, Err(ValidationError::MissingField("gas"))));
    }

    #[test]
    fn non_numeric_field_is_malformed() {
        let body = br#"{"temperature":"warm","humidity":50.0,"pressure":101.0,"CH2O":0.05,"gas":20.0}"#;

        let result = parse_reading(body, NOW);

        assert!(matches!(result, Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let result = parse_reading(b"not json", NOW);

        assert!(matches!(result, Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn supplied_timestamp_is_kept() -> Result<(), Box<dyn std::error::Error>> {
        let body = br#"{"temperature":25.0,"humidity":50.0,"pressure":101.0,"CH2O":0.05,"gas":20.0,"timestamp":"2026-01-10T08:00:00Z"}"#;

        let reading = parse_reading(body, NOW)?;

        assert_eq!(reading.timestamp, datetime!(2026-01-10 08:00:00 UTC));
        Ok(())
    }

    #[test]
    fn supplied_offset_is_normalised_to_utc() -> Result<(), Box<dyn std::error::Error>> {
        let body = br#"{"temperature":25.0,"humidity":50.0,"pressure":101.0,"CH2O":0.05,"gas":20.0,"timestamp":"2026-01-10T08:00:00+02:00"}"#;

        let reading = parse_reading(body, NOW)?;

        assert!(reading.timestamp.offset().is_utc());
        assert_eq!(reading.timestamp.hour(), 6);
        assert_eq!(reading.timestamp, datetime!(2026-01-10 06:00:00 UTC));
        Ok(())
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let body = br#"{"temperature":25.0,"humidity":50.0,"pressure":101.0,"CH2O":0.05,"gas":20.0,"timestamp":"yesterday"}"#;

        let result = parse_reading(body, NOW);

        assert!(matches!(result, Err(ValidationError::InvalidTimestamp(_))));
    }
}
