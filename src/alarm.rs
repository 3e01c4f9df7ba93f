//! Fixed-threshold alarm classification.
//!
//! Flags are derived once at ingestion and stored with the reading; they are
//! never recomputed for records already persisted.

use crate::reading::SensorReading;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TEMPERATURE_MIN: f64 = 10.0;
pub const TEMPERATURE_MAX: f64 = 30.0;
pub const HUMIDITY_MIN: f64 = 40.0;
pub const PRESSURE_MIN: f64 = 100.0;
pub const TVOC_MAX: f64 = 0.1;
pub const SMOKE_MAX: f64 = 35.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlarmChannel {
    #[serde(rename = "temp_alarm")]
    Temp,
    #[serde(rename = "humidity_alarm")]
    Humidity,
    #[serde(rename = "pressure_alarm")]
    Pressure,
    #[serde(rename = "light_alarm")]
    Light,
    #[serde(rename = "tvoc_alarm")]
    Tvoc,
    #[serde(rename = "smoke_alarm")]
    Smoke,
}

impl AlarmChannel {
    pub const ALL: [AlarmChannel; 6] = [
        AlarmChannel::Temp,
        AlarmChannel::Humidity,
        AlarmChannel::Pressure,
        AlarmChannel::Light,
        AlarmChannel::Tvoc,
        AlarmChannel::Smoke,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AlarmChannel::Temp => "temp_alarm",
            AlarmChannel::Humidity => "humidity_alarm",
            AlarmChannel::Pressure => "pressure_alarm",
            AlarmChannel::Light => "light_alarm",
            AlarmChannel::Tvoc => "tvoc_alarm",
            AlarmChannel::Smoke => "smoke_alarm",
        }
    }
}

impl fmt::Display for AlarmChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmFlags {
    pub temp: bool,
    pub humidity: bool,
    pub pressure: bool,
    pub light: bool,
    pub tvoc: bool,
    pub smoke: bool,
}

impl AlarmFlags {
    pub fn classify(reading: &SensorReading) -> Self {
        Self {
            temp: reading.temperature < TEMPERATURE_MIN || reading.temperature > TEMPERATURE_MAX,
            humidity: reading.humidity < HUMIDITY_MIN,
            pressure: reading.pressure < PRESSURE_MIN,
            // No threshold is configured for light.
            light: false,
            tvoc: reading.tvoc > TVOC_MAX,
            smoke: reading.smoke > SMOKE_MAX,
        }
    }

    pub fn get(&self, channel: AlarmChannel) -> bool {
        match channel {
            AlarmChannel::Temp => self.temp,
            AlarmChannel::Humidity => self.humidity,
            AlarmChannel::Pressure => self.pressure,
            AlarmChannel::Light => self.light,
            AlarmChannel::Tvoc => self.tvoc,
            AlarmChannel::Smoke => self.smoke,
        }
    }

    pub fn any(&self) -> bool {
        AlarmChannel::ALL.iter().any(|channel| self.get(*channel))
    }

    /// Channels currently raised, in declaration order.
    pub fn raised(&self) -> Vec<AlarmChannel> {
        AlarmChannel::ALL
            .into_iter()
            .filter(|channel| self.get(*channel))
            .collect()
    }
}
