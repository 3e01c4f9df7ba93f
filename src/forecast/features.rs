//! Rolling feature extraction over the stored history.

use crate::alarm::AlarmFlags;
use crate::reading::SensorReading;
use crate::store::{PersistedRecord, StoreError};
use std::collections::VecDeque;
use time::OffsetDateTime;

pub const DEFAULT_WINDOW: usize = 5;
pub const FEATURE_COUNT: usize = 7;
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "temperature_roll",
    "humidity_roll",
    "pressure_roll",
    "light_roll",
    "tvoc_roll",
    "smoke_roll",
    "time_diff",
];

const MEASUREMENTS: usize = 6;

pub type FeatureRow = [f64; FEATURE_COUNT];

/// Trailing means over the last `window` readings plus the inter-arrival gap.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    window: usize,
    recent: VecDeque<[f64; MEASUREMENTS]>,
    previous: Option<OffsetDateTime>,
}

impl RollingWindow {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            recent: VecDeque::with_capacity(window),
            previous: None,
        }
    }

    pub fn push(&mut self, reading: &SensorReading) -> FeatureRow {
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(measurements(reading));

        let count = self.recent.len() as f64;
        let mut row = [0.0; FEATURE_COUNT];
        for values in &self.recent {
            for (slot, value) in row.iter_mut().zip(values) {
                *slot += value;
            }
        }
        for slot in row.iter_mut().take(MEASUREMENTS) {
            *slot /= count;
        }

        row[MEASUREMENTS] = match self.previous {
            Some(previous) => (reading.timestamp - previous).as_seconds_f64(),
            None => 0.0,
        };
        self.previous = Some(reading.timestamp);
        row
    }
}

fn measurements(reading: &SensorReading) -> [f64; MEASUREMENTS] {
    [
        reading.temperature,
        reading.humidity,
        reading.pressure,
        reading.light,
        reading.tvoc,
        reading.smoke,
    ]
}

/// Feature rows and the alarm labels recorded for each of them.
#[derive(Debug, Clone, Default)]
pub struct History {
    pub rows: Vec<FeatureRow>,
    pub labels: Vec<AlarmFlags>,
}

impl History {
    pub fn from_records<I>(records: I, window: usize) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = Result<PersistedRecord, StoreError>>,
    {
        let mut rolling = RollingWindow::new(window);
        let mut history = History::default();
        for record in records {
            let record = record?;
            history.rows.push(rolling.push(&record.reading));
            history.labels.push(record.alarms);
        }
        Ok(history)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn reading_at(temperature: f64, seconds: i64) -> SensorReading {
        SensorReading {
            temperature,
            humidity: 50.0,
            pressure: 101.0,
            light: 0.0,
            tvoc: 0.05,
            smoke: 20.0,
            timestamp: OffsetDateTime::UNIX_EPOCH + Duration::seconds(seconds),
        }
    }

    #[test]
    fn first_row_uses_single_value_and_zero_gap() {
        let mut window = RollingWindow::new(DEFAULT_WINDOW);

        let row = window.push(&reading_at(20.0, 0));

        assert_eq!(row[0], 20.0);
        assert_eq!(row[6], 0.0);
    }

    #[test]
    fn mean_covers_only_the_last_five() {
        let mut window = RollingWindow::new(DEFAULT_WINDOW);
        let mut row = [0.0; FEATURE_COUNT];
        for (i, temperature) in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0].into_iter().enumerate() {
            row = window.push(&reading_at(temperature, 2 * i as i64));
        }

        // (20 + 30 + 40 + 50 + 60) / 5
        assert_eq!(row[0], 40.0);
        assert_eq!(row[1], 50.0);
        assert_eq!(row[6], 2.0);
    }

    #[test]
    fn gap_follows_record_order_not_clock_order() {
        let mut window = RollingWindow::new(DEFAULT_WINDOW);
        window.push(&reading_at(20.0, 10));

        let row = window.push(&reading_at(20.0, 7));

        assert_eq!(row[6], -3.0);
    }
}
