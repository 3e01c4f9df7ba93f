//! Short-horizon alarm forecasting.
//!
//! One random forest per alarm channel is trained on rolling features of the
//! stored history. The forecast then rolls forward by repeatedly predicting
//! from the mean of a sliding window of feature rows and appending that mean
//! as the next synthetic row. This is a cheap projection and the resulting
//! labels are not calibrated probabilities.

use crate::alarm::AlarmChannel;
use crate::store::{PersistedRecord, ReadingStore, StoreError};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub mod features;
pub mod forest;

use features::{DEFAULT_WINDOW, FEATURE_COUNT, FeatureRow, History};
use forest::{DEFAULT_TREES, RandomForest, train_test_split};

pub const DEFAULT_HORIZON: usize = 150;
pub const DEFAULT_STEP: Duration = Duration::from_secs(2);
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_TEST_FRACTION: f64 = 0.2;
pub const DEFAULT_MIN_HISTORY: usize = 5;

/// Channels with a threshold. Light is never raised and is not modelled.
pub const FORECAST_CHANNELS: [AlarmChannel; 5] = [
    AlarmChannel::Temp,
    AlarmChannel::Humidity,
    AlarmChannel::Pressure,
    AlarmChannel::Tvoc,
    AlarmChannel::Smoke,
];

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastConfig {
    pub horizon: usize,
    pub window: usize,
    pub trees: usize,
    pub seed: u64,
    pub test_fraction: f64,
    pub min_history: usize,
    pub step: Duration,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon: DEFAULT_HORIZON,
            window: DEFAULT_WINDOW,
            trees: DEFAULT_TREES,
            seed: DEFAULT_SEED,
            test_fraction: DEFAULT_TEST_FRACTION,
            min_history: DEFAULT_MIN_HISTORY,
            step: DEFAULT_STEP,
        }
    }
}

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("no history available to forecast from")]
    EmptyHistory,
    #[error("history too small to forecast: {actual} records, need {required}")]
    InsufficientHistory { required: usize, actual: usize },
    #[error("forecast horizon must be at least one step")]
    InvalidHorizon,
    #[error("failed to read history: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelForecast {
    /// Accuracy on the held-out split.
    pub accuracy: f64,
    pub predictions: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub horizon: usize,
    pub step_secs: u64,
    pub history_len: usize,
    pub channels: BTreeMap<AlarmChannel, ChannelForecast>,
}

impl Forecast {
    pub fn channel(&self, channel: AlarmChannel) -> Option<&ChannelForecast> {
        self.channels.get(&channel)
    }

    /// Seconds from forecast start of every step predicted to raise `channel`.
    pub fn alarm_offsets(&self, channel: AlarmChannel) -> Vec<u64> {
        self.channel(channel)
            .map(|forecast| {
                forecast
                    .predictions
                    .iter()
                    .enumerate()
                    .filter(|(_, raised)| **raised)
                    .map(|(step, _)| self.step_secs * step as u64)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Forecaster {
    config: ForecastConfig,
}

impl Forecaster {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Forecast from the store's committed history at call time.
    pub fn run(&self, store: &dyn ReadingStore) -> Result<Forecast, ForecastError> {
        self.run_on(store.scan()?)
    }

    pub fn run_on<I>(&self, records: I) -> Result<Forecast, ForecastError>
    where
        I: IntoIterator<Item = Result<PersistedRecord, StoreError>>,
    {
        if self.config.horizon == 0 {
            return Err(ForecastError::InvalidHorizon);
        }

        let history = History::from_records(records, self.config.window)?;
        if history.is_empty() {
            return Err(ForecastError::EmptyHistory);
        }
        let required = self.config.min_history.max(2);
        if history.len() < required {
            return Err(ForecastError::InsufficientHistory {
                required,
                actual: history.len(),
            });
        }

        let (train, test) =
            train_test_split(history.len(), self.config.test_fraction, self.config.seed);

        let mut models = BTreeMap::new();
        let mut accuracies = BTreeMap::new();
        for channel in FORECAST_CHANNELS {
            let labels: Vec<bool> = history.labels.iter().map(|flags| flags.get(channel)).collect();
            let model = RandomForest::fit(
                &history.rows,
                &labels,
                &train,
                self.config.trees,
                self.config.seed,
            );
            let accuracy = model.accuracy(&history.rows, &labels, &test);
            info!(channel = %channel, accuracy, "Alarm model trained");
            models.insert(channel, model);
            accuracies.insert(channel, accuracy);
        }

        let predictions = rollout(&history.rows, &models, self.config.horizon);
        let channels = predictions
            .into_iter()
            .map(|(channel, predictions)| {
                let accuracy = accuracies.get(&channel).copied().unwrap_or(0.0);
                (
                    channel,
                    ChannelForecast {
                        accuracy,
                        predictions,
                    },
                )
            })
            .collect();

        Ok(Forecast {
            horizon: self.config.horizon,
            step_secs: self.config.step.as_secs(),
            history_len: history.len(),
            channels,
        })
    }
}

/// Fixed-size dataset the rollout slides over. The synthetic row is the
/// column mean of whatever the window holds, recomputed at each step.
#[derive(Debug, Clone)]
struct SyntheticWindow {
    rows: VecDeque<FeatureRow>,
}

impl SyntheticWindow {
    fn new(rows: &[FeatureRow]) -> Self {
        Self {
            rows: rows.iter().copied().collect(),
        }
    }

    fn mean(&self) -> FeatureRow {
        let mut mean = [0.0; FEATURE_COUNT];
        if self.rows.is_empty() {
            return mean;
        }
        for row in &self.rows {
            for (slot, value) in mean.iter_mut().zip(row) {
                *slot += value;
            }
        }
        let count = self.rows.len() as f64;
        mean.map(|sum| sum / count)
    }

    fn advance(&mut self, row: FeatureRow) {
        self.rows.push_back(row);
        self.rows.pop_front();
    }
}

/// Every channel predicts from the same synthetic row at each step; the row is
/// then appended to the window and the oldest row dropped.
fn rollout(
    rows: &[FeatureRow],
    models: &BTreeMap<AlarmChannel, RandomForest>,
    horizon: usize,
) -> BTreeMap<AlarmChannel, Vec<bool>> {
    let mut window = SyntheticWindow::new(rows);
    let mut predictions: BTreeMap<AlarmChannel, Vec<bool>> = models
        .keys()
        .map(|channel| (*channel, Vec::with_capacity(horizon)))
        .collect();

    for step in 0..horizon {
        let synthetic = window.mean();
        for (channel, model) in models {
            if let Some(sequence) = predictions.get_mut(channel) {
                sequence.push(model.predict(&synthetic));
            }
        }
        window.advance(synthetic);
        debug!(step, "Synthetic step predicted");
    }

    predictions
}
