use crate::api::responses::{
    ErrorResponse, HealthResponseBody, HealthStatus, LatestReadingResponse,
};
use crate::broadcast::SENSOR_DATA_EVENT;
use crate::error::{ACCEPTED_MESSAGE, AppError};
use crate::state::AppState;
use crate::store::{PersistedRecord, ReadingStore, StoreError};
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::fmt;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use tokio_stream::{Stream, StreamExt};
use tracing::{error, warn};

const NO_DATA_MESSAGE: &str = "No data available";
const RETRIEVE_FAILED_MESSAGE: &str = "Failed to retrieve data";
const LATEST_TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
        }
    }
}

// Ingestion

pub async fn receive_data(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    ingest_response(state.ingestor().ingest(&body).await)
}

/// Status and plain-text body for the outcome of one ingestion.
pub fn ingest_response(result: Result<PersistedRecord, AppError>) -> (StatusCode, &'static str) {
    match result {
        Ok(_) => (StatusCode::OK, ACCEPTED_MESSAGE),
        Err(err) => (err.status_code(), err.client_message()),
    }
}

// Latest reading

pub enum LatestResponse {
    Success(LatestReadingResponse),
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl IntoResponse for LatestResponse {
    fn into_response(self) -> Response {
        match self {
            LatestResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            LatestResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

pub async fn get_latest_data(State(state): State<AppState>) -> impl IntoResponse {
    build_latest_response(state.store())
}

fn build_latest_response(store: &dyn ReadingStore) -> LatestResponse {
    let record = match store.latest() {
        Ok(record) => record,
        Err(StoreError::Empty) => {
            return latest_error(StatusCode::NOT_FOUND, NO_DATA_MESSAGE);
        }
        Err(err) => {
            error!(error = %err, "Failed to read latest record");
            return latest_error(StatusCode::INTERNAL_SERVER_ERROR, RETRIEVE_FAILED_MESSAGE);
        }
    };

    let timestamp = match record.reading.timestamp.format(LATEST_TIMESTAMP_FORMAT) {
        Ok(formatted) => formatted,
        Err(err) => {
            error!(error = %TimestampError::Format(err), id = record.id, "Failed to format record timestamp");
            return latest_error(StatusCode::INTERNAL_SERVER_ERROR, RETRIEVE_FAILED_MESSAGE);
        }
    };

    let reading = record.reading;
    LatestResponse::Success(LatestReadingResponse {
        temperature: reading.temperature,
        humidity: reading.humidity,
        pressure: reading.pressure,
        light: reading.light,
        tvoc: reading.tvoc,
        smoke: reading.smoke,
        timestamp,
    })
}

fn latest_error(status: StatusCode, message: &str) -> LatestResponse {
    LatestResponse::Error {
        status,
        body: ErrorResponse {
            error: message.to_string(),
        },
    }
}

// Live events

pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster().subscribe();
    let subscriber = subscription.id();
    let stream = subscription.into_stream().filter_map(move |payload| {
        match Event::default().event(SENSOR_DATA_EVENT).json_data(&payload) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                warn!(subscriber, error = %err, "Failed to encode sensor_data event");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// Health

pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    build_health_response(&state, OffsetDateTime::now_utc())
}

fn build_health_response(state: &AppState, now: OffsetDateTime) -> (StatusCode, Json<HealthResponseBody>) {
    let records = match state.store().len() {
        Ok(count) => Some(count),
        Err(err) => {
            error!(error = %err, "Failed to count stored records");
            None
        }
    };
    let status = if records.is_some() {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    };

    let timestamp = format_timestamp(now).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format health timestamp");
        "1970-01-01T00:00:00Z".to_string()
    });

    let status_code = match status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status_code,
        Json(HealthResponseBody {
            status,
            records,
            subscribers: state.broadcaster().subscriber_count(),
            timestamp,
        }),
    )
}

fn format_timestamp(timestamp: OffsetDateTime) -> Result<String, TimestampError> {
    timestamp.format(&Rfc3339).map_err(TimestampError::Format)
}
