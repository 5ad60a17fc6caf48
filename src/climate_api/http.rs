// climate_api - JSON API over the Hawaii climate observations dataset
//
// Copyright 2026 The climate_api developers
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::db::{ClimateDb, DbError, TempStats, TobsReading, DATE_FORMAT};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde_json::json;
use std::collections::BTreeMap;
use std::error;
use std::fmt;
use tower_http::trace::TraceLayer;

const WELCOME: &str = "Welcome to the Hawaii Climate API!\n\
Available Routes:\n\
/api/v1.0/precipitation\n\
/api/v1.0/stations\n\
/api/v1.0/tobs\n\
/api/v1.0/<start>\n\
/api/v1.0/<start>/<end>\n";

#[derive(Debug)]
pub enum ApiError {
    InvalidDate(String),
    Database(DbError),
    Worker(tokio::task::JoinError),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDate(raw) => write!(f, "invalid date {:?}, expected YYYY-MM-DD", raw),
            Self::Database(e) => write!(f, "{}", e),
            Self::Worker(e) => write!(f, "query worker failed: {}", e),
        }
    }
}

impl error::Error for ApiError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Database(e) => Some(e),
            Self::Worker(e) => Some(e),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidDate(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) | Self::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(message = "request failed", error = %self);
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the application router. The `ClimateDb` handle is the only shared
/// state and is never mutated after startup.
pub fn router(db: ClimateDb) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/api/v1.0/precipitation", get(precipitation))
        .route("/api/v1.0/stations", get(stations))
        .route("/api/v1.0/tobs", get(tobs))
        .route("/api/v1.0/:start", get(stats_from_start))
        .route("/api/v1.0/:start/:end", get(stats_for_range))
        .layer(TraceLayer::new_for_http())
        .with_state(db)
}

async fn welcome() -> &'static str {
    WELCOME
}

async fn precipitation(
    State(db): State<ClimateDb>,
) -> Result<Json<BTreeMap<String, Option<f64>>>, ApiError> {
    let by_date = run_query(db, |db| db.precipitation()).await?;
    Ok(Json(by_date))
}

async fn stations(State(db): State<ClimateDb>) -> Result<Json<Vec<String>>, ApiError> {
    let stations = run_query(db, |db| db.stations()).await?;
    Ok(Json(stations))
}

async fn tobs(State(db): State<ClimateDb>) -> Result<Json<Vec<TobsReading>>, ApiError> {
    let readings = run_query(db, |db| db.tobs()).await?;
    Ok(Json(readings))
}

async fn stats_from_start(
    State(db): State<ClimateDb>,
    Path(start): Path<String>,
) -> Result<Json<TempStats>, ApiError> {
    let start = parse_date_param(&start)?;
    let stats = run_query(db, move |db| db.temperature_stats(start, None)).await?;
    Ok(Json(stats))
}

async fn stats_for_range(
    State(db): State<ClimateDb>,
    Path((start, end)): Path<(String, String)>,
) -> Result<Json<TempStats>, ApiError> {
    let start = parse_date_param(&start)?;
    let end = parse_date_param(&end)?;
    let stats = run_query(db, move |db| db.temperature_stats(start, Some(end))).await?;
    Ok(Json(stats))
}

/// Run a blocking database query off the runtime worker threads. The rusqlite
/// driver is synchronous, so every handler goes through here.
async fn run_query<T, F>(db: ClimateDb, query: F) -> Result<T, ApiError>
where
    F: FnOnce(&ClimateDb) -> Result<T, DbError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || query(&db))
        .await
        .map_err(ApiError::Worker)?
        .map_err(ApiError::Database)
}

fn parse_date_param(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| ApiError::InvalidDate(raw.to_string()))
}
