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

use chrono::{Duration, NaiveDate};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const STATION_TABLE: &str = "station";
const MEASUREMENT_TABLE: &str = "measurement";

const STATION_COLUMN: &str = "station";
const DATE_COLUMN: &str = "date";
const PRCP_COLUMN: &str = "prcp";
const TOBS_COLUMN: &str = "tobs";

/// Dates are stored as TEXT in the database, so lexicographic order is
/// chronological order.
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

const OBSERVATION_WINDOW_DAYS: i64 = 365;

#[derive(Debug)]
pub enum DbError {
    Open(rusqlite::Error),
    Query(rusqlite::Error),
    MissingTable(String),
    MissingColumn(String, String),
    BadDate(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(e) => write!(f, "unable to open database: {}", e),
            Self::Query(e) => write!(f, "{}", e),
            Self::MissingTable(table) => write!(f, "missing table {}", table),
            Self::MissingColumn(table, column) => write!(f, "missing column {}.{}", table, column),
            Self::BadDate(raw) => write!(f, "unparseable date {:?} in measurement data", raw),
        }
    }
}

impl error::Error for DbError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Open(e) | Self::Query(e) => Some(e),
            _ => None,
        }
    }
}

/// A table that exists in the backing database along with the columns it was
/// reflected with at startup.
#[derive(Debug, Clone)]
pub struct TableHandle {
    name: String,
    columns: Vec<String>,
}

impl TableHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub station: TableHandle,
    pub measurement: TableHandle,
}

/// Minimum, average, and maximum temperature over some date range. All fields
/// are null when no measurements fall inside the range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TempStats {
    #[serde(rename = "TMIN")]
    pub tmin: Option<f64>,
    #[serde(rename = "TAVG")]
    pub tavg: Option<f64>,
    #[serde(rename = "TMAX")]
    pub tmax: Option<f64>,
}

/// A single temperature observation that serializes as a one-entry JSON
/// object, `{"2017-01-01": 72.0}`. Rows sharing a date stay distinct.
#[derive(Debug, Clone, PartialEq)]
pub struct TobsReading {
    pub date: String,
    pub tobs: Option<f64>,
}

impl Serialize for TobsReading {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.date, &self.tobs)?;
        map.end()
    }
}

/// Read-only access to the climate observations database.
///
/// `open()` reflects the schema once; the resulting value is immutable and
/// cheap to clone into request handlers. Every query method opens its own
/// connection, scoped to the call, so nothing is shared between requests.
#[derive(Debug, Clone)]
pub struct ClimateDb {
    path: Arc<PathBuf>,
    schema: Arc<Schema>,
}

impl ClimateDb {
    /// Open the database at `path` and reflect its schema, verifying that the
    /// station and measurement tables exist with the columns this service
    /// reads. The file itself is only opened read-only, never created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        let conn = Self::connect(&path)?;

        let station = reflect_table(&conn, STATION_TABLE, &[STATION_COLUMN])?;
        let measurement = reflect_table(
            &conn,
            MEASUREMENT_TABLE,
            &[STATION_COLUMN, DATE_COLUMN, PRCP_COLUMN, TOBS_COLUMN],
        )?;

        tracing::debug!(
            message = "reflected database schema",
            station_columns = station.columns().len(),
            measurement_columns = measurement.columns().len(),
        );

        Ok(ClimateDb {
            path: Arc::new(path),
            schema: Arc::new(Schema { station, measurement }),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn connect(path: &Path) -> Result<Connection, DbError> {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(DbError::Open)
    }

    fn connection(&self) -> Result<Connection, DbError> {
        Self::connect(&self.path)
    }

    /// Precipitation by date over the final year of data, keyed by date. For a
    /// date observed by several stations the greatest station code wins.
    /// An entirely empty measurement table yields an empty map.
    pub fn precipitation(&self) -> Result<BTreeMap<String, Option<f64>>, DbError> {
        let conn = self.connection()?;
        let cutoff = match self.observation_cutoff(&conn)? {
            Some(cutoff) => cutoff,
            None => return Ok(BTreeMap::new()),
        };

        tracing::debug!(message = "querying precipitation window", cutoff = %cutoff);

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {date}, {prcp} FROM {table} WHERE {date} >= ?1 ORDER BY {date} ASC, {station} ASC",
                date = DATE_COLUMN,
                prcp = PRCP_COLUMN,
                table = self.schema.measurement.name(),
                station = STATION_COLUMN,
            ))
            .map_err(DbError::Query)?;
        let rows = stmt
            .query_map(params![cutoff.format(DATE_FORMAT).to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<f64>>(1)?))
            })
            .map_err(DbError::Query)?;

        let mut by_date = BTreeMap::new();
        for row in rows {
            let (date, prcp) = row.map_err(DbError::Query)?;
            by_date.insert(date, prcp);
        }

        Ok(by_date)
    }

    /// All station codes, one per row of the station table, sorted.
    pub fn stations(&self) -> Result<Vec<String>, DbError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {station} FROM {table} ORDER BY {station} ASC",
                station = STATION_COLUMN,
                table = self.schema.station.name(),
            ))
            .map_err(DbError::Query)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(DbError::Query)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::Query)
    }

    /// The station with the most measurement rows. Ties go to the lowest
    /// station code.
    pub fn most_active_station(&self) -> Result<Option<String>, DbError> {
        let conn = self.connection()?;
        self.most_active_station_in(&conn)
    }

    fn most_active_station_in(&self, conn: &Connection) -> Result<Option<String>, DbError> {
        conn.query_row(
            &format!(
                "SELECT {station} FROM {table} GROUP BY {station} ORDER BY COUNT(*) DESC, {station} ASC LIMIT 1",
                station = STATION_COLUMN,
                table = self.schema.measurement.name(),
            ),
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(DbError::Query)
    }

    /// Temperature observations for the most active station over the final
    /// year of data, in date order. Empty when the measurement table is empty.
    pub fn tobs(&self) -> Result<Vec<TobsReading>, DbError> {
        let conn = self.connection()?;
        let cutoff = match self.observation_cutoff(&conn)? {
            Some(cutoff) => cutoff,
            None => return Ok(Vec::new()),
        };
        let station = match self.most_active_station_in(&conn)? {
            Some(station) => station,
            None => return Ok(Vec::new()),
        };

        tracing::debug!(
            message = "querying temperature observations",
            station = %station,
            cutoff = %cutoff,
        );

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {date}, {tobs} FROM {table} WHERE {station} = ?1 AND {date} >= ?2 ORDER BY {date} ASC",
                date = DATE_COLUMN,
                tobs = TOBS_COLUMN,
                table = self.schema.measurement.name(),
                station = STATION_COLUMN,
            ))
            .map_err(DbError::Query)?;
        let rows = stmt
            .query_map(
                params![station, cutoff.format(DATE_FORMAT).to_string()],
                |row| {
                    Ok(TobsReading {
                        date: row.get(0)?,
                        tobs: row.get(1)?,
                    })
                },
            )
            .map_err(DbError::Query)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::Query)
    }

    /// Temperature aggregates from `start` onwards, bounded by `end` when
    /// given (both inclusive). Aggregates over no rows are null, not errors,
    /// so a window matching nothing returns all-null stats.
    pub fn temperature_stats(
        &self,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<TempStats, DbError> {
        let conn = self.connection()?;
        let start = start.format(DATE_FORMAT).to_string();

        tracing::debug!(message = "querying temperature stats", start = %start, end = ?end);

        let row_to_stats = |row: &rusqlite::Row<'_>| {
            Ok(TempStats {
                tmin: row.get(0)?,
                tavg: row.get(1)?,
                tmax: row.get(2)?,
            })
        };

        match end {
            Some(end) => conn.query_row(
                &format!(
                    "SELECT MIN({tobs}), AVG({tobs}), MAX({tobs}) FROM {table} WHERE {date} >= ?1 AND {date} <= ?2",
                    tobs = TOBS_COLUMN,
                    table = self.schema.measurement.name(),
                    date = DATE_COLUMN,
                ),
                params![start, end.format(DATE_FORMAT).to_string()],
                row_to_stats,
            ),
            None => conn.query_row(
                &format!(
                    "SELECT MIN({tobs}), AVG({tobs}), MAX({tobs}) FROM {table} WHERE {date} >= ?1",
                    tobs = TOBS_COLUMN,
                    table = self.schema.measurement.name(),
                    date = DATE_COLUMN,
                ),
                params![start],
                row_to_stats,
            ),
        }
        .map_err(DbError::Query)
    }

    /// Start of the one-year observation window: 365 days before the most
    /// recent measurement date, or `None` when there are no measurements.
    fn observation_cutoff(&self, conn: &Connection) -> Result<Option<NaiveDate>, DbError> {
        // MAX() over an empty table yields a single NULL row
        let raw: Option<String> = conn
            .query_row(
                &format!(
                    "SELECT MAX({date}) FROM {table}",
                    date = DATE_COLUMN,
                    table = self.schema.measurement.name(),
                ),
                [],
                |row| row.get(0),
            )
            .map_err(DbError::Query)?;

        raw.map(|latest| {
            parse_stored_date(&latest).map(|latest| latest - Duration::days(OBSERVATION_WINDOW_DAYS))
        })
        .transpose()
    }
}

fn parse_stored_date(raw: &str) -> Result<NaiveDate, DbError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| DbError::BadDate(raw.to_string()))
}

fn reflect_table(conn: &Connection, name: &str, required: &[&str]) -> Result<TableHandle, DbError> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()
        .map_err(DbError::Query)?;
    if exists.is_none() {
        return Err(DbError::MissingTable(name.to_string()));
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", name))
        .map_err(DbError::Query)?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(DbError::Query)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(DbError::Query)?;

    for required in required {
        if !columns.iter().any(|column| column == required) {
            return Err(DbError::MissingColumn(name.to_string(), required.to_string()));
        }
    }

    Ok(TableHandle {
        name: name.to_string(),
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type MeasurementRow<'a> = (&'a str, &'a str, Option<f64>, Option<f64>);

    fn fixture(rows: &[MeasurementRow<'_>]) -> (TempDir, ClimateDb) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("climate.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE station (id INTEGER PRIMARY KEY, station TEXT);
             CREATE TABLE measurement (id INTEGER PRIMARY KEY, station TEXT, date TEXT, prcp REAL, tobs REAL);",
        )
        .unwrap();

        for (station, date, prcp, tobs) in rows {
            conn.execute(
                "INSERT INTO measurement (station, date, prcp, tobs) VALUES (?1, ?2, ?3, ?4)",
                params![station, date, prcp, tobs],
            )
            .unwrap();
        }

        let mut stations: Vec<&str> = rows.iter().map(|row| row.0).collect();
        stations.sort_unstable();
        stations.dedup();
        for station in stations {
            conn.execute("INSERT INTO station (station) VALUES (?1)", params![station])
                .unwrap();
        }

        drop(conn);
        (dir, ClimateDb::open(&path).unwrap())
    }

    #[test]
    fn open_rejects_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = ClimateDb::open(dir.path().join("nope.sqlite"));
        assert!(matches!(result, Err(DbError::Open(_))));
    }

    #[test]
    fn open_rejects_missing_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE station (id INTEGER PRIMARY KEY, station TEXT);")
            .unwrap();
        drop(conn);

        match ClimateDb::open(&path) {
            Err(DbError::MissingTable(table)) => assert_eq!(table, "measurement"),
            other => panic!("expected missing table error, got {:?}", other),
        }
    }

    #[test]
    fn open_rejects_missing_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE station (id INTEGER PRIMARY KEY, station TEXT);
             CREATE TABLE measurement (id INTEGER PRIMARY KEY, station TEXT, date TEXT, prcp REAL);",
        )
        .unwrap();
        drop(conn);

        match ClimateDb::open(&path) {
            Err(DbError::MissingColumn(table, column)) => {
                assert_eq!(table, "measurement");
                assert_eq!(column, "tobs");
            }
            other => panic!("expected missing column error, got {:?}", other),
        }
    }

    #[test]
    fn schema_reflects_columns() {
        let (_dir, db) = fixture(&[("S1", "2017-01-01", Some(0.5), Some(70.0))]);
        let columns = db.schema().measurement.columns();
        assert!(columns.iter().any(|c| c == "prcp"));
        assert!(columns.iter().any(|c| c == "tobs"));
        assert_eq!(db.schema().station.name(), "station");
    }

    #[test]
    fn precipitation_cutoff_is_inclusive() {
        // 2018-01-01 minus 365 days is exactly 2017-01-01, so both rows are in
        // the window
        let (_dir, db) = fixture(&[
            ("S1", "2018-01-01", Some(0.5), None),
            ("S1", "2017-01-01", Some(1.0), None),
        ]);

        let by_date = db.precipitation().unwrap();
        assert_eq!(by_date.len(), 2);
        assert_eq!(by_date["2018-01-01"], Some(0.5));
        assert_eq!(by_date["2017-01-01"], Some(1.0));
    }

    #[test]
    fn precipitation_excludes_rows_before_cutoff() {
        let (_dir, db) = fixture(&[
            ("S1", "2018-01-01", Some(0.5), None),
            ("S1", "2016-12-31", Some(2.0), None),
        ]);

        let by_date = db.precipitation().unwrap();
        assert_eq!(by_date.len(), 1);
        assert!(by_date.contains_key("2018-01-01"));
    }

    #[test]
    fn precipitation_same_date_takes_greatest_station() {
        let (_dir, db) = fixture(&[
            ("S1", "2018-01-01", Some(0.1), None),
            ("S2", "2018-01-01", Some(0.9), None),
        ]);

        let by_date = db.precipitation().unwrap();
        assert_eq!(by_date.len(), 1);
        assert_eq!(by_date["2018-01-01"], Some(0.9));
    }

    #[test]
    fn precipitation_preserves_nulls() {
        let (_dir, db) = fixture(&[("S1", "2018-01-01", None, None)]);

        let by_date = db.precipitation().unwrap();
        assert_eq!(by_date["2018-01-01"], None);
    }

    #[test]
    fn precipitation_empty_database() {
        let (_dir, db) = fixture(&[]);
        assert!(db.precipitation().unwrap().is_empty());
    }

    #[test]
    fn stations_one_entry_per_row() {
        let (dir, db) = fixture(&[
            ("S2", "2018-01-01", None, Some(70.0)),
            ("S1", "2018-01-02", None, Some(71.0)),
        ]);
        assert_eq!(db.stations().unwrap(), vec!["S1", "S2"]);

        // Duplicate directory rows pass through, no dedup
        let conn = Connection::open(dir.path().join("climate.sqlite")).unwrap();
        conn.execute("INSERT INTO station (station) VALUES ('S1')", [])
            .unwrap();
        drop(conn);
        assert_eq!(db.stations().unwrap(), vec!["S1", "S1", "S2"]);
    }

    #[test]
    fn most_active_station_counts_rows() {
        let (_dir, db) = fixture(&[
            ("S1", "2018-01-01", None, Some(70.0)),
            ("S2", "2018-01-01", None, Some(68.0)),
            ("S2", "2018-01-02", None, Some(69.0)),
        ]);
        assert_eq!(db.most_active_station().unwrap().as_deref(), Some("S2"));
    }

    #[test]
    fn most_active_station_tie_breaks_to_lowest_code() {
        let (_dir, db) = fixture(&[
            ("S2", "2018-01-01", None, Some(70.0)),
            ("S2", "2018-01-02", None, Some(71.0)),
            ("S1", "2018-01-01", None, Some(65.0)),
            ("S1", "2018-01-02", None, Some(66.0)),
        ]);
        assert_eq!(db.most_active_station().unwrap().as_deref(), Some("S1"));
    }

    #[test]
    fn tobs_filters_station_and_window() {
        let (_dir, db) = fixture(&[
            ("S1", "2018-01-01", None, Some(70.0)),
            ("S1", "2017-06-01", None, Some(75.0)),
            ("S1", "2016-06-01", None, Some(80.0)),
            ("S2", "2018-01-01", None, Some(50.0)),
        ]);

        let readings = db.tobs().unwrap();
        assert_eq!(
            readings,
            vec![
                TobsReading {
                    date: "2017-06-01".to_string(),
                    tobs: Some(75.0),
                },
                TobsReading {
                    date: "2018-01-01".to_string(),
                    tobs: Some(70.0),
                },
            ]
        );
    }

    #[test]
    fn tobs_keeps_duplicate_dates_distinct() {
        let (_dir, db) = fixture(&[
            ("S1", "2018-01-01", None, Some(70.0)),
            ("S1", "2018-01-01", None, Some(71.0)),
        ]);
        assert_eq!(db.tobs().unwrap().len(), 2);
    }

    #[test]
    fn tobs_reading_serializes_as_single_key_object() {
        let reading = TobsReading {
            date: "2017-01-01".to_string(),
            tobs: Some(72.0),
        };
        assert_eq!(
            serde_json::to_string(&reading).unwrap(),
            r#"{"2017-01-01":72.0}"#
        );

        let missing = TobsReading {
            date: "2017-01-02".to_string(),
            tobs: None,
        };
        assert_eq!(
            serde_json::to_string(&missing).unwrap(),
            r#"{"2017-01-02":null}"#
        );
    }

    #[test]
    fn tobs_empty_database() {
        let (_dir, db) = fixture(&[]);
        assert!(db.tobs().unwrap().is_empty());
    }

    #[test]
    fn temperature_stats_aggregates() {
        let (_dir, db) = fixture(&[
            ("S1", "2018-01-01", None, Some(60.0)),
            ("S1", "2018-01-02", None, Some(70.0)),
            ("S1", "2018-01-03", None, Some(80.0)),
        ]);

        let date = |raw| NaiveDate::parse_from_str(raw, DATE_FORMAT).unwrap();
        let stats = db.temperature_stats(date("2018-01-01"), None).unwrap();
        assert_eq!(
            stats,
            TempStats {
                tmin: Some(60.0),
                tavg: Some(70.0),
                tmax: Some(80.0),
            }
        );

        // Range bounds are inclusive on both ends
        let stats = db
            .temperature_stats(date("2018-01-02"), Some(date("2018-01-03")))
            .unwrap();
        assert_eq!(stats.tmin, Some(70.0));
        assert_eq!(stats.tmax, Some(80.0));
    }

    #[test]
    fn temperature_stats_future_start_is_all_null() {
        let (_dir, db) = fixture(&[("S1", "2017-08-23", None, Some(70.0))]);

        let start = NaiveDate::parse_from_str("2020-01-01", DATE_FORMAT).unwrap();
        let stats = db.temperature_stats(start, None).unwrap();
        assert_eq!(
            stats,
            TempStats {
                tmin: None,
                tavg: None,
                tmax: None,
            }
        );
    }

    #[test]
    fn temperature_stats_start_after_end_is_all_null() {
        let (_dir, db) = fixture(&[("S1", "2018-01-01", None, Some(70.0))]);

        let date = |raw| NaiveDate::parse_from_str(raw, DATE_FORMAT).unwrap();
        let stats = db
            .temperature_stats(date("2018-02-01"), Some(date("2018-01-01")))
            .unwrap();
        assert_eq!(stats.tmin, None);
        assert_eq!(stats.tavg, None);
        assert_eq!(stats.tmax, None);
    }
}
