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

//! JSON API over the Hawaii climate observations dataset
//!
//! ## Features
//!
//! `climate_api` serves a small set of read-only HTTP endpoints over an existing
//! SQLite database of weather station metadata and daily precipitation and
//! temperature readings. The database is reflected at startup (tables and the
//! columns this service consumes are verified to exist) and never written to.
//!
//! * `/` - Plain text listing of the available routes.
//! * `/api/v1.0/precipitation` - Precipitation by date for the final year of
//!   data, as a JSON object keyed by `YYYY-MM-DD` date.
//! * `/api/v1.0/stations` - JSON array of station codes.
//! * `/api/v1.0/tobs` - Temperature observations for the most active station
//!   over the final year of data, one `{"date": temperature}` object per row.
//! * `/api/v1.0/<start>` - `TMIN`/`TAVG`/`TMAX` of temperature from `start`
//!   onwards.
//! * `/api/v1.0/<start>/<end>` - `TMIN`/`TAVG`/`TMAX` of temperature between
//!   `start` and `end`, inclusive.
//!
//! ## Build
//!
//! `climate_api` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! Point the server at an existing climate database and it will listen on port
//! `8080` by default.
//!
//! ```text
//! ./climate_api --database Resources/hawaii.sqlite
//! ```
//!
//! The process exits with an error at startup if the database file is missing
//! or does not contain the expected `station` and `measurement` tables.
//!

pub mod db;
pub mod http;
