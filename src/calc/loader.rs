/*
Copyright 2025 - 2026 CADE Developers

This file is part of Climate Analysis and Diagnostics Engine (CADE).

Climate Analysis and Diagnostics Engine (CADE) is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

Climate Analysis and Diagnostics Engine (CADE) is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with Climate Analysis and Diagnostics Engine (CADE). If not, see https://www.gnu.org/licenses/.
*/

//! Interface to the data-loading collaborator.
//!
//! The engine does not know how raw fields are fetched. It hands the
//! loader a variable, a date range and a set of selectors, and gets back
//! a [`GriddedSeries`]: a time-labeled array that possibly misses grid
//! metadata (in which case the engine merges it in from the model
//! descriptor).

use crate::calc::configuration::{InputInterval, InputTimeKind, Interval, TimeOffset, VerticalCoord};
use crate::calc::variable::Var;
use crate::errors::InputError;
use crate::Float;
use chrono::{Datelike, NaiveDateTime};
use ndarray::{Array1, Array4, Axis};

/// Selectors forwarded to the data loader alongside the variable and
/// date range.
#[derive(Clone, Debug)]
pub struct LoaderSelectors {
    pub domain: String,
    pub intvl_in: InputInterval,
    pub dtype_in_time: InputTimeKind,
    pub dtype_in_vert: VerticalCoord,
    pub intvl_out: Interval,
    pub ens_mem: Option<usize>,
}

/// Collaborator fetching raw fields for a variable over a date range.
///
/// Implementations own all file-system or network specifics. The engine
/// calls this synchronously and treats any failure as fatal for the
/// calculation.
pub trait DataLoader {
    fn load_variable(
        &self,
        var: &Var,
        start_date: NaiveDateTime,
        end_date: NaiveDateTime,
        time_offset: Option<TimeOffset>,
        selectors: &LoaderSelectors,
    ) -> Result<GriddedSeries, InputError>;
}

/// A time-labeled gridded field over `(time, lev, lat, lon)`.
///
/// Quantities not defined vertically carry a level axis of length 1.
/// The per-timestep durations are in seconds as delivered by the data
/// source; they are converted to day units before any weighted
/// averaging downstream.
#[derive(Clone, Debug)]
pub struct GriddedSeries {
    pub time: Vec<NaiveDateTime>,

    /// Duration of each timestep, in seconds.
    pub dt_seconds: Array1<Float>,

    /// Vertical level coordinate (Pa), when delivered by the source.
    pub level: Option<Array1<Float>>,

    /// Latitude cell centers, when delivered by the source.
    pub lat: Option<Array1<Float>>,

    /// Longitude cell centers, when delivered by the source.
    pub lon: Option<Array1<Float>>,

    pub values: Array4<Float>,
}

impl GriddedSeries {
    /// Number of timesteps.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Checks that labels and values agree on every axis length.
    pub fn check_shape(&self, name: &str) -> Result<(), InputError> {
        let (nt, nlev, nlat, nlon) = self.values.dim();

        if self.time.len() != nt || self.dt_seconds.len() != nt {
            return Err(InputError::ShapeMismatch {
                name: name.to_string(),
                reason: format!(
                    "time axis of length {} labeled with {} stamps and {} weights",
                    nt,
                    self.time.len(),
                    self.dt_seconds.len()
                ),
            });
        }

        if let Some(level) = &self.level {
            if level.len() != nlev {
                return Err(InputError::ShapeMismatch {
                    name: name.to_string(),
                    reason: format!(
                        "level axis of length {} labeled with {} levels",
                        nlev,
                        level.len()
                    ),
                });
            }
        }

        if let Some(lat) = &self.lat {
            if lat.len() != nlat {
                return Err(InputError::ShapeMismatch {
                    name: name.to_string(),
                    reason: format!("lat axis of length {} labeled with {}", nlat, lat.len()),
                });
            }
        }

        if let Some(lon) = &self.lon {
            if lon.len() != nlon {
                return Err(InputError::ShapeMismatch {
                    name: name.to_string(),
                    reason: format!("lon axis of length {} labeled with {}", nlon, lon.len()),
                });
            }
        }

        Ok(())
    }

    /// Restricts the series to timesteps falling in the given calendar
    /// months.
    pub fn select_months(&self, months: &[u32]) -> GriddedSeries {
        let keep: Vec<usize> = self
            .time
            .iter()
            .enumerate()
            .filter(|(_, t)| months.contains(&t.month()))
            .map(|(i, _)| i)
            .collect();

        GriddedSeries {
            time: keep.iter().map(|&i| self.time[i]).collect(),
            dt_seconds: keep.iter().map(|&i| self.dt_seconds[i]).collect(),
            level: self.level.clone(),
            lat: self.lat.clone(),
            lon: self.lon.clone(),
            values: self.values.select(Axis(0), &keep),
        }
    }
}
