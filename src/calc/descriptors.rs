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

//! Read-only descriptors of the project, model and run a calculation
//! operates on.
//!
//! These objects are metadata carriers: the engine never mutates them and
//! only reads grid geometry, registered run names and output directories
//! from them. Project and run descriptors are plain data and can be
//! deserialized from YAML definition files.

use crate::errors::ConfigError;
use crate::Float;
use chrono::NaiveDateTime;
use ndarray::{Array1, Array2};
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf};

/// Project descriptor: names the project and anchors the output
/// directory tree.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Proj {
    pub name: String,

    /// Base directory for per-calculation NetCDF output.
    pub direc_out: PathBuf,

    /// _(Optional)_ Base directory for the tar archive mirror of the
    /// output. When absent, archive writing is skipped entirely.
    #[serde(default)]
    pub tar_direc_out: Option<PathBuf>,
}

impl Proj {
    /// Proj descriptor constructor, responsible for deserializing
    /// a project definition file.
    pub fn new_from_file(file_path: &Path) -> Result<Proj, ConfigError> {
        let data = fs::read(file_path)?;
        let proj: Proj = serde_yaml::from_slice(data.as_slice())?;

        Ok(proj)
    }
}

/// Run descriptor: one simulation of a model, with its default
/// analysis date range.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Run {
    pub name: String,

    pub default_start_date: NaiveDateTime,

    pub default_end_date: NaiveDateTime,
}

/// Model descriptor: grid geometry plus the names of the runs
/// registered under this model.
///
/// A calculation may only reference runs listed here; requesting any
/// other run is a configuration error raised before any I/O happens.
#[derive(Clone, Debug)]
pub struct Model {
    pub name: String,

    pub runs: Vec<String>,

    pub grid: ModelGrid,
}

impl Model {
    /// Checks whether a run name is registered under this model.
    pub fn has_run(&self, run: &str) -> bool {
        self.runs.iter().any(|r| r == run)
    }
}

/// Static grid geometry of a model.
///
/// Latitude and longitude are cell centers in degrees. Surface area is
/// per grid cell in m^2 over (lat, lon). The land mask, when present,
/// holds the land fraction of each cell in `[0, 1]`.
///
/// Vertical metadata depends on the model's coordinate system: `level`
/// holds pressure-level centers in Pa for pressure coordinates, while
/// `bk`/`pk` hold the hybrid sigma-pressure half-level coefficients and
/// `pfull` the reference full-level pressures for hybrid coordinates.
#[derive(Clone, Debug)]
pub struct ModelGrid {
    pub lat: Array1<Float>,

    pub lon: Array1<Float>,

    pub sfc_area: Array2<Float>,

    pub land_mask: Option<Array2<Float>>,

    pub level: Option<Array1<Float>>,

    pub bk: Option<Array1<Float>>,

    pub pk: Option<Array1<Float>>,

    pub pfull: Option<Array1<Float>>,
}

impl ModelGrid {
    /// Checks internal consistency of the grid arrays.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.lat.is_empty() || self.lon.is_empty() {
            return Err(ConfigError::OutOfBounds(
                "Model grid must have at least one latitude and longitude",
            ));
        }

        if self.sfc_area.dim() != (self.lat.len(), self.lon.len()) {
            return Err(ConfigError::OutOfBounds(
                "Surface area shape does not match the lat-lon grid",
            ));
        }

        if let Some(land_mask) = &self.land_mask {
            if land_mask.dim() != (self.lat.len(), self.lon.len()) {
                return Err(ConfigError::OutOfBounds(
                    "Land mask shape does not match the lat-lon grid",
                ));
            }
        }

        match (&self.bk, &self.pk) {
            (Some(bk), Some(pk)) => {
                if bk.len() != pk.len() || bk.len() < 2 {
                    return Err(ConfigError::OutOfBounds(
                        "Hybrid coefficients bk and pk must have equal length of at least 2",
                    ));
                }
            }
            (None, None) => {}
            _ => {
                return Err(ConfigError::OutOfBounds(
                    "Hybrid coefficients bk and pk must be provided together",
                ));
            }
        }

        Ok(())
    }

    /// Number of full model levels implied by the hybrid half-level
    /// coefficients, if any.
    pub fn hybrid_levels(&self) -> Option<usize> {
        self.bk.as_ref().map(|bk| bk.len() - 1)
    }
}
