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

//! Geographical regions and area-weighted regional reductions.
//!
//! A region selects grid cells through one or more lat-lon bound boxes,
//! optionally restricted to land or ocean via the model's land-fraction
//! mask. Regional reductions weight each member cell by its surface
//! area times its mask value; cells with zero mask weight are excluded
//! from the weighted average outright rather than carried with zero
//! weight.

use crate::calc::descriptors::ModelGrid;
use crate::errors::ConfigError;
use crate::Float;
use log::warn;
use ndarray::{Array1, Array2, Array4};
use serde::Deserialize;
use std::{fs, path::Path};

/// Land/ocean restriction applied on top of the bound boxes.
///
/// The strict modes demand fully-land or fully-ocean cells; the plain
/// modes weight by the land (or ocean) fraction. With no land-fraction
/// data on the model, every mode leaves the mask unmodified.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandMaskKind {
    None,
    Land,
    StrictLand,
    Ocean,
    StrictOcean,
}

impl Default for LandMaskKind {
    fn default() -> Self {
        LandMaskKind::None
    }
}

/// One lat-lon bound box. Membership is strict: cells exactly on a
/// bound are outside.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize)]
pub struct RegionBounds {
    /// (south, north) bounds in degrees.
    pub lat: (Float, Float),

    /// (west, east) bounds in degrees.
    pub lon: (Float, Float),
}

/// A named geographical region.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Region {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// One or more bound boxes; a cell belongs to the region when any
    /// box contains it.
    pub mask_bounds: Vec<RegionBounds>,

    #[serde(default)]
    pub land_mask: LandMaskKind,
}

impl Region {
    /// Region constructor, responsible for deserializing a region
    /// definition file.
    pub fn new_from_file(file_path: &Path) -> Result<Region, ConfigError> {
        let data = fs::read(file_path)?;
        let region: Region = serde_yaml::from_slice(data.as_slice())?;

        region.check_bounds()?;

        Ok(region)
    }

    /// Checks if the region definition follows conventions and limits.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.mask_bounds.is_empty() {
            return Err(ConfigError::OutOfBounds(
                "Region must declare at least one bound box",
            ));
        }

        for bounds in &self.mask_bounds {
            if bounds.lat.0 >= bounds.lat.1 {
                return Err(ConfigError::OutOfBounds(
                    "Region latitude bounds must satisfy south < north",
                ));
            }
            if !(-90.0..=90.0).contains(&bounds.lat.0) || !(-90.0..=90.0).contains(&bounds.lat.1) {
                return Err(ConfigError::OutOfBounds(
                    "Region latitude bounds must lie within [-90, 90]",
                ));
            }
            if bounds.lon.0 >= bounds.lon.1 {
                return Err(ConfigError::OutOfBounds(
                    "Region longitude bounds must satisfy west < east",
                ));
            }
        }

        Ok(())
    }

    /// Builds the region's weight mask over the model's lat-lon grid.
    ///
    /// Starts from zero and fills in each bound box; where a box marks
    /// a cell the membership is written, otherwise any value already
    /// present is kept. The land/ocean factor is multiplied on last.
    pub fn make_mask(&self, grid: &ModelGrid) -> Array2<Float> {
        let mut mask = Array2::<Float>::zeros((grid.lat.len(), grid.lon.len()));

        for bounds in &self.mask_bounds {
            for (j, &lat) in grid.lat.iter().enumerate() {
                for (i, &lon) in grid.lon.iter().enumerate() {
                    let inside = lat > bounds.lat.0
                        && lat < bounds.lat.1
                        && lon > bounds.lon.0
                        && lon < bounds.lon.1;
                    if inside {
                        mask[[j, i]] = 1.0;
                    }
                }
            }
        }

        let land = match &grid.land_mask {
            Some(land) => land,
            None => return mask,
        };

        match self.land_mask {
            LandMaskKind::None => mask,
            LandMaskKind::Land => mask * land,
            LandMaskKind::StrictLand => mask * land.mapv(|f| if f == 1.0 { 1.0 } else { 0.0 }),
            LandMaskKind::Ocean => mask * land.mapv(|f| 1.0 - f),
            LandMaskKind::StrictOcean => mask * land.mapv(|f| if f == 0.0 { 1.0 } else { 0.0 }),
        }
    }

    /// Time-series of area-weighted regional averages, one value per
    /// timestep and level.
    ///
    /// A region whose mask covers no area yields NaN values; this is a
    /// deliberate degenerate result, not a division artifact, and is
    /// reported once per call through the log.
    pub fn ts(&self, values: &Array4<Float>, grid: &ModelGrid) -> Array2<Float> {
        let mask = self.make_mask(grid);
        let (nt, nlev, nlat, nlon) = values.dim();

        let mut cells = Vec::new();
        for j in 0..nlat {
            for i in 0..nlon {
                if mask[[j, i]] > 0.0 {
                    cells.push((j, i, grid.sfc_area[[j, i]] * mask[[j, i]]));
                }
            }
        }

        let total_weight: Float = cells.iter().map(|&(_, _, w)| w).sum();
        if total_weight == 0.0 {
            warn!(
                "Region '{}' covers no area on the grid, reductions are undefined",
                self.name
            );
            return Array2::from_elem((nt, nlev), Float::NAN);
        }

        let mut out = Array2::<Float>::zeros((nt, nlev));
        for t in 0..nt {
            for k in 0..nlev {
                let mut num = 0.0;
                for &(j, i, w) in &cells {
                    num += w * values[[t, k, j, i]];
                }
                out[[t, k]] = num / total_weight;
            }
        }

        out
    }

    /// Temporal mean of the regional time-series.
    pub fn av(&self, values: &Array4<Float>, grid: &ModelGrid) -> Array1<Float> {
        let ts = self.ts(values, grid);
        ts.mean_axis(ndarray::Axis(0))
            .unwrap_or_else(|| Array1::from_elem(ts.dim().1, Float::NAN))
    }

    /// Temporal standard deviation (population) of the regional
    /// time-series.
    pub fn std(&self, values: &Array4<Float>, grid: &ModelGrid) -> Array1<Float> {
        let ts = self.ts(values, grid);
        ts.std_axis(ndarray::Axis(0), 0.0)
    }
}
