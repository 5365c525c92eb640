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

//! Module containing the calculation engine.
//!
//! A [`Calc`] owns the configuration of a single calculation and drives
//! it end to end: acquiring inputs through the [`DataLoader`], building
//! the requested timeseries variants, applying the requested
//! reductions, attaching metadata and persisting every result to the
//! working directory and, optionally, the archive.

mod archive;
mod configuration;
mod descriptors;
mod loader;
mod outputs;
mod persistence;
mod pressure;
mod region;
mod timeseries;
mod variable;

#[cfg(test)]
mod super_tests;

pub use configuration::{
    CalcConfig, CalcParams, InputInterval, InputTimeKind, Interval, Season, TimeOffset,
    VertReduction, VerticalCoord,
};
pub use descriptors::{Model, ModelGrid, Proj, Run};
pub use loader::{DataLoader, GriddedSeries, LoaderSelectors};
pub use outputs::{
    GriddedValues, OutputEntry, OutputPayload, OutputSpec, Reduction, RegionOutput, RegionValues,
    Scope, SeriesVariant,
};
pub use persistence::{data_in_label, data_out_label, ens_label, file_name, yr_label};
pub use pressure::{int_dp_g, PressureQuantity, PressureResolver};
pub use region::{LandMaskKind, Region, RegionBounds};
pub use timeseries::YearlySeries;
pub use variable::{FuncInputKind, InputSpec, Operand, Var, VarFunc};

use crate::constants::SECONDS_PER_DAY;
use crate::errors::{CalcError, CoordinateError, InputError, IoAccessError, ReductionError};
use crate::Float;
use chrono::Datelike;
use log::{debug, info};
use ndarray::Array1;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use timeseries::{InputData, TimeSeriesBuilder, VariantRequest};
use variable::surface_pressure_var;

/// Optional conveniences applied to a loaded result.
#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    /// Restrict time-series outputs to these year-axis indices.
    pub year_indices: Option<Vec<usize>>,

    /// Restrict vertically defined outputs to one level index.
    pub vert_index: Option<usize>,

    /// Replace values outside the variable's valid range with NaN.
    pub mask_unphysical: bool,
}

/// A single calculation: its configuration, derived paths and the
/// cache of computed outputs.
#[derive(Debug)]
pub struct Calc {
    config: CalcConfig,
    dir_out: PathBuf,
    dir_tar_out: Option<PathBuf>,
    file_name: BTreeMap<String, String>,
    path_out: BTreeMap<String, PathBuf>,
    path_tar_out: Option<PathBuf>,
    data_out: BTreeMap<String, OutputEntry>,
    ps_data: Option<GriddedSeries>,
}

impl fmt::Display for Calc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Calc({}, {}, {}, {})",
            self.config.var.name, self.config.proj.name, self.config.model.name, self.config.run.name
        )
    }
}

impl Calc {
    /// Validates the parameters and derives the on-disk layout of the
    /// calculation's outputs.
    pub fn new(params: CalcParams) -> Result<Calc, CalcError> {
        let config = CalcConfig::from_params(params)?;

        let ens = persistence::ens_label(config.ens_mem);

        let mut dir_out = config
            .proj
            .direc_out
            .join(&config.proj.name)
            .join(&config.model.name)
            .join(&config.run.name);
        if !ens.is_empty() {
            dir_out = dir_out.join(&ens);
        }
        dir_out = dir_out.join(&config.var.name);

        let dir_tar_out = config.proj.tar_direc_out.as_ref().map(|base| {
            let mut dir = base
                .join(&config.proj.name)
                .join(&config.model.name)
                .join(&config.run.name);
            if !ens.is_empty() {
                dir = dir.join(&ens);
            }
            dir
        });

        let mut file_name = BTreeMap::new();
        let mut path_out = BTreeMap::new();
        for spec in &config.dtype_out_time {
            let name = persistence::file_name(&config, &spec.tag);
            path_out.insert(spec.tag.clone(), dir_out.join(&name));
            file_name.insert(spec.tag.clone(), name);
        }

        let path_tar_out = dir_tar_out.as_ref().map(|dir| dir.join("data.tar"));

        let calc = Calc {
            config,
            dir_out,
            dir_tar_out,
            file_name,
            path_out,
            path_tar_out,
            data_out: BTreeMap::new(),
            ps_data: None,
        };
        debug!("Initialized calculation instance: {}", calc);

        Ok(calc)
    }

    pub fn config(&self) -> &CalcConfig {
        &self.config
    }

    /// Working-directory path of the output for `tag`.
    pub fn path_out(&self, tag: &str) -> Option<&Path> {
        self.path_out.get(tag).map(PathBuf::as_path)
    }

    /// Path of the archive file, when the project has one configured.
    pub fn path_tar_out(&self) -> Option<&Path> {
        self.path_tar_out.as_deref()
    }

    /// File name of the output for `tag`.
    pub fn file_name(&self, tag: &str) -> Option<&str> {
        self.file_name.get(tag).map(String::as_str)
    }

    /// The in-memory result for `tag`, if computed or loaded before.
    pub fn cached(&self, tag: &str) -> Option<&OutputEntry> {
        self.data_out.get(tag)
    }

    /// Tags of all results held in the instance cache, in their
    /// emitted (lexicographic) order.
    pub fn output_tags(&self) -> Vec<&str> {
        self.data_out.keys().map(String::as_str).collect()
    }

    /// Performs all requested reductions and saves every result.
    ///
    /// Returns `self` so that a compute can be chained with loads.
    pub fn compute(
        &mut self,
        data_loader: &dyn DataLoader,
        write_to_tar: bool,
    ) -> Result<&mut Self, CalcError> {
        info!(
            "Computing timeseries for {} -- {}",
            self.config.start_date, self.config.end_date
        );

        let (inputs, data_level) = self.gather_inputs(data_loader)?;
        let request = VariantRequest::from_specs(&self.config.dtype_out_time);

        let needs_pressure = self.config.vert_reduced();
        let needs_pfull = self.config.var.def_vert
            && self.config.dtype_in_vert == VerticalCoord::Sigma
            && self.config.dtype_out_vert == VertReduction::None
            && self
                .config
                .dtype_out_time
                .iter()
                .any(|spec| spec.scope == Scope::Regional);

        let ps = if needs_pressure || needs_pfull {
            Some(self.ensure_ps(data_loader)?)
        } else {
            None
        };

        let model = self.config.model.clone();
        let resolver =
            PressureResolver::new(&model.grid, &model.name, self.config.dtype_in_vert);

        let dp = match (&ps, needs_pressure) {
            (Some(ps), true) => {
                let values =
                    resolver.resolve(PressureQuantity::Thickness, ps, data_level.as_ref())?;
                Some(GriddedSeries {
                    time: ps.time.clone(),
                    dt_seconds: ps.dt_seconds.clone(),
                    level: None,
                    lat: None,
                    lon: None,
                    values,
                })
            }
            _ => None,
        };

        let pfull = match (&ps, needs_pfull) {
            (Some(ps), true) => {
                let values =
                    resolver.resolve(PressureQuantity::Pressure, ps, data_level.as_ref())?;
                let dt_days: Array1<Float> = &ps.dt_seconds / SECONDS_PER_DAY;
                Some(if self.config.time_defined() {
                    timeseries::yearly_average(&values, &dt_days, &ps.time)
                } else {
                    YearlySeries {
                        years: ps.time.iter().map(|t| t.year()).collect(),
                        values,
                    }
                })
            }
            _ => None,
        };

        let builder = TimeSeriesBuilder {
            var: &self.config.var,
            dtype_in_time: self.config.dtype_in_time,
            dtype_out_vert: self.config.dtype_out_vert,
            dp: dp.as_ref(),
            ps: ps.as_ref(),
        };
        let variants = builder.build(&inputs, request)?;

        debug!("Applying desired time-reduction methods");
        let reduced =
            outputs::apply_all_reductions(&self.config, &variants, pfull.as_ref(), &model.grid)?;

        info!("Writing desired gridded outputs to disk");
        let entries: Vec<(String, OutputEntry)> = reduced
            .into_iter()
            .map(|(tag, payload)| {
                let entry =
                    outputs::attach_metadata(payload, &self.config.var, self.config.dtype_out_vert);
                (tag, entry)
            })
            .collect();

        for (tag, entry) in entries {
            self.save(&tag, entry, true, write_to_tar)?;
        }

        Ok(self)
    }

    /// Stores a result in the instance cache and externally.
    pub fn save(
        &mut self,
        tag: &str,
        entry: OutputEntry,
        save_files: bool,
        write_to_tar: bool,
    ) -> Result<(), CalcError> {
        self.data_out.insert(tag.to_string(), entry.clone());

        if save_files {
            self.save_files(tag, &entry)?;
        }

        if write_to_tar {
            if let (Some(tar_path), Some(member), Some(src)) = (
                &self.path_tar_out,
                self.file_name.get(tag),
                self.path_out.get(tag),
            ) {
                archive::update_archive(tar_path, member, src)?;
            }
        }

        if let Some(path) = self.path_out.get(tag) {
            info!("\t{}", path.display());
        }

        Ok(())
    }

    /// Returns the result for `tag`, from the instance cache when
    /// available, otherwise from the working directory with a single
    /// fallback hop to the archive. The result is cached either way.
    pub fn load(&mut self, tag: &str, options: &LoadOptions) -> Result<OutputEntry, CalcError> {
        info!("Loading data for {}, dtype_out_time={}", self, tag);

        let spec = self.spec_for(tag)?.clone();

        if !self.data_out.contains_key(tag) {
            let path = self
                .path_out
                .get(tag)
                .cloned()
                .ok_or_else(|| ReductionError::UnsupportedReduction(tag.to_string()))?;

            let entry = match persistence::read_entry(&path, &self.config, &spec) {
                Ok(entry) => entry,
                Err(disk_err) => {
                    debug!(
                        "Working-directory read failed ({}), falling back to the archive",
                        disk_err
                    );
                    self.load_from_tar(tag, &spec)?
                }
            };
            self.data_out.insert(tag.to_string(), entry);
        }

        let mut entry = self
            .data_out
            .get(tag)
            .cloned()
            .ok_or_else(|| ReductionError::UnsupportedReduction(tag.to_string()))?;

        if let Some(indices) = &options.year_indices {
            entry.payload = entry.payload.select_years(indices);
        }
        if let Some(level) = options.vert_index {
            entry.payload = entry.payload.select_level(level);
        }
        if options.mask_unphysical {
            let var = self.config.var.clone();
            entry.payload.map_values(|v| var.mask_unphysical(v));
        }

        Ok(entry)
    }

    fn load_from_tar(&self, tag: &str, spec: &OutputSpec) -> Result<OutputEntry, CalcError> {
        let tar_path = self.path_tar_out.as_ref().ok_or_else(|| {
            IoAccessError::NoArchiveConfigured(self.config.proj.name.clone())
        })?;
        let member = self
            .file_name
            .get(tag)
            .ok_or_else(|| ReductionError::UnsupportedReduction(tag.to_string()))?;

        let bytes = archive::extract_member(tar_path, member)?;

        let tmp_path = tar_path.with_file_name(format!(".extracted.{}", member));
        fs::write(&tmp_path, &bytes).map_err(|source| IoAccessError::FileAccess {
            path: tmp_path.clone(),
            source,
        })?;
        let entry = persistence::read_entry(&tmp_path, &self.config, spec);
        let _ = fs::remove_file(&tmp_path);

        Ok(entry?)
    }

    fn spec_for(&self, tag: &str) -> Result<&OutputSpec, CalcError> {
        self.config
            .dtype_out_time
            .iter()
            .find(|spec| spec.tag == tag)
            .ok_or_else(|| ReductionError::UnsupportedReduction(tag.to_string()).into())
    }

    fn selectors(&self) -> LoaderSelectors {
        LoaderSelectors {
            domain: self.config.var.domain.clone(),
            intvl_in: self.config.intvl_in,
            dtype_in_time: self.config.dtype_in_time,
            dtype_in_vert: self.config.dtype_in_vert,
            intvl_out: self.config.intvl_out,
            ens_mem: self.config.ens_mem,
        }
    }

    /// Acquires every input of the calculation in declaration order.
    /// Also reports the vertical level coordinate observed on loaded
    /// fields, for resolving pressure on pressure-level data.
    fn gather_inputs(
        &mut self,
        data_loader: &dyn DataLoader,
    ) -> Result<(Vec<InputData>, Option<Array1<Float>>), CalcError> {
        let var = self.config.var.clone();

        match var.func_input {
            FuncInputKind::Labeled | FuncInputKind::Raw => {}
            FuncInputKind::Dataset => {
                return Err(InputError::DatasetInputUnimplemented.into());
            }
        }

        let model = self.config.model.clone();
        let selectors = self.selectors();
        let months = self.config.months();

        let specs: Vec<InputSpec> = if var.variables.is_empty() {
            vec![InputSpec::Field(var.clone())]
        } else {
            var.variables.clone()
        };

        let mut data_level: Option<Array1<Float>> = None;
        let mut inputs = Vec::with_capacity(specs.len());

        for spec in &specs {
            let input = match spec {
                InputSpec::Constant(value) => InputData::Constant(*value),
                InputSpec::Latitude => InputData::Axis(model.grid.lat.clone()),
                InputSpec::Longitude => InputData::Axis(model.grid.lon.clone()),
                InputSpec::SurfaceArea => InputData::Grid(model.grid.sfc_area.clone()),
                InputSpec::Pressure | InputSpec::PressureThickness => {
                    let quantity = match spec {
                        InputSpec::Pressure => PressureQuantity::Pressure,
                        _ => PressureQuantity::Thickness,
                    };
                    let ps = self.ensure_ps(data_loader)?;
                    let resolver = PressureResolver::new(
                        &model.grid,
                        &model.name,
                        self.config.dtype_in_vert,
                    );
                    let values = resolver.resolve(quantity, &ps, data_level.as_ref())?;
                    InputData::Series(GriddedSeries {
                        time: ps.time,
                        dt_seconds: ps.dt_seconds,
                        level: None,
                        lat: None,
                        lon: None,
                        values,
                    })
                }
                InputSpec::Field(field_var) => {
                    debug!("Getting input data: {}", field_var.name);
                    let mut data = data_loader.load_variable(
                        field_var,
                        self.config.start_date,
                        self.config.end_date,
                        self.config.time_offset,
                        &selectors,
                    )?;
                    data.check_shape(&field_var.name)?;
                    self.merge_grid_coords(&mut data);

                    // Restrict to the desired months within each year.
                    let data = if field_var.def_time
                        && self.config.dtype_in_time != InputTimeKind::Average
                    {
                        data.select_months(&months)
                    } else {
                        data
                    };

                    if data_level.is_none() {
                        data_level = data.level.clone();
                    }
                    InputData::Series(data)
                }
            };
            inputs.push(input);
        }

        Ok((inputs, data_level))
    }

    /// Loads and memoizes the surface pressure field.
    fn ensure_ps(&mut self, data_loader: &dyn DataLoader) -> Result<GriddedSeries, CalcError> {
        if self.ps_data.is_none() {
            debug!("Loading surface pressure for {}", self);
            let ps_var = surface_pressure_var();
            let selectors = self.selectors();
            let mut ps = data_loader.load_variable(
                &ps_var,
                self.config.start_date,
                self.config.end_date,
                self.config.time_offset,
                &selectors,
            )?;
            ps.check_shape("ps")?;
            self.merge_grid_coords(&mut ps);

            if self.config.dtype_in_time != InputTimeKind::Average {
                ps = ps.select_months(&self.config.months());
            }
            self.ps_data = Some(ps);
        }

        match &self.ps_data {
            Some(ps) => Ok(ps.clone()),
            None => Err(CoordinateError::MissingSurfacePressure("ps").into()),
        }
    }

    /// Reconciles the lat/lon metadata of loaded data with the model
    /// descriptor: absent coordinates are filled in from the model,
    /// nearly-equal ones are replaced by the model's values.
    fn merge_grid_coords(&self, series: &mut GriddedSeries) {
        let grid = &self.config.model.grid;

        match &series.lat {
            None => series.lat = Some(grid.lat.clone()),
            Some(lat) if lat == &grid.lat => {}
            Some(lat) if nearly_equal(lat, &grid.lat) => {
                info!(
                    "Values for 'lat' are nearly (but not exactly) the same in run '{}' and model '{}', using the model's",
                    self.config.run.name, self.config.model.name
                );
                series.lat = Some(grid.lat.clone());
            }
            Some(_) => {
                info!(
                    "Model coordinates for 'lat' do not match those in run '{}'",
                    self.config.run.name
                );
            }
        }

        match &series.lon {
            None => series.lon = Some(grid.lon.clone()),
            Some(lon) if lon == &grid.lon => {}
            Some(lon) if nearly_equal(lon, &grid.lon) => {
                info!(
                    "Values for 'lon' are nearly (but not exactly) the same in run '{}' and model '{}', using the model's",
                    self.config.run.name, self.config.model.name
                );
                series.lon = Some(grid.lon.clone());
            }
            Some(_) => {
                info!(
                    "Model coordinates for 'lon' do not match those in run '{}'",
                    self.config.run.name
                );
            }
        }
    }

    fn save_files(&self, tag: &str, entry: &OutputEntry) -> Result<(), CalcError> {
        let spec = self.spec_for(tag)?;
        let path = self
            .path_out
            .get(tag)
            .ok_or_else(|| ReductionError::UnsupportedReduction(tag.to_string()))?;

        fs::create_dir_all(&self.dir_out).map_err(|source| IoAccessError::FileAccess {
            path: self.dir_out.clone(),
            source,
        })?;

        // Regional results are merged into any existing file so that
        // outputs for other regions survive.
        let to_write = if spec.scope == Scope::Regional {
            persistence::merge_regional(path, &self.config, spec, entry)
        } else {
            entry.clone()
        };

        persistence::write_entry(path, &self.config, &to_write)?;

        Ok(())
    }
}

/// Element-wise approximate equality of two coordinate arrays.
fn nearly_equal(a: &Array1<Float>, b: &Array1<Float>) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).abs() <= 1.0e-4 * y.abs().max(1.0))
}
