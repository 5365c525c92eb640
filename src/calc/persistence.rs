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

//! On-disk representation of computed outputs.
//!
//! One NetCDF file per output tag, written in 64-bit-offset classic
//! format. Gridded outputs hold one variable named after the computed
//! variable; regional outputs hold one variable per region plus an
//! optional `{region}_pressure` companion. File names follow the fixed
//! scheme
//! `{var}.{out_label}.{in_label}.{model}.{run}.{ens_label}.{yr_label}.nc`
//! with empty labels collapsing their double dots.

use crate::calc::configuration::{CalcConfig, InputInterval, InputTimeKind, Interval, VertReduction, VerticalCoord};
use crate::calc::outputs::{
    GriddedValues, OutputEntry, OutputPayload, OutputSpec, RegionOutput, RegionValues, Scope,
};
use crate::errors::IoAccessError;
use crate::Float;
use chrono::Datelike;
use ndarray::{Array1, Array2, Array3, Array4};
use std::collections::BTreeMap;
use std::path::Path;

const COORD_NAMES: [&str; 5] = ["year", "level", "pfull", "lat", "lon"];

/// Label of the output side of a file name:
/// `{intvl_out}.{tag}[.{vert_label}]`.
pub fn data_out_label(intvl_out: Interval, tag: &str, dtype_out_vert: VertReduction) -> String {
    let label = format!("{}.{}", intvl_out.label(), tag).replace("..", ".");
    let vert_label = dtype_out_vert.label();
    if vert_label.is_empty() {
        label
    } else {
        format!("{}.{}", label, vert_label).replace("..", ".")
    }
}

/// Label of the input side of a file name:
/// `from_{intvl_in}_{time_label}[_{vert_label}]`.
pub fn data_in_label(
    intvl_in: InputInterval,
    dtype_in_time: InputTimeKind,
    dtype_in_vert: VerticalCoord,
) -> String {
    let label = format!("from_{}_{}", intvl_in.label(), dtype_in_time.label()).replace("__", "_");
    let vert_label = dtype_in_vert.label();
    if vert_label.is_empty() {
        label
    } else {
        format!("{}_{}", label, vert_label).replace("__", "_")
    }
}

/// Label of an ensemble member; empty for single-realization runs.
pub fn ens_label(ens_mem: Option<usize>) -> String {
    match ens_mem {
        None => String::new(),
        Some(mem) => format!("mem{}", mem + 1),
    }
}

/// Label of the year range, zero-padded to four digits.
pub fn yr_label(start_year: i32, end_year: i32) -> String {
    if start_year == end_year {
        format!("{:04}", start_year)
    } else {
        format!("{:04}-{:04}", start_year, end_year)
    }
}

/// The output file name for one output tag.
pub fn file_name(cfg: &CalcConfig, tag: &str) -> String {
    let parts = [
        cfg.var.name.as_str(),
        &data_out_label(cfg.intvl_out, tag, cfg.dtype_out_vert),
        &data_in_label(cfg.intvl_in, cfg.dtype_in_time, cfg.dtype_in_vert),
        &cfg.model.name,
        &cfg.run.name,
        &ens_label(cfg.ens_mem),
        &yr_label(cfg.start_date.year(), cfg.end_date.year()),
        "nc",
    ]
    .join(".");
    parts.replace("..", ".")
}

fn nc_err(path: &Path) -> impl Fn(netcdf::Error) -> IoAccessError + '_ {
    move |err| IoAccessError::Netcdf {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Name of the vertical dimension for the configured coordinates.
fn level_dim_name(dtype_in_vert: VerticalCoord) -> &'static str {
    match dtype_in_vert {
        VerticalCoord::Sigma => "pfull",
        _ => "level",
    }
}

/// Writes one output entry to `path`, replacing any existing file.
pub(crate) fn write_entry(
    path: &Path,
    cfg: &CalcConfig,
    entry: &OutputEntry,
) -> Result<(), IoAccessError> {
    let err = nc_err(path);
    let mut file =
        netcdf::create_with(path, netcdf::Options::_64BIT_OFFSET).map_err(&err)?;

    match &entry.payload {
        OutputPayload::Gridded(values) => {
            write_gridded(&mut file, path, cfg, values, &entry.units, &entry.description)?
        }
        OutputPayload::Regional(regions) => {
            write_regional(&mut file, path, cfg, regions, &entry.units, &entry.description)?
        }
    }

    Ok(())
}

fn add_year_dim(
    file: &mut netcdf::FileMut,
    path: &Path,
    years: &[i32],
) -> Result<(), IoAccessError> {
    let err = nc_err(path);
    file.add_dimension("year", years.len()).map_err(&err)?;
    let mut var = file.add_variable::<i32>("year", &["year"]).map_err(&err)?;
    var.put_values(years, ..).map_err(&err)?;
    Ok(())
}

fn add_level_dim(
    file: &mut netcdf::FileMut,
    path: &Path,
    cfg: &CalcConfig,
    nlev: usize,
) -> Result<&'static str, IoAccessError> {
    let err = nc_err(path);
    let name = level_dim_name(cfg.dtype_in_vert);
    file.add_dimension(name, nlev).map_err(&err)?;

    let coord = match cfg.dtype_in_vert {
        VerticalCoord::Sigma => cfg.model.grid.pfull.as_ref(),
        _ => cfg.model.grid.level.as_ref(),
    };
    if let Some(coord) = coord {
        if coord.len() == nlev {
            let mut var = file.add_variable::<Float>(name, &[name]).map_err(&err)?;
            var.put_attribute("units", "Pa").map_err(&err)?;
            let flat: Vec<Float> = coord.iter().copied().collect();
            var.put_values(&flat, ..).map_err(&err)?;
        }
    }

    Ok(name)
}

fn add_latlon_dims(
    file: &mut netcdf::FileMut,
    path: &Path,
    cfg: &CalcConfig,
    nlat: usize,
    nlon: usize,
) -> Result<(), IoAccessError> {
    let err = nc_err(path);
    file.add_dimension("lat", nlat).map_err(&err)?;
    file.add_dimension("lon", nlon).map_err(&err)?;

    let grid = &cfg.model.grid;
    if grid.lat.len() == nlat {
        let mut var = file.add_variable::<Float>("lat", &["lat"]).map_err(&err)?;
        var.put_attribute("units", "degrees_north").map_err(&err)?;
        let flat: Vec<Float> = grid.lat.iter().copied().collect();
        var.put_values(&flat, ..).map_err(&err)?;
    }
    if grid.lon.len() == nlon {
        let mut var = file.add_variable::<Float>("lon", &["lon"]).map_err(&err)?;
        var.put_attribute("units", "degrees_east").map_err(&err)?;
        let flat: Vec<Float> = grid.lon.iter().copied().collect();
        var.put_values(&flat, ..).map_err(&err)?;
    }

    Ok(())
}

fn write_gridded(
    file: &mut netcdf::FileMut,
    path: &Path,
    cfg: &CalcConfig,
    values: &GriddedValues,
    units: &str,
    description: &str,
) -> Result<(), IoAccessError> {
    let err = nc_err(path);

    let mut dims: Vec<&str> = Vec::new();
    let flat: Vec<Float>;

    match values {
        GriddedValues::Series { years, data } => {
            let (_, nlev, nlat, nlon) = data.dim();
            add_year_dim(file, path, years)?;
            dims.push("year");
            if nlev > 1 {
                dims.push(add_level_dim(file, path, cfg, nlev)?);
            }
            add_latlon_dims(file, path, cfg, nlat, nlon)?;
            dims.push("lat");
            dims.push("lon");
            flat = data.iter().copied().collect();
        }
        GriddedValues::Stat(data) => {
            let (nlev, nlat, nlon) = data.dim();
            if nlev > 1 {
                dims.push(add_level_dim(file, path, cfg, nlev)?);
            }
            add_latlon_dims(file, path, cfg, nlat, nlon)?;
            dims.push("lat");
            dims.push("lon");
            flat = data.iter().copied().collect();
        }
    }

    let mut var = file
        .add_variable::<Float>(&cfg.var.name, &dims)
        .map_err(&err)?;
    var.put_attribute("units", units).map_err(&err)?;
    var.put_attribute("description", description).map_err(&err)?;
    var.put_values(&flat, ..).map_err(&err)?;

    Ok(())
}

fn write_regional(
    file: &mut netcdf::FileMut,
    path: &Path,
    cfg: &CalcConfig,
    regions: &BTreeMap<String, RegionOutput>,
    units: &str,
    description: &str,
) -> Result<(), IoAccessError> {
    let err = nc_err(path);

    // Shared dimensions are derived from whichever outputs carry them;
    // every region of one calculation shares the same axes.
    let mut year_axis: Option<&[i32]> = None;
    let mut nlev_axis: Option<usize> = None;
    for output in regions.values() {
        for values in std::iter::once(&output.values).chain(output.pressure.iter()) {
            match values {
                RegionValues::Series { years, data } => {
                    year_axis.get_or_insert(years);
                    if data.dim().1 > 1 {
                        nlev_axis.get_or_insert(data.dim().1);
                    }
                }
                RegionValues::Stat(data) => {
                    if data.len() > 1 {
                        nlev_axis.get_or_insert(data.len());
                    }
                }
            }
        }
    }

    if let Some(years) = year_axis {
        add_year_dim(file, path, years)?;
    }
    let mut level_name = "level";
    if let Some(nlev) = nlev_axis {
        level_name = add_level_dim(file, path, cfg, nlev)?;
    }

    for (name, output) in regions {
        write_region_values(
            file,
            path,
            name,
            &output.values,
            level_name,
            &[("units", units), ("description", description)],
        )?;

        if let Some(pressure) = &output.pressure {
            let pressure_name = format!("{}_pressure", name);
            write_region_values(
                file,
                path,
                &pressure_name,
                pressure,
                level_name,
                &[("units", "hPa")],
            )?;
        }
    }

    Ok(())
}

fn write_region_values(
    file: &mut netcdf::FileMut,
    path: &Path,
    name: &str,
    values: &RegionValues,
    level_name: &'static str,
    attrs: &[(&str, &str)],
) -> Result<(), IoAccessError> {
    let err = nc_err(path);

    let (dims, flat): (Vec<&str>, Vec<Float>) = match values {
        RegionValues::Series { data, .. } => {
            let (_, nlev) = data.dim();
            let dims = if nlev > 1 {
                vec!["year", level_name]
            } else {
                vec!["year"]
            };
            (dims, data.iter().copied().collect())
        }
        RegionValues::Stat(data) => {
            let dims = if data.len() > 1 {
                vec![level_name]
            } else {
                vec![]
            };
            (dims, data.iter().copied().collect())
        }
    };

    let mut var = file.add_variable::<Float>(name, &dims).map_err(&err)?;
    for (attr_name, attr_value) in attrs {
        var.put_attribute(attr_name, *attr_value).map_err(&err)?;
    }
    var.put_values(&flat, ..).map_err(&err)?;

    Ok(())
}

/// Reads one output entry back from `path`.
///
/// A missing file is reported as a file-access error so that callers
/// can fall back to the archive.
pub(crate) fn read_entry(
    path: &Path,
    cfg: &CalcConfig,
    spec: &OutputSpec,
) -> Result<OutputEntry, IoAccessError> {
    if !path.exists() {
        return Err(IoAccessError::FileAccess {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        });
    }

    let err = nc_err(path);
    let file = netcdf::open(path).map_err(&err)?;

    match spec.scope {
        Scope::Global => read_gridded(&file, path, cfg),
        Scope::Regional => read_regional(&file, path),
    }
}

fn read_years(file: &netcdf::File, path: &Path) -> Result<Vec<i32>, IoAccessError> {
    let err = nc_err(path);
    let var = file
        .variable("year")
        .ok_or_else(|| IoAccessError::MissingVariable {
            path: path.to_path_buf(),
            name: "year".to_string(),
        })?;
    var.get_values::<i32, _>(..).map_err(&err)
}

fn read_attr(var: &netcdf::Variable, name: &str) -> String {
    match var.attribute_value(name) {
        Some(Ok(netcdf::AttributeValue::Str(s))) => s,
        _ => String::new(),
    }
}

fn read_gridded(
    file: &netcdf::File,
    path: &Path,
    cfg: &CalcConfig,
) -> Result<OutputEntry, IoAccessError> {
    let err = nc_err(path);
    let var = file
        .variable(&cfg.var.name)
        .ok_or_else(|| IoAccessError::MissingVariable {
            path: path.to_path_buf(),
            name: cfg.var.name.clone(),
        })?;

    let dims = var.dimensions();
    let dim_names: Vec<String> = dims.iter().map(|d| d.name()).collect();
    let data = var.get_values::<Float, _>(..).map_err(&err)?;

    let has_year = dim_names.first().map(|n| n == "year").unwrap_or(false);
    let spatial: Vec<usize> = dims
        .iter()
        .skip(if has_year { 1 } else { 0 })
        .map(|d| d.len())
        .collect();

    let (nlev, nlat, nlon) = match spatial.len() {
        2 => (1, spatial[0], spatial[1]),
        3 => (spatial[0], spatial[1], spatial[2]),
        n => {
            return Err(IoAccessError::Netcdf {
                path: path.to_path_buf(),
                reason: format!("variable '{}' has {} spatial dimensions", cfg.var.name, n),
            })
        }
    };

    let values = if has_year {
        let years = read_years(file, path)?;
        let data = Array4::from_shape_vec((years.len(), nlev, nlat, nlon), data).map_err(|e| {
            IoAccessError::Netcdf {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        GriddedValues::Series { years, data }
    } else {
        let data = Array3::from_shape_vec((nlev, nlat, nlon), data).map_err(|e| {
            IoAccessError::Netcdf {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        GriddedValues::Stat(data)
    };

    Ok(OutputEntry {
        payload: OutputPayload::Gridded(values),
        units: read_attr(&var, "units"),
        description: read_attr(&var, "description"),
    })
}

fn read_regional(file: &netcdf::File, path: &Path) -> Result<OutputEntry, IoAccessError> {
    let mut regions: BTreeMap<String, RegionOutput> = BTreeMap::new();
    let mut units = String::new();
    let mut description = String::new();

    for var in file.variables() {
        let name = var.name();
        if COORD_NAMES.contains(&name.as_str()) || name.ends_with("_pressure") {
            continue;
        }

        let values = read_region_values(file, path, &name)?;
        let pressure_name = format!("{}_pressure", name);
        let pressure = if file.variable(&pressure_name).is_some() {
            Some(read_region_values(file, path, &pressure_name)?)
        } else {
            None
        };

        if units.is_empty() {
            units = read_attr(&var, "units");
        }
        if description.is_empty() {
            description = read_attr(&var, "description");
        }

        regions.insert(name, RegionOutput { values, pressure });
    }

    Ok(OutputEntry {
        payload: OutputPayload::Regional(regions),
        units,
        description,
    })
}

fn read_region_values(
    file: &netcdf::File,
    path: &Path,
    name: &str,
) -> Result<RegionValues, IoAccessError> {
    let err = nc_err(path);
    let var = file
        .variable(name)
        .ok_or_else(|| IoAccessError::MissingVariable {
            path: path.to_path_buf(),
            name: name.to_string(),
        })?;

    let dims = var.dimensions();
    let dim_names: Vec<String> = dims.iter().map(|d| d.name()).collect();
    let data = var.get_values::<Float, _>(..).map_err(&err)?;

    let has_year = dim_names.first().map(|n| n == "year").unwrap_or(false);
    if has_year {
        let years = read_years(file, path)?;
        let nlev = if dims.len() > 1 { dims[1].len() } else { 1 };
        let data = Array2::from_shape_vec((years.len(), nlev), data).map_err(|e| {
            IoAccessError::Netcdf {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        Ok(RegionValues::Series { years, data })
    } else {
        Ok(RegionValues::Stat(Array1::from_vec(data)))
    }
}

/// Merges new regional results over the regions already present in an
/// existing file. Unreadable or missing existing files contribute
/// nothing.
pub(crate) fn merge_regional(
    path: &Path,
    cfg: &CalcConfig,
    spec: &OutputSpec,
    entry: &OutputEntry,
) -> OutputEntry {
    let new_regions = match &entry.payload {
        OutputPayload::Regional(regions) => regions,
        _ => return entry.clone(),
    };

    let mut merged = match read_entry(path, cfg, spec) {
        Ok(OutputEntry {
            payload: OutputPayload::Regional(existing),
            ..
        }) => existing,
        _ => BTreeMap::new(),
    };

    for (name, output) in new_regions {
        merged.insert(name.clone(), output.clone());
    }

    OutputEntry {
        payload: OutputPayload::Regional(merged),
        units: entry.units.clone(),
        description: entry.description.clone(),
    }
}
