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

//! Output specifications and the planner mapping them to reduced
//! results.
//!
//! An output tag such as `"reg.eddy.std"` is parsed exactly once into an
//! [`OutputSpec`] — which timeseries variant to read, whether to reduce
//! globally or per region, and which terminal reduction to apply — and
//! dispatched afterwards by exhaustive matching. Unsupported keywords
//! and incompatible modifier combinations fail at parse time.

use crate::calc::configuration::{CalcConfig, InputTimeKind, VertReduction};
use crate::calc::descriptors::ModelGrid;
use crate::calc::region::Region;
use crate::calc::timeseries::{VariantSet, YearlySeries};
use crate::calc::variable::Var;
use crate::constants::PA_TO_HPA;
use crate::errors::{CalcError, ReductionError};
use crate::Float;
use ndarray::{Array1, Array2, Array3, Array4, Axis};
use std::collections::BTreeMap;

/// Which timeseries variant an output reads.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SeriesVariant {
    Full,
    MonthlyMean,
    Eddy,
}

/// Whether an output is reduced gridpoint-by-gridpoint or per region.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Scope {
    Global,
    Regional,
}

/// Terminal reduction over the year axis.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Reduction {
    TimeSeries,
    Average,
    StdDev,
}

/// A fully parsed output specification.
#[derive(Clone, Debug)]
pub struct OutputSpec {
    /// The original tag, used as the output key and in file names.
    pub tag: String,
    pub variant: SeriesVariant,
    pub scope: Scope,
    pub reduction: Reduction,
    /// Subtract the zonal mean before reducing. Only valid on the
    /// full-resolution variant.
    pub zonal_asym: bool,
}

impl OutputSpec {
    /// Parses a dot-separated output tag.
    pub fn parse(tag: &str) -> Result<OutputSpec, ReductionError> {
        let tokens: Vec<&str> = tag.split('.').collect();
        let (last, modifiers) = match tokens.split_last() {
            Some(split) => split,
            None => return Err(ReductionError::UnsupportedReduction(tag.to_string())),
        };

        let reduction = match *last {
            "ts" => Reduction::TimeSeries,
            "av" => Reduction::Average,
            "std" => Reduction::StdDev,
            other => return Err(ReductionError::UnsupportedReduction(other.to_string())),
        };

        let mut eddy = false;
        let mut monthly = false;
        let mut regional = false;
        let mut zonal_asym = false;
        for modifier in modifiers {
            match *modifier {
                "eddy" => eddy = true,
                "time-mean" => monthly = true,
                "reg" => regional = true,
                "zasym" => zonal_asym = true,
                other => {
                    return Err(ReductionError::UnknownModifier {
                        tag: tag.to_string(),
                        modifier: other.to_string(),
                    })
                }
            }
        }

        if eddy && monthly {
            return Err(ReductionError::IncompatibleModifiers(tag.to_string()));
        }
        if zonal_asym && (eddy || monthly) {
            return Err(ReductionError::IncompatibleModifiers(tag.to_string()));
        }

        Ok(OutputSpec {
            tag: tag.to_string(),
            variant: if eddy {
                SeriesVariant::Eddy
            } else if monthly {
                SeriesVariant::MonthlyMean
            } else {
                SeriesVariant::Full
            },
            scope: if regional {
                Scope::Regional
            } else {
                Scope::Global
            },
            reduction,
            zonal_asym,
        })
    }
}

/// Gridpoint-by-gridpoint output values.
#[derive(Clone, Debug)]
pub enum GriddedValues {
    /// Yearly time-series over `(year, lev, lat, lon)`.
    Series {
        years: Vec<i32>,
        data: Array4<Float>,
    },
    /// Time-reduced field over `(lev, lat, lon)`.
    Stat(Array3<Float>),
}

/// Regional output values.
#[derive(Clone, Debug)]
pub enum RegionValues {
    /// Yearly time-series over `(year, lev)`.
    Series {
        years: Vec<i32>,
        data: Array2<Float>,
    },
    /// Time-reduced values over `(lev,)`.
    Stat(Array1<Float>),
}

/// The result for one region: its reduced values plus, on hybrid
/// coordinates without vertical reduction, the matching regional
/// pressure in hPa.
#[derive(Clone, Debug)]
pub struct RegionOutput {
    pub values: RegionValues,
    pub pressure: Option<RegionValues>,
}

/// One computed output, before metadata is attached.
#[derive(Clone, Debug)]
pub enum OutputPayload {
    Gridded(GriddedValues),
    Regional(BTreeMap<String, RegionOutput>),
}

impl OutputPayload {
    /// Applies a function to every data value in place. Pressure
    /// companions are left untouched.
    pub fn map_values(&mut self, f: impl Fn(Float) -> Float) {
        match self {
            OutputPayload::Gridded(GriddedValues::Series { data, .. }) => data.mapv_inplace(&f),
            OutputPayload::Gridded(GriddedValues::Stat(data)) => data.mapv_inplace(&f),
            OutputPayload::Regional(regions) => {
                for output in regions.values_mut() {
                    match &mut output.values {
                        RegionValues::Series { data, .. } => data.mapv_inplace(&f),
                        RegionValues::Stat(data) => data.mapv_inplace(&f),
                    }
                }
            }
        }
    }

    /// Restricts time-series payloads to the given year-axis indices.
    /// Time-reduced payloads pass through unchanged.
    pub fn select_years(&self, indices: &[usize]) -> OutputPayload {
        match self {
            OutputPayload::Gridded(GriddedValues::Series { years, data }) => {
                OutputPayload::Gridded(GriddedValues::Series {
                    years: indices.iter().map(|&i| years[i]).collect(),
                    data: data.select(Axis(0), indices),
                })
            }
            OutputPayload::Regional(regions) => OutputPayload::Regional(
                regions
                    .iter()
                    .map(|(name, output)| {
                        let values = match &output.values {
                            RegionValues::Series { years, data } => RegionValues::Series {
                                years: indices.iter().map(|&i| years[i]).collect(),
                                data: data.select(Axis(0), indices),
                            },
                            stat => stat.clone(),
                        };
                        (
                            name.clone(),
                            RegionOutput {
                                values,
                                pressure: output.pressure.clone(),
                            },
                        )
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Restricts vertically defined payloads to a single level index.
    pub fn select_level(&self, level: usize) -> OutputPayload {
        match self {
            OutputPayload::Gridded(GriddedValues::Series { years, data }) => {
                OutputPayload::Gridded(GriddedValues::Series {
                    years: years.clone(),
                    data: data.select(Axis(1), &[level]),
                })
            }
            OutputPayload::Gridded(GriddedValues::Stat(data)) => {
                OutputPayload::Gridded(GriddedValues::Stat(data.select(Axis(0), &[level])))
            }
            OutputPayload::Regional(regions) => OutputPayload::Regional(
                regions
                    .iter()
                    .map(|(name, output)| {
                        let values = match &output.values {
                            RegionValues::Series { years, data } => RegionValues::Series {
                                years: years.clone(),
                                data: data.select(Axis(1), &[level]),
                            },
                            RegionValues::Stat(data) => {
                                RegionValues::Stat(data.select(Axis(0), &[level]))
                            }
                        };
                        (
                            name.clone(),
                            RegionOutput {
                                values,
                                pressure: output.pressure.clone(),
                            },
                        )
                    })
                    .collect(),
            ),
        }
    }
}

/// One computed output with its attached metadata.
#[derive(Clone, Debug)]
pub struct OutputEntry {
    pub payload: OutputPayload,
    pub units: String,
    pub description: String,
}

/// Attaches units and description to a payload. Vertical integrals
/// rewrite the units string to note the integral and implied mass
/// units.
pub(crate) fn attach_metadata(
    payload: OutputPayload,
    var: &Var,
    dtype_out_vert: VertReduction,
) -> OutputEntry {
    let units = if dtype_out_vert == VertReduction::VertInt {
        if var.units.is_empty() {
            "(vertical integral of quantity with unspecified units)".to_string()
        } else {
            format!(
                "(vertical integral of {0}): {0} kg m^-2)",
                var.units
            )
        }
    } else {
        var.units.clone()
    };

    OutputEntry {
        payload,
        units,
        description: var.description.clone(),
    }
}

/// Applies every requested reduction, returning the results keyed by
/// their tags. `BTreeMap` keeps the emitted mapping lexicographically
/// sorted regardless of request order.
pub(crate) fn apply_all_reductions(
    cfg: &CalcConfig,
    variants: &VariantSet,
    pfull: Option<&YearlySeries>,
    grid: &ModelGrid,
) -> Result<BTreeMap<String, OutputPayload>, CalcError> {
    let mut reduced = BTreeMap::new();

    for spec in &cfg.dtype_out_time {
        let source = variants
            .select(spec)
            .ok_or_else(|| ReductionError::UnsupportedReduction(spec.tag.clone()))?;

        let payload = match spec.scope {
            Scope::Global => OutputPayload::Gridded(reduce_time(cfg, spec, source)),
            Scope::Regional => {
                let mut regions = BTreeMap::new();
                for region in &cfg.regions {
                    regions.insert(
                        region.name.clone(),
                        reduce_region(cfg, spec, source, pfull, region, grid),
                    );
                }
                OutputPayload::Regional(regions)
            }
        };

        reduced.insert(spec.tag.clone(), payload);
    }

    Ok(reduced)
}

/// Plain time reduction over the year axis. Data that is already a
/// single average passes through unchanged.
fn reduce_time(cfg: &CalcConfig, spec: &OutputSpec, source: &YearlySeries) -> GriddedValues {
    if cfg.dtype_in_time == InputTimeKind::Average {
        return GriddedValues::Series {
            years: source.years.clone(),
            data: source.values.clone(),
        };
    }

    let (_, nlev, nlat, nlon) = source.values.dim();
    match spec.reduction {
        Reduction::TimeSeries => GriddedValues::Series {
            years: source.years.clone(),
            data: source.values.clone(),
        },
        Reduction::Average => GriddedValues::Stat(
            source
                .values
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array3::from_elem((nlev, nlat, nlon), Float::NAN)),
        ),
        Reduction::StdDev => GriddedValues::Stat(source.values.std_axis(Axis(0), 0.0)),
    }
}

/// Regional reduction for one region, including the pressure companion
/// on hybrid-coordinate data without vertical reduction.
fn reduce_region(
    cfg: &CalcConfig,
    spec: &OutputSpec,
    source: &YearlySeries,
    pfull: Option<&YearlySeries>,
    region: &Region,
    grid: &ModelGrid,
) -> RegionOutput {
    // Data averaged over the whole range already: just pass it along.
    let values = if cfg.dtype_in_time == InputTimeKind::Average {
        RegionValues::Series {
            years: source.years.clone(),
            data: region.ts(&source.values, grid),
        }
    } else {
        match spec.reduction {
            Reduction::TimeSeries => RegionValues::Series {
                years: source.years.clone(),
                data: region.ts(&source.values, grid),
            },
            Reduction::Average => RegionValues::Stat(region.av(&source.values, grid)),
            Reduction::StdDev => RegionValues::Stat(region.std(&source.values, grid)),
        }
    };

    let pressure = pfull.map(|pfull| {
        // Standard deviation is not applied to a coordinate; anything
        // but a plain average keeps the pressure as a time-series.
        let reduced = match spec.reduction {
            Reduction::Average => RegionValues::Stat(region.av(&pfull.values, grid)),
            _ => RegionValues::Series {
                years: pfull.years.clone(),
                data: region.ts(&pfull.values, grid),
            },
        };
        scale_region_values(reduced, PA_TO_HPA)
    });

    RegionOutput { values, pressure }
}

fn scale_region_values(values: RegionValues, factor: Float) -> RegionValues {
    match values {
        RegionValues::Series { years, data } => RegionValues::Series {
            years,
            data: data * factor,
        },
        RegionValues::Stat(data) => RegionValues::Stat(data * factor),
    }
}
