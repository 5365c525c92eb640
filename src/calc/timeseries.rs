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

//! Module building the canonical timeseries variants of a calculation.
//!
//! Three variants are derived from the raw inputs, each only when some
//! requested output needs it:
//!
//! - full resolution: the variable's function evaluated at every input
//!   timestep;
//! - monthly mean: the function evaluated on inputs collapsed to one
//!   duration-weighted value per calendar month;
//! - eddy: full resolution minus the monthly mean broadcast back onto
//!   every timestep of its month.
//!
//! Vertical reduction happens here too, before the variants are folded
//! into one duration-weighted value per calendar year.

use crate::calc::configuration::{InputTimeKind, VertReduction};
use crate::calc::loader::GriddedSeries;
use crate::calc::outputs::{OutputSpec, SeriesVariant};
use crate::calc::pressure::int_dp_g;
use crate::calc::variable::{Operand, Var};
use crate::constants::{GRAV_EARTH, SECONDS_PER_DAY};
use crate::errors::{CalcError, CoordinateError, InputError};
use crate::Float;
use chrono::{Datelike, NaiveDateTime};
use ndarray::{Array1, Array2, Array4, Axis};
use rustc_hash::FxHashMap;

/// One input of the calculation, gathered by the engine.
#[derive(Clone, Debug)]
pub(crate) enum InputData {
    Constant(Float),
    Axis(Array1<Float>),
    Grid(Array2<Float>),
    Series(GriddedSeries),
}

impl InputData {
    fn operand(&self) -> Operand<'_> {
        match self {
            InputData::Constant(c) => Operand::Constant(*c),
            InputData::Axis(arr) => Operand::Axis(arr),
            InputData::Grid(arr) => Operand::Grid(arr),
            InputData::Series(series) => Operand::Series(&series.values),
        }
    }
}

/// Which timeseries variants the requested outputs need.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct VariantRequest {
    pub full: bool,
    pub monthly: bool,
    pub eddy: bool,
    pub zonal_asym: bool,
}

impl VariantRequest {
    pub fn from_specs(specs: &[OutputSpec]) -> VariantRequest {
        VariantRequest {
            // The full variant is only skippable when every output
            // wants the monthly mean.
            full: !specs
                .iter()
                .all(|s| s.variant == SeriesVariant::MonthlyMean),
            monthly: specs.iter().any(|s| {
                matches!(s.variant, SeriesVariant::MonthlyMean | SeriesVariant::Eddy)
            }),
            eddy: specs.iter().any(|s| s.variant == SeriesVariant::Eddy),
            zonal_asym: specs.iter().any(|s| s.zonal_asym),
        }
    }
}

/// A variant folded to one value per calendar year.
#[derive(Clone, Debug)]
pub struct YearlySeries {
    pub years: Vec<i32>,
    /// Values over `(year, lev, lat, lon)`.
    pub values: Array4<Float>,
}

/// The computed variants of one calculation.
#[derive(Clone, Debug, Default)]
pub(crate) struct VariantSet {
    pub full: Option<YearlySeries>,
    pub monthly: Option<YearlySeries>,
    pub eddy: Option<YearlySeries>,
    pub zonal_asym: Option<YearlySeries>,
}

impl VariantSet {
    /// The variant backing the given output spec.
    pub fn select(&self, spec: &OutputSpec) -> Option<&YearlySeries> {
        if spec.zonal_asym {
            return self.zonal_asym.as_ref();
        }
        match spec.variant {
            SeriesVariant::Full => self.full.as_ref(),
            SeriesVariant::MonthlyMean => self.monthly.as_ref(),
            SeriesVariant::Eddy => self.eddy.as_ref(),
        }
    }
}

/// An unfolded timeseries with its duration weights in day units.
#[derive(Clone, Debug)]
struct RawSeries {
    time: Vec<NaiveDateTime>,
    dt_days: Array1<Float>,
    values: Array4<Float>,
}

/// Builder deriving the requested variants from gathered inputs.
///
/// `dp` and `ps` are the pressure thickness and surface pressure on the
/// full input time axis; the engine provides them whenever a vertical
/// reduction is requested for a vertically defined variable.
pub(crate) struct TimeSeriesBuilder<'a> {
    pub var: &'a Var,
    pub dtype_in_time: InputTimeKind,
    pub dtype_out_vert: VertReduction,
    pub dp: Option<&'a GriddedSeries>,
    pub ps: Option<&'a GriddedSeries>,
}

impl<'a> TimeSeriesBuilder<'a> {
    pub fn build(
        &self,
        inputs: &[InputData],
        request: VariantRequest,
    ) -> Result<VariantSet, CalcError> {
        let mut variants = VariantSet::default();

        let full_raw = if request.full || request.eddy || request.zonal_asym {
            Some(self.compute_raw(inputs, false)?)
        } else {
            None
        };

        let monthly_raw = if request.monthly {
            Some(self.compute_raw(inputs, true)?)
        } else {
            None
        };

        if request.eddy {
            if let (Some(full), Some(monthly)) = (&full_raw, &monthly_raw) {
                let broadcast = monthly_at_each_timestep(
                    &monthly.values,
                    &monthly.time,
                    &full.time,
                )?;
                variants.eddy = Some(self.fold(RawSeries {
                    time: full.time.clone(),
                    dt_days: full.dt_days.clone(),
                    values: &full.values - &broadcast,
                }));
            }
        }

        if request.zonal_asym {
            if let Some(full) = &full_raw {
                let lon_mean = full
                    .values
                    .mean_axis(Axis(3))
                    .ok_or_else(|| InputError::ShapeMismatch {
                        name: self.var.name.clone(),
                        reason: "empty longitude axis".to_string(),
                    })?
                    .insert_axis(Axis(3));
                variants.zonal_asym = Some(self.fold(RawSeries {
                    time: full.time.clone(),
                    dt_days: full.dt_days.clone(),
                    values: &full.values - &lon_mean,
                }));
            }
        }

        if request.full {
            if let Some(full) = full_raw {
                variants.full = Some(self.fold(full));
            }
        }
        if let Some(monthly) = monthly_raw {
            variants.monthly = Some(self.fold(monthly));
        }

        Ok(variants)
    }

    /// Evaluates the variable's function on the inputs, applies the
    /// vertical reduction if requested, and returns the unfolded
    /// series. With `monthly` set, every timeseries input (and the
    /// pressure data) is first collapsed to monthly means.
    fn compute_raw(&self, inputs: &[InputData], monthly: bool) -> Result<RawSeries, CalcError> {
        let prepared: Vec<InputData>;
        let inputs = if monthly {
            prepared = inputs
                .iter()
                .map(|input| match input {
                    InputData::Series(series) => InputData::Series(monthly_collapse(series)),
                    other => other.clone(),
                })
                .collect();
            prepared.as_slice()
        } else {
            inputs
        };

        let template = inputs
            .iter()
            .find_map(|input| match input {
                InputData::Series(series) => Some(series),
                _ => None,
            })
            .ok_or_else(|| InputError::NoSeriesInput(self.var.name.clone()))?;

        for input in inputs {
            if let InputData::Series(series) = input {
                if series.time != template.time {
                    return Err(InputError::ShapeMismatch {
                        name: self.var.name.clone(),
                        reason: "timeseries inputs disagree on the time axis".to_string(),
                    }
                    .into());
                }
            }
        }

        let time = template.time.clone();
        let dt_days = &template.dt_seconds / SECONDS_PER_DAY;

        let operands: Vec<Operand> = inputs.iter().map(InputData::operand).collect();
        let mut values = match &self.var.func {
            Some(func) => func(&operands)?,
            None => template.values.clone(),
        };

        if values.dim().0 != time.len() {
            return Err(InputError::ShapeMismatch {
                name: self.var.name.clone(),
                reason: format!(
                    "function produced {} timesteps for {} input timesteps",
                    values.dim().0,
                    time.len()
                ),
            }
            .into());
        }

        if self.dtype_out_vert != VertReduction::None && self.var.def_vert {
            values = self.reduce_vertical(values, monthly)?;
        }

        Ok(RawSeries {
            time,
            dt_days,
            values,
        })
    }

    /// Mass-weighted vertical integral or average.
    fn reduce_vertical(
        &self,
        values: Array4<Float>,
        monthly: bool,
    ) -> Result<Array4<Float>, CalcError> {
        let dp = self
            .dp
            .ok_or(CoordinateError::MissingSurfacePressure("dp"))?;
        let ps = self
            .ps
            .ok_or(CoordinateError::MissingSurfacePressure("ps"))?;

        let (dp_values, ps_values) = if monthly {
            (monthly_collapse(dp).values, monthly_collapse(ps).values)
        } else {
            (dp.values.clone(), ps.values.clone())
        };

        if dp_values.dim() != values.dim() {
            return Err(InputError::ShapeMismatch {
                name: self.var.name.clone(),
                reason: format!(
                    "pressure thickness shape {:?} does not match data shape {:?}",
                    dp_values.dim(),
                    values.dim()
                ),
            }
            .into());
        }

        let mut reduced = int_dp_g(&values, &dp_values);
        if self.dtype_out_vert == VertReduction::VertAv {
            reduced = reduced * GRAV_EARTH / &ps_values;
        }
        Ok(reduced)
    }

    /// Folds the series into one value per calendar year, except for
    /// data without a genuine time axis, which passes through with its
    /// timestep years as labels.
    fn fold(&self, raw: RawSeries) -> YearlySeries {
        let time_defined = self.var.def_time && self.dtype_in_time != InputTimeKind::Average;
        if time_defined {
            yearly_average(&raw.values, &raw.dt_days, &raw.time)
        } else {
            YearlySeries {
                years: raw.time.iter().map(|t| t.year()).collect(),
                values: raw.values,
            }
        }
    }
}

/// Collapses a series to one duration-weighted value per calendar
/// month. The duration of each monthly value is the summed duration of
/// its members.
pub(crate) fn monthly_collapse(series: &GriddedSeries) -> GriddedSeries {
    let mut group_of: FxHashMap<(i32, u32), usize> = FxHashMap::default();
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (t, stamp) in series.time.iter().enumerate() {
        let key = (stamp.year(), stamp.month());
        let g = *group_of.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[g].push(t);
    }

    let (_, nlev, nlat, nlon) = series.values.dim();
    let mut values = Array4::<Float>::zeros((groups.len(), nlev, nlat, nlon));
    let mut dt_seconds = Array1::<Float>::zeros(groups.len());
    let mut time = Vec::with_capacity(groups.len());

    for (g, members) in groups.iter().enumerate() {
        let wsum: Float = members.iter().map(|&t| series.dt_seconds[t]).sum();
        dt_seconds[g] = wsum;
        time.push(series.time[members[0]]);

        let mut row = values.index_axis_mut(Axis(0), g);
        for &t in members {
            let weighted = &series.values.index_axis(Axis(0), t) * series.dt_seconds[t];
            row += &weighted;
        }
        if wsum > 0.0 {
            row /= wsum;
        }
    }

    GriddedSeries {
        time,
        dt_seconds,
        level: series.level.clone(),
        lat: series.lat.clone(),
        lon: series.lon.clone(),
        values,
    }
}

/// Broadcasts monthly values back onto every timestep of their month,
/// aligned by (year, month).
pub(crate) fn monthly_at_each_timestep(
    monthly_values: &Array4<Float>,
    monthly_time: &[NaiveDateTime],
    target_time: &[NaiveDateTime],
) -> Result<Array4<Float>, InputError> {
    let mut index_of: FxHashMap<(i32, u32), usize> = FxHashMap::default();
    for (g, stamp) in monthly_time.iter().enumerate() {
        index_of.insert((stamp.year(), stamp.month()), g);
    }

    let (_, nlev, nlat, nlon) = monthly_values.dim();
    let mut out = Array4::<Float>::zeros((target_time.len(), nlev, nlat, nlon));

    for (t, stamp) in target_time.iter().enumerate() {
        let g = index_of
            .get(&(stamp.year(), stamp.month()))
            .copied()
            .ok_or_else(|| InputError::MissingMonth(stamp.to_string()))?;
        out.index_axis_mut(Axis(0), t)
            .assign(&monthly_values.index_axis(Axis(0), g));
    }

    Ok(out)
}

/// Averages the series within each calendar year, weighted by the
/// per-timestep durations.
pub(crate) fn yearly_average(
    values: &Array4<Float>,
    dt_days: &Array1<Float>,
    time: &[NaiveDateTime],
) -> YearlySeries {
    let mut group_of: FxHashMap<i32, usize> = FxHashMap::default();
    let mut years: Vec<i32> = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();

    for (t, stamp) in time.iter().enumerate() {
        let g = *group_of.entry(stamp.year()).or_insert_with(|| {
            years.push(stamp.year());
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[g].push(t);
    }

    let (_, nlev, nlat, nlon) = values.dim();
    let mut out = Array4::<Float>::zeros((groups.len(), nlev, nlat, nlon));

    for (g, members) in groups.iter().enumerate() {
        let wsum: Float = members.iter().map(|&t| dt_days[t]).sum();
        let mut row = out.index_axis_mut(Axis(0), g);
        for &t in members {
            let weighted = &values.index_axis(Axis(0), t) * dt_days[t];
            row += &weighted;
        }
        if wsum > 0.0 {
            row /= wsum;
        }
    }

    YearlySeries { years, values: out }
}
