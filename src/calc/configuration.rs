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

//! Module responsible for assembling and checking the parameter set of
//! a single calculation.
//!
//! [`CalcParams`] carries everything a user specifies; its validated,
//! fully resolved form is [`CalcConfig`], built exactly once per
//! calculation and immutable afterwards. All checks that can fail
//! without touching any data — an unregistered run, a malformed output
//! tag, a reversed date range — fail here, before any I/O.

use crate::calc::descriptors::{Model, Proj, Run};
use crate::calc::outputs::{OutputSpec, Scope};
use crate::calc::region::Region;
use crate::calc::variable::Var;
use crate::errors::{CalcError, ConfigError};
use chrono::{Duration, NaiveDateTime};
use serde::Deserialize;
use std::sync::Arc;

/// Time resolution of the input data.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputInterval {
    Annual,
    Monthly,
    Daily,
    #[serde(rename = "6hr")]
    SixHourly,
    #[serde(rename = "3hr")]
    ThreeHourly,
}

impl InputInterval {
    pub fn label(self) -> &'static str {
        match self {
            InputInterval::Annual => "annual",
            InputInterval::Monthly => "monthly",
            InputInterval::Daily => "daily",
            InputInterval::SixHourly => "6hr",
            InputInterval::ThreeHourly => "3hr",
        }
    }
}

/// What the time axis of the input data represents: instantaneous
/// snapshots, averages over each time index, or one single average over
/// the whole date range.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputTimeKind {
    #[serde(rename = "inst")]
    Instantaneous,
    #[serde(rename = "ts")]
    TimeSeries,
    #[serde(rename = "av")]
    Average,
}

impl InputTimeKind {
    pub fn label(self) -> &'static str {
        match self {
            InputTimeKind::Instantaneous => "inst",
            InputTimeKind::TimeSeries => "ts",
            InputTimeKind::Average => "av",
        }
    }
}

/// Vertical coordinate system of the input data.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerticalCoord {
    /// Not defined vertically.
    None,
    /// Pressure-level coordinates.
    Pressure,
    /// Hybrid sigma-pressure coordinates.
    Sigma,
}

impl VerticalCoord {
    pub fn label(self) -> &'static str {
        match self {
            VerticalCoord::None => "",
            VerticalCoord::Pressure => "pressure",
            VerticalCoord::Sigma => "sigma",
        }
    }
}

/// Requested vertical reduction of the output.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertReduction {
    /// No vertical reduction, output stays defined vertically.
    None,
    /// Mass-weighted vertical average.
    VertAv,
    /// Mass-weighted vertical integral.
    VertInt,
}

impl VertReduction {
    pub fn label(self) -> &'static str {
        match self {
            VertReduction::None => "",
            VertReduction::VertAv => "vert_av",
            VertReduction::VertInt => "vert_int",
        }
    }
}

/// A meteorological season, named by its member months.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Season {
    Djf,
    Mam,
    Jja,
    Son,
}

impl Season {
    pub fn label(self) -> &'static str {
        match self {
            Season::Djf => "djf",
            Season::Mam => "mam",
            Season::Jja => "jja",
            Season::Son => "son",
        }
    }

    pub fn months(self) -> &'static [u32] {
        match self {
            Season::Djf => &[12, 1, 2],
            Season::Mam => &[3, 4, 5],
            Season::Jja => &[6, 7, 8],
            Season::Son => &[9, 10, 11],
        }
    }
}

const MONTH_LABELS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// The sub-annual time interval over which to compute: the full year, a
/// season, or a single calendar month.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Deserialize)]
#[serde(try_from = "String")]
pub enum Interval {
    Annual,
    Season(Season),
    Month(u32),
}

impl Interval {
    /// Interval covering a single calendar month (1 = January).
    pub fn month(month: u32) -> Result<Interval, ConfigError> {
        if !(1..=12).contains(&month) {
            return Err(ConfigError::OutOfBounds(
                "Output interval month must be between 1 and 12",
            ));
        }
        Ok(Interval::Month(month))
    }

    /// Calendar months selected by this interval.
    pub fn months(self) -> Vec<u32> {
        match self {
            Interval::Annual => (1..=12).collect(),
            Interval::Season(season) => season.months().to_vec(),
            Interval::Month(month) => vec![month],
        }
    }

    /// Label used in output file names.
    pub fn label(self) -> &'static str {
        match self {
            Interval::Annual => "ann",
            Interval::Season(season) => season.label(),
            Interval::Month(month) => MONTH_LABELS[(month - 1) as usize],
        }
    }
}

impl TryFrom<String> for Interval {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "ann" => return Ok(Interval::Annual),
            "djf" => return Ok(Interval::Season(Season::Djf)),
            "mam" => return Ok(Interval::Season(Season::Mam)),
            "jja" => return Ok(Interval::Season(Season::Jja)),
            "son" => return Ok(Interval::Season(Season::Son)),
            _ => {}
        }

        if let Some(index) = MONTH_LABELS.iter().position(|l| *l == value) {
            return Interval::month(index as u32 + 1);
        }
        if let Ok(month) = value.parse::<u32>() {
            return Interval::month(month);
        }

        Err(ConfigError::OutOfBounds(
            "Output interval must be 'ann', a season or a month",
        ))
    }
}

/// Constant offset applied to input timestamps, correcting for metadata
/// errors in the data source.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Deserialize)]
pub struct TimeOffset {
    #[serde(default)]
    pub days: i64,

    #[serde(default)]
    pub hours: i64,

    #[serde(default)]
    pub minutes: i64,
}

impl TimeOffset {
    pub fn as_duration(&self) -> Duration {
        Duration::days(self.days) + Duration::hours(self.hours) + Duration::minutes(self.minutes)
    }
}

/// User-facing parameter set for one calculation.
///
/// Output tags in `dtype_out_time` use the dot-separated grammar, e.g.
/// `"av"`, `"reg.ts"` or `"ann.reg.eddy.std"` without the interval part
/// (the interval is carried separately in `intvl_out`).
#[derive(Clone, Debug)]
pub struct CalcParams {
    pub proj: Arc<Proj>,
    pub model: Arc<Model>,
    pub run: Arc<Run>,
    pub var: Arc<Var>,
    /// Inclusive range of dates to operate on.
    pub date_range: (NaiveDateTime, NaiveDateTime),
    pub intvl_in: InputInterval,
    pub intvl_out: Interval,
    pub dtype_in_time: InputTimeKind,
    pub dtype_in_vert: VerticalCoord,
    pub dtype_out_time: Vec<String>,
    pub dtype_out_vert: VertReduction,
    pub regions: Vec<Region>,
    pub time_offset: Option<TimeOffset>,
    pub ens_mem: Option<usize>,
}

/// Fully resolved, validated parameter set of one calculation.
///
/// Holds the same information as [`CalcParams`] with the output tags
/// parsed into [`OutputSpec`] values. Built once, immutable thereafter.
#[derive(Clone, Debug)]
pub struct CalcConfig {
    pub proj: Arc<Proj>,
    pub model: Arc<Model>,
    pub run: Arc<Run>,
    pub var: Arc<Var>,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub intvl_in: InputInterval,
    pub intvl_out: Interval,
    pub dtype_in_time: InputTimeKind,
    pub dtype_in_vert: VerticalCoord,
    pub dtype_out_time: Vec<OutputSpec>,
    pub dtype_out_vert: VertReduction,
    pub regions: Vec<Region>,
    pub time_offset: Option<TimeOffset>,
    pub ens_mem: Option<usize>,
}

impl CalcConfig {
    /// Validates the parameters and resolves them into a config.
    pub fn from_params(params: CalcParams) -> Result<CalcConfig, CalcError> {
        if !params.model.has_run(&params.run.name) {
            return Err(ConfigError::UnknownRun {
                model: params.model.name.clone(),
                run: params.run.name.clone(),
            }
            .into());
        }

        params.model.grid.check_bounds()?;

        let (start_date, end_date) = params.date_range;
        if end_date < start_date {
            return Err(ConfigError::OutOfBounds("Date range end precedes its start").into());
        }

        let mut specs = Vec::with_capacity(params.dtype_out_time.len());
        for tag in &params.dtype_out_time {
            let spec = OutputSpec::parse(tag)?;
            if spec.scope == Scope::Regional && params.regions.is_empty() {
                return Err(ConfigError::InvalidOutputSpec {
                    tag: tag.clone(),
                    reason: "regional output requested but no regions configured".to_string(),
                }
                .into());
            }
            specs.push(spec);
        }

        for region in &params.regions {
            region.check_bounds()?;
        }

        Ok(CalcConfig {
            proj: params.proj,
            model: params.model,
            run: params.run,
            var: params.var,
            start_date,
            end_date,
            intvl_in: params.intvl_in,
            intvl_out: params.intvl_out,
            dtype_in_time: params.dtype_in_time,
            dtype_in_vert: params.dtype_in_vert,
            dtype_out_time: specs,
            dtype_out_vert: params.dtype_out_vert,
            regions: params.regions,
            time_offset: params.time_offset,
            ens_mem: params.ens_mem,
        })
    }

    /// Whether the computed series carries a genuine time axis, i.e.
    /// the variable is time-defined and the input is not already a
    /// single average.
    pub fn time_defined(&self) -> bool {
        self.var.def_time && self.dtype_in_time != InputTimeKind::Average
    }

    /// Whether a vertical reduction is both requested and applicable.
    pub fn vert_reduced(&self) -> bool {
        self.dtype_out_vert != VertReduction::None && self.var.def_vert
    }

    /// Calendar months selected by the output interval.
    pub fn months(&self) -> Vec<u32> {
        self.intvl_out.months()
    }
}
