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

//! Climate Analysis and Diagnostics Engine (CADE) computes derived
//! diagnostics from gridded climate-model output.
//!
//! Given a variable definition (a function of one or more input fields),
//! a spatiotemporal domain and a set of requested output reductions, the
//! engine loads the required input fields, evaluates the variable's
//! defining function, applies vertical-coordinate-aware physical
//! reductions, temporal reductions and regional-mask reductions, attaches
//! metadata and persists the results to per-output NetCDF files and an
//! incrementally maintained tar archive.
//!
//! The entry point is [`calc::Calc`], configured through
//! [`calc::CalcParams`]. Data acquisition is delegated to an
//! implementation of [`calc::DataLoader`] provided by the caller; batch
//! submission of many calculations is likewise the caller's concern.

pub mod calc;
pub mod constants;
pub mod errors;

/// Floating point type used throughout the engine.
pub type Float = f64;
