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

//! Error types of the engine, one enum per concern.
//!
//! Configuration, coordinate, reduction and input errors are fatal: they
//! indicate a request the engine cannot satisfy and are raised at the
//! point of dispatch (or, where possible, already when the calculation is
//! configured). Output-file access errors are recoverable exactly once:
//! a failed working-directory read falls back to the archive, and an
//! archive read failure propagates.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CalcError {
    #[error("Error in calculation configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Error while resolving vertical coordinates: {0}")]
    Coordinate(#[from] CoordinateError),

    #[error("Error in requested output reduction: {0}")]
    Reduction(#[from] ReductionError),

    #[error("Error while acquiring input data: {0}")]
    Input(#[from] InputError),

    #[error("Error while accessing output files: {0}")]
    IoAccess(#[from] IoAccessError),

    #[error("Error while updating the output archive: {0}")]
    Archive(#[from] ArchiveError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Model '{model}' has no run '{run}'")]
    UnknownRun { model: String, run: String },

    #[error("Configuration component is out of bounds: {0}")]
    OutOfBounds(&'static str),

    #[error("Output specification '{tag}' is invalid: {reason}")]
    InvalidOutputSpec { tag: String, reason: String },

    #[error("Cannot open definition file: {0}")]
    CantOpenFile(#[from] std::io::Error),

    #[error("Cannot deserialize definition file: {0}")]
    CantDeserialize(#[from] serde_yaml::Error),
}

#[derive(Error, Debug)]
pub enum CoordinateError {
    #[error("Vertical coordinate type '{0}' does not support pressure data")]
    UnsupportedVerticalCoord(&'static str),

    #[error("Pressure levels must be ordered from the surface upward")]
    UnorderedLevels,

    #[error("Model '{0}' declares pressure-level coordinates but provides no levels")]
    MissingLevels(String),

    #[error("Model '{0}' declares hybrid coordinates but provides no bk/pk coefficients")]
    MissingHybridCoefficients(String),

    #[error("Surface pressure data is required for '{0}' but was not loaded")]
    MissingSurfacePressure(&'static str),
}

#[derive(Error, Debug)]
pub enum ReductionError {
    #[error("Specified time-reduction method '{0}' is not supported")]
    UnsupportedReduction(String),

    #[error("Output specification '{tag}' contains unknown modifier '{modifier}'")]
    UnknownModifier { tag: String, modifier: String },

    #[error("Output specification '{0}' combines modifiers that cannot be used together")]
    IncompatibleModifiers(String),

    #[error("Output specification '{0}' requires regions but none were configured")]
    MissingRegions(String),
}

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Function input type '{0}' is not supported")]
    UnsupportedFunctionInput(String),

    #[error("Dataset-typed function inputs are not implemented")]
    DatasetInputUnimplemented,

    #[error("Variable '{0}' has no timeseries input to take the time axis from")]
    NoSeriesInput(String),

    #[error("Input data for '{name}' has inconsistent shape: {reason}")]
    ShapeMismatch { name: String, reason: String },

    #[error("No monthly mean available for timestep {0}")]
    MissingMonth(String),

    #[error("Data loader failed for variable '{name}': {reason}")]
    Load { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum IoAccessError {
    #[error("Cannot access '{}': {source}", path.display())]
    FileAccess {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("NetCDF failure on '{}': {reason}", path.display())]
    Netcdf { path: PathBuf, reason: String },

    #[error("Output file '{}' holds no variable '{name}'", path.display())]
    MissingVariable { path: PathBuf, name: String },

    #[error("Archive '{}' holds no member '{member}'", path.display())]
    MissingMember { path: PathBuf, member: String },

    #[error("Project '{0}' has no archive directory configured")]
    NoArchiveConfigured(String),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Cannot update archive: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive member '{0}' could not be replaced")]
    ReplaceFailed(String),
}
