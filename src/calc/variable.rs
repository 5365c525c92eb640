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

//! Variable definitions.
//!
//! A [`Var`] describes a physical quantity: its units and description,
//! in which dimensions it is defined, and, for derived quantities, the
//! pure function computing it from a tuple of inputs. Variables are
//! immutable once constructed.

use crate::errors::InputError;
use crate::Float;
use ndarray::{Array1, Array2, Array4};
use std::fmt;
use std::sync::Arc;

/// The representation a variable's defining function expects its
/// inputs in.
///
/// `Labeled` functions receive inputs with their coordinate metadata
/// still attached upstream; `Raw` functions receive bare arrays. The
/// two are handled identically by the engine since [`Operand`] always
/// carries bare views, but the distinction is kept so that loaders can
/// prepare data accordingly. `Dataset` inputs are not implemented and
/// fail fast when a calculation is gathered.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FuncInputKind {
    Labeled,
    Raw,
    Dataset,
}

impl FuncInputKind {
    pub fn label(self) -> &'static str {
        match self {
            FuncInputKind::Labeled => "labeled",
            FuncInputKind::Raw => "raw",
            FuncInputKind::Dataset => "dataset",
        }
    }
}

/// One input slot of a variable's defining function.
///
/// Besides other variables and numeric constants, functions may request
/// pressure and pressure thickness (resolved from the configured
/// vertical coordinate system) and static grid arrays of the model.
#[derive(Clone)]
pub enum InputSpec {
    /// Another variable, loaded through the data loader.
    Field(Arc<Var>),
    /// A numeric constant, passed through unchanged.
    Constant(Float),
    /// Full-level pressure on the configured vertical coordinates.
    Pressure,
    /// Pressure thickness of model levels.
    PressureThickness,
    /// The model's latitude array.
    Latitude,
    /// The model's longitude array.
    Longitude,
    /// The model's per-cell surface area.
    SurfaceArea,
}

impl fmt::Debug for InputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSpec::Field(var) => write!(f, "Field({})", var.name),
            InputSpec::Constant(c) => write!(f, "Constant({})", c),
            InputSpec::Pressure => write!(f, "Pressure"),
            InputSpec::PressureThickness => write!(f, "PressureThickness"),
            InputSpec::Latitude => write!(f, "Latitude"),
            InputSpec::Longitude => write!(f, "Longitude"),
            InputSpec::SurfaceArea => write!(f, "SurfaceArea"),
        }
    }
}

/// A single argument handed to a variable's defining function.
///
/// Timeseries values are always shaped `(time, lev, lat, lon)` with a
/// length-1 level axis for quantities not defined vertically.
#[derive(Copy, Clone, Debug)]
pub enum Operand<'a> {
    Constant(Float),
    /// A 1-d coordinate array (latitude, longitude or levels).
    Axis(&'a Array1<Float>),
    /// A 2-d static grid array over (lat, lon).
    Grid(&'a Array2<Float>),
    /// A timeseries over (time, lev, lat, lon).
    Series(&'a Array4<Float>),
}

impl<'a> Operand<'a> {
    /// The operand as a timeseries array, or a shape-mismatch error.
    pub fn series(&self) -> Result<&'a Array4<Float>, InputError> {
        match self {
            Operand::Series(arr) => Ok(arr),
            other => Err(InputError::ShapeMismatch {
                name: "operand".to_string(),
                reason: format!("expected a timeseries operand, got {:?}", other),
            }),
        }
    }

    /// The operand as a numeric constant, or a shape-mismatch error.
    pub fn constant(&self) -> Result<Float, InputError> {
        match self {
            Operand::Constant(c) => Ok(*c),
            other => Err(InputError::ShapeMismatch {
                name: "operand".to_string(),
                reason: format!("expected a constant operand, got {:?}", other),
            }),
        }
    }

    /// The operand as a 1-d coordinate array, or a shape-mismatch error.
    pub fn axis(&self) -> Result<&'a Array1<Float>, InputError> {
        match self {
            Operand::Axis(arr) => Ok(arr),
            other => Err(InputError::ShapeMismatch {
                name: "operand".to_string(),
                reason: format!("expected a coordinate operand, got {:?}", other),
            }),
        }
    }

    /// The operand as a 2-d grid array, or a shape-mismatch error.
    pub fn grid(&self) -> Result<&'a Array2<Float>, InputError> {
        match self {
            Operand::Grid(arr) => Ok(arr),
            other => Err(InputError::ShapeMismatch {
                name: "operand".to_string(),
                reason: format!("expected a grid operand, got {:?}", other),
            }),
        }
    }
}

/// Defining function of a derived variable: a pure map from the input
/// tuple to the output timeseries.
pub type VarFunc =
    Arc<dyn Fn(&[Operand]) -> Result<Array4<Float>, InputError> + Send + Sync>;

/// Definition of a physical variable.
#[derive(Clone)]
pub struct Var {
    pub name: String,

    pub units: String,

    pub description: String,

    /// Domain tag handed to the data loader, e.g. "atmos".
    pub domain: String,

    /// Whether the variable is defined along the time axis.
    pub def_time: bool,

    /// Whether the variable is defined along the vertical axis.
    pub def_vert: bool,

    /// _(Optional)_ Range of physically meaningful values; everything
    /// outside is replaced by NaN when loading with masking enabled.
    pub valid_range: Option<(Float, Float)>,

    pub func_input: FuncInputKind,

    /// Defining function; absent for variables loaded directly.
    pub func: Option<VarFunc>,

    /// Input tuple of the defining function. Empty means the variable
    /// itself is loaded from the data source.
    pub variables: Vec<InputSpec>,
}

impl Var {
    /// A variable loaded directly from the data source.
    pub fn loaded(
        name: &str,
        units: &str,
        description: &str,
        domain: &str,
        def_time: bool,
        def_vert: bool,
    ) -> Var {
        Var {
            name: name.to_string(),
            units: units.to_string(),
            description: description.to_string(),
            domain: domain.to_string(),
            def_time,
            def_vert,
            valid_range: None,
            func_input: FuncInputKind::Labeled,
            func: None,
            variables: Vec::new(),
        }
    }

    /// A variable computed from other inputs by a defining function.
    pub fn computed(
        name: &str,
        units: &str,
        description: &str,
        domain: &str,
        def_time: bool,
        def_vert: bool,
        variables: Vec<InputSpec>,
        func: VarFunc,
    ) -> Var {
        Var {
            name: name.to_string(),
            units: units.to_string(),
            description: description.to_string(),
            domain: domain.to_string(),
            def_time,
            def_vert,
            valid_range: None,
            func_input: FuncInputKind::Labeled,
            func: Some(func),
            variables,
        }
    }

    /// Replaces values outside the valid range with NaN. Identity when
    /// no valid range is declared.
    pub fn mask_unphysical(&self, value: Float) -> Float {
        match self.valid_range {
            Some((lo, hi)) if value < lo || value > hi => Float::NAN,
            _ => value,
        }
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var")
            .field("name", &self.name)
            .field("units", &self.units)
            .field("def_time", &self.def_time)
            .field("def_vert", &self.def_vert)
            .field("func_input", &self.func_input)
            .field("variables", &self.variables)
            .finish()
    }
}

/// Surface pressure, loaded internally whenever pressure or pressure
/// thickness has to be resolved.
pub(crate) fn surface_pressure_var() -> Var {
    Var::loaded("ps", "Pa", "Surface pressure.", "atmos", true, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    #[test]
    fn mask_unphysical_without_range_is_identity() {
        let var = Var::loaded("t", "K", "Temperature.", "atmos", true, true);
        assert_eq!(var.mask_unphysical(-1.0e3), -1.0e3);
    }

    #[test]
    fn mask_unphysical_replaces_outliers() {
        let mut var = Var::loaded("precip", "kg m^-2 s^-1", "Rain.", "atmos", true, false);
        var.valid_range = Some((0.0, 1.0));
        assert!(var.mask_unphysical(-0.5).is_nan());
        assert!(var.mask_unphysical(2.0).is_nan());
        assert_eq!(var.mask_unphysical(0.3), 0.3);
    }

    #[test]
    fn operand_accessors_enforce_kind() {
        let arr = Array4::<Float>::zeros((1, 1, 2, 2));
        let op = Operand::Series(&arr);
        assert!(op.series().is_ok());
        assert!(op.constant().is_err());

        let c = Operand::Constant(2.5);
        assert_eq!(c.constant().unwrap(), 2.5);
        assert!(c.series().is_err());
    }
}
