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

//! Module resolving full-level pressure and pressure thickness from
//! surface pressure, branching on the vertical coordinate system.
//!
//! On pressure-level coordinates the levels themselves are the pressure
//! and thickness follows from half-level midpoints capped at the local
//! surface pressure. On hybrid sigma-pressure coordinates both follow
//! from the model's `bk`/`pk` half-level coefficients via
//! `p = pk + bk * ps`.

use crate::calc::configuration::VerticalCoord;
use crate::calc::descriptors::ModelGrid;
use crate::calc::loader::GriddedSeries;
use crate::constants::{GRAV_EARTH, P_BOT, P_TOP};
use crate::errors::CoordinateError;
use crate::Float;
use ndarray::{Array1, Array4, Axis};

/// Pressure-related quantity that can be requested from the resolver.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PressureQuantity {
    /// Full-level pressure, in Pa.
    Pressure,
    /// Pressure thickness of each model layer, in Pa.
    Thickness,
}

/// Resolver for pressure quantities on a fixed model grid and vertical
/// coordinate system.
#[derive(Clone, Debug)]
pub struct PressureResolver<'a> {
    grid: &'a ModelGrid,
    model_name: &'a str,
    coord: VerticalCoord,
}

impl<'a> PressureResolver<'a> {
    pub fn new(grid: &'a ModelGrid, model_name: &'a str, coord: VerticalCoord) -> Self {
        PressureResolver {
            grid,
            model_name,
            coord,
        }
    }

    /// Resolves the requested quantity over the time axis of the given
    /// surface pressure series.
    ///
    /// `data_level` is the pressure-level coordinate found on the input
    /// data, taking precedence over the model's own levels.
    pub fn resolve(
        &self,
        quantity: PressureQuantity,
        ps: &GriddedSeries,
        data_level: Option<&Array1<Float>>,
    ) -> Result<Array4<Float>, CoordinateError> {
        match self.coord {
            VerticalCoord::Pressure => self.resolve_on_p_coords(quantity, ps, data_level),
            VerticalCoord::Sigma => self.resolve_on_sigma_coords(quantity, ps),
            VerticalCoord::None => Err(CoordinateError::UnsupportedVerticalCoord("none")),
        }
    }

    /// Pressure or thickness for data on pressure-level coordinates.
    fn resolve_on_p_coords(
        &self,
        quantity: PressureQuantity,
        ps: &GriddedSeries,
        data_level: Option<&Array1<Float>>,
    ) -> Result<Array4<Float>, CoordinateError> {
        let levels = data_level
            .or(self.grid.level.as_ref())
            .ok_or_else(|| CoordinateError::MissingLevels(self.model_name.to_string()))?;

        if levels.windows(2).into_iter().any(|w| w[0] <= w[1]) {
            return Err(CoordinateError::UnorderedLevels);
        }

        let (nt, _, nlat, nlon) = ps.values.dim();
        let nlev = levels.len();

        match quantity {
            PressureQuantity::Pressure => Ok(Array4::from_shape_fn(
                (nt, nlev, nlat, nlon),
                |(_, k, _, _)| levels[k],
            )),
            PressureQuantity::Thickness => {
                // Layer edges halfway between successive level centers,
                // bounded by P_BOT below and P_TOP above.
                let mut edges = Vec::with_capacity(nlev + 1);
                edges.push(P_BOT);
                for k in 1..nlev {
                    edges.push(0.5 * (levels[k - 1] + levels[k]));
                }
                edges.push(P_TOP);

                // Capping every edge at the local surface pressure
                // zeroes out layers fully beneath the surface and
                // truncates the straddling layer, so the thicknesses
                // sum to ps exactly.
                let dp = Array4::from_shape_fn((nt, nlev, nlat, nlon), |(t, k, j, i)| {
                    let sp = ps.values[[t, 0, j, i]];
                    edges[k].min(sp) - edges[k + 1].min(sp)
                });
                Ok(dp)
            }
        }
    }

    /// Pressure or thickness for data on hybrid sigma-pressure
    /// coordinates, from the half-level pressures
    /// `phalf[k] = pk[k] + bk[k] * ps`.
    fn resolve_on_sigma_coords(
        &self,
        quantity: PressureQuantity,
        ps: &GriddedSeries,
    ) -> Result<Array4<Float>, CoordinateError> {
        let (bk, pk) = match (&self.grid.bk, &self.grid.pk) {
            (Some(bk), Some(pk)) => (bk, pk),
            _ => {
                return Err(CoordinateError::MissingHybridCoefficients(
                    self.model_name.to_string(),
                ))
            }
        };

        let (nt, _, nlat, nlon) = ps.values.dim();
        let nlev = bk.len() - 1;

        let phalf = |k: usize, sp: Float| pk[k] + bk[k] * sp;

        let values = Array4::from_shape_fn((nt, nlev, nlat, nlon), |(t, k, j, i)| {
            let sp = ps.values[[t, 0, j, i]];
            match quantity {
                PressureQuantity::Pressure => 0.5 * (phalf(k, sp) + phalf(k + 1, sp)),
                PressureQuantity::Thickness => phalf(k + 1, sp) - phalf(k, sp),
            }
        });

        Ok(values)
    }
}

/// Mass-weighted vertical integral: sum of `values * dp / g` over the
/// level axis. The level axis is kept with length 1.
pub fn int_dp_g(values: &Array4<Float>, dp: &Array4<Float>) -> Array4<Float> {
    let weighted = values * dp;
    let summed = weighted.sum_axis(Axis(1)) / GRAV_EARTH;
    summed.insert_axis(Axis(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use float_cmp::approx_eq;
    use ndarray::{arr1, Array1, Array2};

    fn grid(level: Option<Array1<Float>>, bk: Option<Array1<Float>>, pk: Option<Array1<Float>>) -> ModelGrid {
        ModelGrid {
            lat: arr1(&[0.0, 10.0]),
            lon: arr1(&[0.0, 10.0]),
            sfc_area: Array2::from_elem((2, 2), 1.0),
            land_mask: None,
            level,
            bk,
            pk,
            pfull: None,
        }
    }

    fn surface_pressure(value: Float) -> GriddedSeries {
        GriddedSeries {
            time: vec![NaiveDate::from_ymd_opt(2000, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()],
            dt_seconds: arr1(&[86_400.0]),
            level: None,
            lat: None,
            lon: None,
            values: Array4::from_elem((1, 1, 2, 2), value),
        }
    }

    #[test]
    fn p_coords_thickness_sums_to_surface_pressure() {
        let grid = grid(Some(arr1(&[1.0e5, 8.5e4, 5.0e4, 2.0e4])), None, None);
        let resolver = PressureResolver::new(&grid, "am2", VerticalCoord::Pressure);
        let ps = surface_pressure(9.8e4);

        let dp = resolver
            .resolve(PressureQuantity::Thickness, &ps, None)
            .unwrap();
        let ones = Array4::from_elem(dp.raw_dim(), 1.0);
        let column = int_dp_g(&ones, &dp);

        assert!(approx_eq!(
            Float,
            column[[0, 0, 0, 0]] * GRAV_EARTH,
            9.8e4,
            epsilon = 1.0e-6
        ));
    }

    #[test]
    fn p_coords_layers_below_surface_have_zero_thickness() {
        let grid = grid(Some(arr1(&[1.0e5, 8.5e4, 5.0e4])), None, None);
        let resolver = PressureResolver::new(&grid, "am2", VerticalCoord::Pressure);
        // Surface below the lowest layer's upper edge at 92500 Pa.
        let ps = surface_pressure(9.0e4);

        let dp = resolver
            .resolve(PressureQuantity::Thickness, &ps, None)
            .unwrap();
        assert_eq!(dp[[0, 0, 0, 0]], 0.0);
        // The straddling layer is truncated to [ps, 67500].
        assert!(approx_eq!(Float, dp[[0, 1, 0, 0]], 2.25e4, epsilon = 1.0e-9));
        assert!(approx_eq!(
            Float,
            dp.sum_axis(Axis(1))[[0, 0, 0]],
            9.0e4,
            epsilon = 1.0e-6
        ));
    }

    #[test]
    fn p_coords_data_levels_take_precedence() {
        let grid = grid(Some(arr1(&[1.0e5, 5.0e4])), None, None);
        let resolver = PressureResolver::new(&grid, "am2", VerticalCoord::Pressure);
        let ps = surface_pressure(1.0e5);

        let data_levels = arr1(&[9.0e4, 7.0e4, 3.0e4]);
        let p = resolver
            .resolve(PressureQuantity::Pressure, &ps, Some(&data_levels))
            .unwrap();

        assert_eq!(p.dim().1, 3);
        assert_eq!(p[[0, 1, 0, 0]], 7.0e4);
    }

    #[test]
    fn p_coords_ascending_levels_rejected() {
        let grid = grid(Some(arr1(&[2.0e4, 5.0e4, 1.0e5])), None, None);
        let resolver = PressureResolver::new(&grid, "am2", VerticalCoord::Pressure);
        let ps = surface_pressure(1.0e5);

        let result = resolver.resolve(PressureQuantity::Thickness, &ps, None);
        assert!(matches!(result, Err(CoordinateError::UnorderedLevels)));
    }

    #[test]
    fn sigma_thickness_sums_to_surface_pressure() {
        // Top-to-bottom half levels with a pure-sigma lower portion.
        let bk = arr1(&[0.0, 0.2, 0.6, 1.0]);
        let pk = arr1(&[0.0, 0.0, 0.0, 0.0]);
        let grid = grid(None, Some(bk), Some(pk));
        let resolver = PressureResolver::new(&grid, "am2", VerticalCoord::Sigma);
        let ps = surface_pressure(9.6e4);

        let dp = resolver
            .resolve(PressureQuantity::Thickness, &ps, None)
            .unwrap();
        let ones = Array4::from_elem(dp.raw_dim(), 1.0);
        let column = int_dp_g(&ones, &dp);

        assert!(approx_eq!(
            Float,
            column[[0, 0, 1, 1]] * GRAV_EARTH,
            9.6e4,
            epsilon = 1.0e-6
        ));
    }

    #[test]
    fn sigma_pressure_is_half_level_midpoint() {
        let bk = arr1(&[0.0, 0.5, 1.0]);
        let pk = arr1(&[1.0e4, 5.0e3, 0.0]);
        let grid = grid(None, Some(bk), Some(pk));
        let resolver = PressureResolver::new(&grid, "am2", VerticalCoord::Sigma);
        let ps = surface_pressure(1.0e5);

        let p = resolver
            .resolve(PressureQuantity::Pressure, &ps, None)
            .unwrap();

        // phalf = [1e4, 5.5e4, 1e5] for ps = 1e5.
        assert!(approx_eq!(Float, p[[0, 0, 0, 0]], 3.25e4, epsilon = 1.0e-9));
        assert!(approx_eq!(Float, p[[0, 1, 0, 0]], 7.75e4, epsilon = 1.0e-9));
    }

    #[test]
    fn unsupported_coordinate_rejected() {
        let grid = grid(None, None, None);
        let resolver = PressureResolver::new(&grid, "am2", VerticalCoord::None);
        let ps = surface_pressure(1.0e5);

        let result = resolver.resolve(PressureQuantity::Pressure, &ps, None);
        assert!(matches!(
            result,
            Err(CoordinateError::UnsupportedVerticalCoord("none"))
        ));
    }

    #[test]
    fn missing_hybrid_coefficients_rejected() {
        let grid = grid(None, None, None);
        let resolver = PressureResolver::new(&grid, "am2", VerticalCoord::Sigma);
        let ps = surface_pressure(1.0e5);

        let result = resolver.resolve(PressureQuantity::Thickness, &ps, None);
        assert!(matches!(
            result,
            Err(CoordinateError::MissingHybridCoefficients(_))
        ));
    }
}
