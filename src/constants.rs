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

//! Module containing physical constants used by the engine.

use crate::Float;

///Mean gravitational acceleration at Earth's surface, in m s^-2
pub const GRAV_EARTH: Float = 9.81;

///Pressure assumed at the bottom edge of the lowest model layer
///when reconstructing layer thicknesses on pressure-level
///coordinates, in Pa
pub const P_BOT: Float = 1.1e5;

///Pressure assumed at the top edge of the uppermost model layer, in Pa
pub const P_TOP: Float = 0.0;

///Seconds per day, used to convert timestep durations into day units
pub const SECONDS_PER_DAY: Float = 86_400.0;

///Conversion factor from Pa to hPa
pub const PA_TO_HPA: Float = 1.0e-2;
