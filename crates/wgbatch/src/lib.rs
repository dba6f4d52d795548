// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Batch provisioning of WireGuard interfaces and their registration with a
//! WGDashboard instance.

pub mod config;
pub mod dashboard;
pub mod keys;
pub mod lifecycle;
pub mod params;
pub mod plan;
pub mod render;
pub mod report;
pub mod run;
pub mod state;
pub mod sync;
