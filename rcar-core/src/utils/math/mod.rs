//! Math utilities for the smart car.
//!
//! This module provides the saturating range arithmetic used for every bounded
//! actuator value and the servo angle to pulse-width mapping.

pub mod bounds;

pub use bounds::{map_range, Bounds};
