//! Utility re-exports for the smart car.
//!
//! This module re-exports the configuration, connection, control and math
//! layers of the car:
//!
//! - `config`: TOML configuration of the whole server
//! - `connection`: TCP command server, line protocol and session registry
//! - `controllers`: `CarState`, the `HardwareInterface` boundary and the
//!   expansion-board driver
//! - `math`: bounded ranges with saturating arithmetic

pub mod config;
pub mod connection;
pub mod controllers;
pub mod math;

pub use config::AppConfig;
pub use connection::server::{run as serve, CommandServer, ServerConfig, ShutdownHandle};
pub use controllers::{share, CarState, HardwareInterface, SharedCar};
