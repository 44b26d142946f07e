//! Core control logic for a remotely driven smart car.
//!
//! The car is commanded over TCP with a small line protocol; see
//! [`utils::connection::protocol`]. For a runnable server, see the
//! `car-server` binary under `rcar-app/`.

pub mod utils;
