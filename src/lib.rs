//! # Telemetry Deriver Library
//!
//! Derive widget display states from streamed drone telemetry.
//!
//! This library provides a reactive engine that binds to several
//! asynchronously updated telemetry signals, recomputes a small discrete
//! state whenever any of them changes, and publishes it on a latest-value
//! stream. Losing the product connection always forces `Disconnected`.
//! The vision positioning system (VPS) widget is built on top of it.

pub mod bus;
pub mod config;
pub mod deriver;
pub mod error;
pub mod preferences;
pub mod simulation;
pub mod telemetry;
pub mod units;
pub mod widgets;
