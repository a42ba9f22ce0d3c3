//! # Widgets Module
//!
//! Concrete widget models built on the generic deriver.

pub mod vps;
