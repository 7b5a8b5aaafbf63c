//! Build run events.
//!
//! Each run records its phase transitions through a [`build::BuildAggregate`],
//! which also decides how the run ended.

pub mod build;
