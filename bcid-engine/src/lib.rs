//! bcid-engine library interface
//!
//! Taxonomic identification from barcode sequence search results: candidate
//! selection, independent-source assessment, reference-database coverage
//! and outcome flags. The `bcid` binary drives one [`workflow::Stage`] per
//! invocation; everything is exposed here for integration testing.

pub mod clients;
pub mod flags;
pub mod models;
pub mod services;
pub mod workflow;

pub use workflow::{Clients, QueryDir, Stage, StageContext};
