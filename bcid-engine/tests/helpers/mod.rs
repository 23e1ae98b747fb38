//! Test Helper Utilities
//!
//! Shared utilities for driving bcid stages against temporary query
//! directories and in-memory external services

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_clients;

pub use fixtures::{blast_hit, bold_hit, flag_file, metadata, QueryFixture};
pub use mock_clients::{mock_clients, MockCounter, MockPublications, MockRelatives, MockTaxonomy};
