//! Shared fixtures for integration tests.

pub mod files;
pub mod reads;

pub use files::{write_bed, write_fasta};
pub use reads::{REF1, REF2, read};
