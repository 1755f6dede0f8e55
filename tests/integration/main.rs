//! End-to-end tests for variant calling.
//!
//! Run with: `cargo test --test integration`

mod helpers;
mod test_call_pipeline;
mod test_error_paths;
