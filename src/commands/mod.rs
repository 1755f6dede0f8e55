//! CLI command implementations for vardict.
//!
//! - [`call`] - call variants in target regions
//!
//! Shared option groups live in [`common`].

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::struct_excessive_bools,
    clippy::uninlined_format_args
)]

pub mod call;
pub mod command;
pub mod common;
