//! The callgrind-index library
//!
//! A two-stage profile engine for Callgrind-dialect text traces: a [`preprocessor::Preprocessor`]
//! that streams a trace into a compact binary index, and a [`reader::Reader`] that answers
//! per-function queries against that index via seek-based random access.

#![warn(clippy::pedantic)]
#![warn(clippy::get_unwrap)]
#![warn(clippy::else_if_without_else)]
#![warn(clippy::str_to_string)]
#![warn(clippy::string_to_string)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod compression;
pub mod error;
pub mod format;
pub mod model;
pub mod preprocessor;
pub mod reader;
pub mod writer;

pub use error::Error;
pub use format::{format_cost, CostFormat};
pub use model::ProxyFunctions;
pub use preprocessor::{Aggregate, Preprocessor};
pub use reader::Reader;
