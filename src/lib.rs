//! apexer library.
//!
//! Packages a prepared directory into an APEX: a signed, mountable payload
//! image wrapped with its manifest and application descriptor in one
//! deterministic archive. [`pipeline::run`] drives a whole build; the other
//! modules are its stages.

pub mod build_info;
pub mod common;
pub mod config;
pub mod container;
pub mod error;
pub mod manifest;
pub mod payload;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod signing;
pub mod staging;
pub mod timing;

pub use config::Options;
pub use error::{Error, Result};
pub use pipeline::run;
