//! Core types and errors for pdibuild
//!
//! This crate provides the release catalog and the shared error type
//! used throughout the pdibuild workspace.

pub mod error;
pub mod release;

pub use error::{Error, Result};
pub use release::{DistInfo, Release};
