#![forbid(unsafe_code)]

//! Public entry point for the TubeHarvest crate.
//!
//! The library walks the YouTube Data API page by page, ranks what it
//! fetched, and drives sequential comment exports. The `tubeharvest` binary is
//! a thin CLI on top of these modules.

pub mod api;
pub mod bulk;
pub mod catalog;
pub mod comments;
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod models;
pub mod pager;
pub mod ranking;

pub use crate::error::{HarvestError, HarvestResult};
