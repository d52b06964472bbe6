#![doc = "ddd-export-core: core logic library for ddd-export."]

//! This crate contains the file-selection rules, archive assembly and the
//! export pipeline for tachograph (DDD) files. The telematics HTTP client and
//! the SMTP transport live in the `ddd-export` crate and plug in through the
//! traits in [`contract`].
//!
//! # Usage
//! Add this as a dependency for anything that needs to select, bundle or ship
//! tachograph files without pulling in a transport stack.

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod contract;
pub mod date_match;
pub mod error;
pub mod export;
pub mod notify;
