//! Core library of the provisioner: a shared, content-addressed, on-disk
//! cache for large downloaded artifacts, safe under multi-process use.
//!
//! The entry points are [`caching::Cache`] for lookups and
//! [`download::DownloadService`] for populating the cache.

pub mod caching;
pub mod checksum;
pub mod config;
pub mod download;
pub mod logging;
pub mod types;
pub mod utils;
