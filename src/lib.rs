//! stampede - bulk Steam Workshop skin downloader.
//!
//! Coordinates a herd of isolated steamcmd instances: each one downloads
//! into its own install directory (so their patch-state lockfiles never
//! collide), results are reconciled against what actually landed on disk,
//! failures are classified and retried with backoff, and finished items
//! are promoted into a shared content tree. A separate subcommand patches
//! Steam's `appworkshop_252490.acf` manifest so the client picks the
//! downloads up without re-fetching them.

pub mod acf;
pub mod config;
pub mod downloader;
pub mod fsutil;
pub mod ids;
pub mod report;
pub mod staging;
