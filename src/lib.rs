//! patch-updater - keeps a game client on the latest dated patch
//!
//! Searches a release host for the newest patch published in a trailing
//! window of days, downloads it with aria2c and extracts it over the
//! install directory with 7-Zip, cleaning up after itself however the
//! run ends.

pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod lifecycle;
pub mod locator;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod proxy;
pub mod settings;
pub mod tools;
