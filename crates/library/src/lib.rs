//! Keeps the library catalog in sync with directories on disk.
//!
//! See [`Scanner::scan`] for the entry point and [`FileOutcome`] for what can
//! happen to each file.

pub mod error;
mod locks;
mod scan;

pub use crate::scan::{FileOutcome, ScanReport, Scanner};
