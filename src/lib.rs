#![doc = include_str!("../README.md")]
//!
//! The pipeline, leaves first:
//!
//! * [`filename`] reads the region, month and year from a file's name.
//! * [`sheet`] loads a workbook's first sheet, and [`validate`] checks and
//!   cleans it.
//! * [`consolidate`] merges a month's tables, ranks its products, and
//!   writes the report through [`workbook`].
//! * [`batch`] finds the input files, groups and stages them, and drives
//!   the rest.
pub mod batch;
pub mod consolidate;
pub mod filename;
pub mod sheet;
pub mod validate;
pub mod workbook;

pub use batch::{run, BatchSummary, Config};
