//! Loader for nufit configuration files.
//!
//! Text is parsed into a [`ConfigDocument`] (includes expanded, raw values
//! kept), interpolated, and then read into typed views:
//! [`ConstantsTable`], [`BinningSet`] and [`PipelineConfig`]. The
//! [`validate`] module checks those views and reports problems as a
//! [`Report`].

pub mod binning;
pub mod catalog;
pub mod constants;
pub mod document;
pub mod interp;
pub mod pipeline;
pub mod resources;
pub mod validate;
pub mod value;

pub use binning::{BinningSet, MultiDimBinning, OneDimBinning};
pub use constants::{ConstantEntry, ConstantsTable, Hierarchy};
pub use document::{ConfigDocument, Entry, Section, DEFAULT_SECTION};
pub use pipeline::{Mode, PipelineConfig, StageConfig};
pub use validate::{Issue, Report, Severity};
pub use value::Value;
