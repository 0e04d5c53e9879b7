//! # nf-core
//!
//! Core data model for nufit configuration files:
//! - physical units and quantities with optional Gaussian uncertainty
//! - priors attached to fit parameters
//! - parameters, parameter sets and hierarchy selectors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod param;
pub mod prior;
pub mod quantity;
pub mod units;

pub use error::{Error, Result};
pub use param::{Param, ParamSelector, ParamSet};
pub use prior::Prior;
pub use quantity::Quantity;
pub use units::{Dimension, Unit};
