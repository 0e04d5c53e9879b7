//! Priors attached to fit parameters.
//!
//! All priors are evaluated on the parameter's magnitude in the parameter's
//! own unit. `chi2` is always `-2 * llh`.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Prior on a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prior {
    /// Flat prior; contributes nothing.
    Uniform,
    /// Normal prior `N(mean, stddev)`, normalised so that `llh(mean) == 0`.
    Gaussian {
        /// Centre.
        mean: f64,
        /// Width, > 0.
        stddev: f64,
    },
    /// Jeffreys (log-uniform) prior on `[lo, hi]`, `0 < lo < hi`.
    Jeffreys {
        /// Lower edge.
        lo: f64,
        /// Upper edge.
        hi: f64,
    },
    /// Piecewise-linear log-likelihood table.
    Linterp {
        /// Strictly increasing abscissae.
        x: Vec<f64>,
        /// Log-likelihood at each `x`.
        llh: Vec<f64>,
    },
}

impl Prior {
    /// Short name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Prior::Uniform => "uniform",
            Prior::Gaussian { .. } => "gaussian",
            Prior::Jeffreys { .. } => "jeffreys",
            Prior::Linterp { .. } => "linterp",
        }
    }

    /// Check the prior's own parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            Prior::Uniform => Ok(()),
            Prior::Gaussian { mean, stddev } => {
                if !mean.is_finite() || !stddev.is_finite() || *stddev <= 0.0 {
                    return Err(Error::Validation(format!(
                        "gaussian prior needs finite mean and stddev > 0, got mean={mean} stddev={stddev}"
                    )));
                }
                Ok(())
            }
            Prior::Jeffreys { lo, hi } => {
                if !(*lo > 0.0 && hi > lo && hi.is_finite()) {
                    return Err(Error::Validation(format!(
                        "jeffreys prior needs 0 < lo < hi, got [{lo}, {hi}]"
                    )));
                }
                Ok(())
            }
            Prior::Linterp { x, llh } => {
                if x.len() < 2 || x.len() != llh.len() {
                    return Err(Error::Validation(format!(
                        "linterp prior needs >= 2 points and matching lengths, got x={} llh={}",
                        x.len(),
                        llh.len()
                    )));
                }
                if x.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(Error::Validation(
                        "linterp prior x values must be strictly increasing".to_string(),
                    ));
                }
                if x.iter().chain(llh.iter()).any(|v| !v.is_finite()) {
                    return Err(Error::Validation("linterp prior has non-finite values".into()));
                }
                Ok(())
            }
        }
    }

    /// Log-likelihood of the prior at `x`. Fails if the prior itself is
    /// invalid (see [`Prior::validate`]).
    pub fn llh(&self, x: f64) -> Result<f64> {
        self.validate()?;
        match self {
            Prior::Uniform => Ok(0.0),
            Prior::Gaussian { mean, stddev } => {
                let z = (x - mean) / stddev;
                Ok(-0.5 * z * z)
            }
            Prior::Jeffreys { lo, hi } => {
                if x < *lo || x > *hi {
                    return Err(Error::Validation(format!(
                        "value {x} outside jeffreys prior support [{lo}, {hi}]"
                    )));
                }
                Ok(-x.ln() - (hi / lo).ln().ln())
            }
            Prior::Linterp { x: xs, llh } => {
                let (first, last) = (xs[0], xs[xs.len() - 1]);
                if x < first || x > last {
                    return Err(Error::Validation(format!(
                        "value {x} outside linterp prior table [{first}, {last}]"
                    )));
                }
                // First index with xs[i] >= x.
                let i = xs.partition_point(|&v| v < x);
                if i == 0 {
                    return Ok(llh[0]);
                }
                let (x0, x1) = (xs[i - 1], xs[i]);
                let t = (x - x0) / (x1 - x0);
                Ok(llh[i - 1] + t * (llh[i] - llh[i - 1]))
            }
        }
    }

    /// `-2 * llh(x)`.
    pub fn chi2(&self, x: f64) -> Result<f64> {
        Ok(-2.0 * self.llh(x)?)
    }
}
