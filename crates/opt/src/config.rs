use crate::errors::{OptError, Result};
use serde::{Deserialize, Serialize};
use socbox_gp::RegrPoly;

/// Tuning of the trust-region surrogate optimization loop.
///
/// All fields have conservative defaults suited to expensive steady-state
/// simulations; callers typically override only `maxfunevals` and the NLP
/// sub-solver tolerances.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaballeroConfig {
    /// Initial trust-region width as a fraction of the global box
    pub first_factor: f64,
    /// Trust-region width after the first accepted step
    pub sec_factor: f64,
    /// Contraction factor applied when an iterate stalls
    pub tol_contract: f64,
    /// Constraint satisfaction tolerance on true evaluations
    pub con_tol: f64,
    /// Exterior penalty multiplier used after an infeasible sub-solve
    pub penalty: f64,
    /// Trust-region width below which the loop may converge
    pub tol1: f64,
    /// Minimum objective improvement for a step to be accepted
    pub tol2: f64,
    /// Absolute cap on true simulator evaluations
    pub maxfunevals: usize,
    /// Polynomial trend of the local surrogates, `poly0` or `poly1`
    pub regrpoly: RegrPoly,
    /// Number of initial design points, 0 to derive it from the dimension
    pub n_init: usize,
    /// Seed of the initial design
    pub seed: u64,
    /// Convergence tolerance forwarded to the NLP sub-solver
    pub ipopt_tol: f64,
    /// Iteration cap forwarded to the NLP sub-solver
    pub ipopt_max_iter: usize,
    /// Constraint tolerance forwarded to the NLP sub-solver
    pub ipopt_con_tol: f64,
}

impl Default for CaballeroConfig {
    fn default() -> Self {
        CaballeroConfig {
            first_factor: 0.4,
            sec_factor: 0.2,
            tol_contract: 0.6,
            con_tol: 1e-4,
            penalty: 1e3,
            tol1: 1e-4,
            tol2: 1e-4,
            maxfunevals: 150,
            regrpoly: RegrPoly::Poly0,
            n_init: 0,
            seed: 42,
            ipopt_tol: 1e-6,
            ipopt_max_iter: 500,
            ipopt_con_tol: 1e-6,
        }
    }
}

impl CaballeroConfig {
    /// Checks the mutual consistency of the tuning values.
    pub fn validate(&self) -> Result<()> {
        if !(0. < self.sec_factor && self.sec_factor <= self.first_factor && self.first_factor <= 1.)
        {
            return Err(OptError::InvalidValue(format!(
                "trust-region factors must satisfy 0 < sec_factor <= first_factor <= 1, \
                 got ({}, {})",
                self.first_factor, self.sec_factor
            )));
        }
        if !(0. < self.tol_contract && self.tol_contract < 1.) {
            return Err(OptError::InvalidValue(format!(
                "tol_contract must lie in (0, 1), got {}",
                self.tol_contract
            )));
        }
        if self.con_tol < 0. || self.tol1 <= 0. || self.tol2 < 0. {
            return Err(OptError::InvalidValue(
                "tolerances must be positive".to_string(),
            ));
        }
        if self.penalty <= 0. {
            return Err(OptError::InvalidValue(format!(
                "penalty must be strictly positive, got {}",
                self.penalty
            )));
        }
        if self.maxfunevals == 0 {
            return Err(OptError::InvalidValue(
                "maxfunevals must be at least 1".to_string(),
            ));
        }
        if self.regrpoly == RegrPoly::Poly2 {
            return Err(OptError::InvalidValue(
                "local surrogates support poly0 and poly1 trends only".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CaballeroConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.maxfunevals, 150);
        assert_eq!(config.regrpoly, RegrPoly::Poly0);
    }

    #[test]
    fn test_bad_factors_rejected() {
        let mut config = CaballeroConfig {
            sec_factor: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.sec_factor = 0.2;
        config.tol_contract = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_poly2_rejected() {
        let config = CaballeroConfig {
            regrpoly: RegrPoly::Poly2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CaballeroConfig = serde_json::from_str(r#"{"maxfunevals": 30}"#).unwrap();
        assert_eq!(config.maxfunevals, 30);
        assert_eq!(config.first_factor, 0.4);
        assert_eq!(config.ipopt_max_iter, 500);
    }
}
