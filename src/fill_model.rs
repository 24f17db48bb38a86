//! Fill Model
//!
//! Stochastic predicates for marginal fills and slippage, backed by a
//! seeded ChaCha8 generator so identical seeds replay identical decisions.

use crate::errors::BacktestError;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Fill model probabilities plus the PRNG seed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FillModelConfig {
    /// Probability a resting limit fills on an equal-price touch.
    pub prob_fill_on_limit: f64,
    /// Probability a stop triggers on an equal-price touch.
    pub prob_fill_on_stop: f64,
    /// Probability a taker fill slips one tick against the order.
    pub prob_slippage: f64,
    pub seed: u64,
}

impl Default for FillModelConfig {
    fn default() -> Self {
        Self {
            prob_fill_on_limit: 1.0,
            prob_fill_on_stop: 1.0,
            prob_slippage: 0.0,
            seed: 42,
        }
    }
}

/// Bernoulli fill/slip decisions with a deterministic generator.
#[derive(Debug, Clone)]
pub struct FillModel {
    config: FillModelConfig,
    rng: ChaCha8Rng,
}

impl FillModel {
    pub fn new(config: FillModelConfig) -> Result<Self, BacktestError> {
        for prob in [
            config.prob_fill_on_limit,
            config.prob_fill_on_stop,
            config.prob_slippage,
        ] {
            if !(0.0..=1.0).contains(&prob) {
                return Err(BacktestError::InvalidProbability(prob));
            }
        }
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
        })
    }

    /// Does a resting limit fill on an equal-price touch?
    #[inline]
    pub fn is_limit_filled(&mut self) -> bool {
        self.bernoulli(self.config.prob_fill_on_limit)
    }

    /// Does a stop trigger on an equal-price touch?
    #[inline]
    pub fn is_stop_filled(&mut self) -> bool {
        self.bernoulli(self.config.prob_fill_on_stop)
    }

    /// Does a taker fill slip one tick against the order?
    #[inline]
    pub fn is_slipped(&mut self) -> bool {
        self.bernoulli(self.config.prob_slippage)
    }

    /// Reseed from the configured seed, restoring the initial stream.
    pub fn reset(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.config.seed);
    }

    #[inline]
    fn bernoulli(&mut self, prob: f64) -> bool {
        if prob >= 1.0 {
            return true;
        }
        if prob <= 0.0 {
            return false;
        }
        self.rng.gen::<f64>() < prob
    }
}
