//! SGD matrix factorization.
//!
//! Learns user factors `U` and item factors `V` so that `U · Vᵗ`
//! approximates the observed cells of a [`RatingMatrix`]. Factors are stored
//! one row per user/item (the transpose of the usual k × n layout), which
//! keeps each latent vector contiguous.
//!
//! ## Algorithm
//! 1. Fill `U` and `V` with uniform draws from `[0, 1)`
//! 2. Each epoch, compute the MSE over observed cells and stop once it drops
//!    below the convergence threshold
//! 3. Otherwise take one gradient step per observed cell: update the user
//!    vector first, then the item vector using the updated user vector
//! 4. Return predictions for every cell from the final factors
//!
//! Training can be cancelled between epochs through a [`CancellationToken`]
//! and capped by a wall-clock budget.

use crate::error::{RecommendError, Result};
use crate::matrix::RatingMatrix;
use data_loader::{AnimeId, UserId};
use ndarray::{Array2, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};

/// Epoch cap used when `max_epochs` is zero
pub const DEFAULT_MAX_EPOCHS: usize = 1000;

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq)]
pub struct FactorizerConfig {
    /// Latent dimensionality `k`
    pub rank: usize,
    /// Step size α
    pub learning_rate: f32,
    /// L2 penalty γ
    pub regularization: f32,
    /// Upper bound on epochs; `0` means [`DEFAULT_MAX_EPOCHS`]
    pub max_epochs: usize,
    /// Stop once the observed-cell MSE is below this value
    pub convergence_threshold: f32,
    /// Seed for factor initialization
    pub seed: u64,
    /// Optional wall-clock limit on training
    pub time_budget: Option<Duration>,
}

impl Default for FactorizerConfig {
    fn default() -> Self {
        Self {
            rank: 75,
            learning_rate: 0.01,
            regularization: 0.4,
            max_epochs: DEFAULT_MAX_EPOCHS,
            convergence_threshold: 2.5,
            seed: 42,
            time_budget: None,
        }
    }
}

impl FactorizerConfig {
    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_regularization(mut self, regularization: f32) -> Self {
        self.regularization = regularization;
        self
    }

    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    pub fn with_convergence_threshold(mut self, threshold: f32) -> Self {
        self.convergence_threshold = threshold;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    pub fn effective_max_epochs(&self) -> usize {
        if self.max_epochs == 0 {
            DEFAULT_MAX_EPOCHS
        } else {
            self.max_epochs
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rank == 0 {
            return Err(RecommendError::InvalidConfig(
                "rank must be at least 1".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(RecommendError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.regularization.is_finite() && self.regularization >= 0.0) {
            return Err(RecommendError::InvalidConfig(format!(
                "regularization must be non-negative, got {}",
                self.regularization
            )));
        }
        if !(self.convergence_threshold.is_finite() && self.convergence_threshold > 0.0) {
            return Err(RecommendError::InvalidConfig(format!(
                "convergence threshold must be positive, got {}",
                self.convergence_threshold
            )));
        }
        Ok(())
    }
}

/// Shared flag for stopping a training run between epochs
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why training stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// MSE dropped below the threshold
    Converged,
    /// Ran the maximum number of epochs
    EpochLimit,
    /// Ran out of wall-clock budget
    TimeBudget,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    /// Epochs in which gradient steps were applied
    pub epochs_run: usize,
    /// Observed-cell MSE of the final factors
    pub final_mse: f32,
    pub stop_reason: StopReason,
}

/// Dense predicted ratings for every (user, anime) pair of a rating matrix
#[derive(Debug, Clone)]
pub struct PredictionMatrix {
    values: Array2<f32>,
    user_index: HashMap<UserId, usize>,
    item_ids: Vec<AnimeId>,
    item_index: HashMap<AnimeId, usize>,
}

impl PredictionMatrix {
    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    pub fn item_ids(&self) -> &[AnimeId] {
        &self.item_ids
    }

    pub fn contains_user(&self, user_id: UserId) -> bool {
        self.user_index.contains_key(&user_id)
    }

    /// Predicted rating, if both ids were part of training
    pub fn predict(&self, user_id: UserId, anime_id: AnimeId) -> Option<f32> {
        let row = *self.user_index.get(&user_id)?;
        let col = *self.item_index.get(&anime_id)?;
        Some(self.values[(row, col)])
    }

    /// Every prediction for one user, in column (ascending anime id) order
    pub fn user_predictions(&self, user_id: UserId) -> Option<Vec<(AnimeId, f32)>> {
        let row = *self.user_index.get(&user_id)?;
        Some(
            self.item_ids
                .iter()
                .copied()
                .zip(self.values.row(row).iter().copied())
                .collect(),
        )
    }
}

/// Output of a training run
#[derive(Debug, Clone)]
pub struct Factorization {
    pub predictions: PredictionMatrix,
    pub report: TrainingReport,
}

/// Stochastic gradient descent factorizer
#[derive(Debug, Clone)]
pub struct SgdFactorizer {
    config: FactorizerConfig,
    cancel: CancellationToken,
}

impl SgdFactorizer {
    pub fn new(config: FactorizerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Share an existing cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &FactorizerConfig {
        &self.config
    }

    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Train with a generator seeded from the config
    pub fn factorize(&self, matrix: &RatingMatrix) -> Result<Factorization> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.factorize_with_rng(matrix, &mut rng)
    }

    /// Train with an explicit random generator
    #[instrument(skip(self, matrix, rng), fields(rank = self.config.rank, observed = matrix.observed_count()))]
    pub fn factorize_with_rng<R: Rng>(
        &self,
        matrix: &RatingMatrix,
        rng: &mut R,
    ) -> Result<Factorization> {
        if matrix.is_empty() {
            return Err(RecommendError::EmptyRatingMatrix);
        }
        let (num_users, num_items) = matrix.dim();
        let max_rank = num_users.min(num_items);
        let k = self.config.rank;
        if k == 0 || k > max_rank {
            return Err(RecommendError::InvalidRank {
                rank: k,
                max: max_rank,
            });
        }

        let mut user_factors = Array2::from_shape_fn((num_users, k), |_| rng.random::<f32>());
        let mut item_factors = Array2::from_shape_fn((num_items, k), |_| rng.random::<f32>());

        let values = matrix.values();
        let observed = matrix.observed();
        let step = 2.0 * self.config.learning_rate;
        let gamma = self.config.regularization;
        let max_epochs = self.config.effective_max_epochs();
        let started = Instant::now();

        let mut epochs_run = 0;
        let mut stop_reason = StopReason::EpochLimit;

        while epochs_run < max_epochs {
            if self.cancel.is_cancelled() {
                info!(epoch = epochs_run, "Training cancelled");
                return Err(RecommendError::TrainingCancelled);
            }
            if let Some(budget) = self.config.time_budget {
                if started.elapsed() >= budget {
                    warn!(
                        epoch = epochs_run,
                        budget_ms = budget.as_millis() as u64,
                        "Training time budget exhausted, keeping current factors"
                    );
                    stop_reason = StopReason::TimeBudget;
                    break;
                }
            }

            let mse = observed_mse(values, observed, &user_factors, &item_factors);
            if !mse.is_finite() {
                return Err(RecommendError::Diverged { epoch: epochs_run });
            }
            trace!(epoch = epochs_run, mse, "Epoch");
            if epochs_run % 100 == 0 {
                debug!(epoch = epochs_run, mse, "Training progress");
            }
            if mse < self.config.convergence_threshold {
                stop_reason = StopReason::Converged;
                break;
            }

            for &(row, col) in observed {
                let residual = {
                    let u = user_factors.row(row);
                    let v = item_factors.row(col);
                    values[(row, col)] - u.dot(&v)
                };
                Zip::from(user_factors.row_mut(row))
                    .and(item_factors.row(col))
                    .for_each(|u, &v| *u += step * (residual * v - gamma * *u));
                Zip::from(item_factors.row_mut(col))
                    .and(user_factors.row(row))
                    .for_each(|v, &u| *v += step * (residual * u - gamma * *v));
            }
            epochs_run += 1;
        }

        let final_mse = observed_mse(values, observed, &user_factors, &item_factors);
        if !final_mse.is_finite() {
            return Err(RecommendError::Diverged { epoch: epochs_run });
        }

        info!(
            epochs_run,
            final_mse,
            stop_reason = ?stop_reason,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Factorization finished"
        );

        let predictions = user_factors.dot(&item_factors.t());
        Ok(Factorization {
            predictions: PredictionMatrix {
                values: predictions,
                user_index: matrix
                    .user_ids()
                    .iter()
                    .enumerate()
                    .map(|(idx, &id)| (id, idx))
                    .collect(),
                item_ids: matrix.item_ids().to_vec(),
                item_index: matrix
                    .item_ids()
                    .iter()
                    .enumerate()
                    .map(|(idx, &id)| (id, idx))
                    .collect(),
            },
            report: TrainingReport {
                epochs_run,
                final_mse,
                stop_reason,
            },
        })
    }
}

/// Mean squared error of `U · Vᵗ` restricted to observed cells
fn observed_mse(
    values: &Array2<f32>,
    observed: &[(usize, usize)],
    user_factors: &Array2<f32>,
    item_factors: &Array2<f32>,
) -> f32 {
    let total: f32 = observed
        .iter()
        .map(|&(row, col)| {
            let err = values[(row, col)] - user_factors.row(row).dot(&item_factors.row(col));
            err * err
        })
        .sum();
    total / observed.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_loader::Feedback;
    use ndarray::array;

    /// 4 × 5 matrix of rank 2, two cells left unobserved
    fn low_rank_matrix() -> RatingMatrix {
        let u = array![[1.0f32, 1.5], [2.0, 1.0], [1.2, 1.8], [1.5, 1.5]];
        let v = array![[1.0f32, 2.0], [1.5, 1.0], [2.0, 1.5], [1.0, 1.0], [1.8, 1.2]];
        let values = u.dot(&v.t());

        let observed: Vec<(usize, usize)> = (0..4)
            .flat_map(|r| (0..5).map(move |c| (r, c)))
            .filter(|&cell| cell != (0, 4) && cell != (3, 1))
            .collect();

        RatingMatrix::from_parts(values, observed, vec![1, 2, 3, 4], vec![10, 20, 30, 40, 50])
    }

    fn test_config() -> FactorizerConfig {
        FactorizerConfig::default()
            .with_rank(2)
            .with_learning_rate(0.01)
            .with_regularization(0.001)
            .with_convergence_threshold(0.05)
            .with_max_epochs(5000)
            .with_seed(7)
    }

    #[test]
    fn test_converges_on_low_rank_matrix() {
        let factorizer = SgdFactorizer::new(test_config()).unwrap();
        let result = factorizer.factorize(&low_rank_matrix()).unwrap();

        assert_eq!(result.report.stop_reason, StopReason::Converged);
        assert!(result.report.final_mse < 0.05);
        assert!(result.report.epochs_run < 5000);

        // Reconstructs an observed cell closely
        let predicted = result.predictions.predict(2, 10).unwrap();
        assert!((predicted - 4.0).abs() < 1.0, "predicted {}", predicted);
    }

    #[test]
    fn test_predictions_cover_every_cell() {
        let factorizer = SgdFactorizer::new(test_config()).unwrap();
        let result = factorizer.factorize(&low_rank_matrix()).unwrap();

        assert_eq!(result.predictions.values().dim(), (4, 5));
        assert!(result.predictions.values().iter().all(|p| p.is_finite()));
        // Unobserved cells are predicted too
        assert!(result.predictions.predict(1, 50).is_some());
        assert_eq!(result.predictions.user_predictions(4).unwrap().len(), 5);
    }

    #[test]
    fn test_unobserved_values_never_used() {
        let base = low_rank_matrix();
        let mut altered_values = base.values().clone();
        altered_values[(0, 4)] = 9.0;
        altered_values[(3, 1)] = -3.0;
        let altered = RatingMatrix::from_parts(
            altered_values,
            base.observed().to_vec(),
            base.user_ids().to_vec(),
            base.item_ids().to_vec(),
        );

        let factorizer = SgdFactorizer::new(test_config().with_max_epochs(50)).unwrap();
        let a = factorizer.factorize(&base).unwrap();
        let b = factorizer.factorize(&altered).unwrap();

        assert_eq!(a.predictions.values(), b.predictions.values());
        assert_eq!(a.report, b.report);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let factorizer = SgdFactorizer::new(test_config().with_max_epochs(20)).unwrap();
        let a = factorizer.factorize(&low_rank_matrix()).unwrap();
        let b = factorizer.factorize(&low_rank_matrix()).unwrap();
        assert_eq!(a.predictions.values(), b.predictions.values());
    }

    #[test]
    fn test_empty_matrix_rejected() {
        let matrix = RatingMatrix::from_feedback(&Vec::<Feedback>::new());
        let err = SgdFactorizer::new(test_config())
            .unwrap()
            .factorize(&matrix)
            .unwrap_err();
        assert_eq!(err, RecommendError::EmptyRatingMatrix);
    }

    #[test]
    fn test_rank_larger_than_matrix_rejected() {
        let err = SgdFactorizer::new(test_config().with_rank(5))
            .unwrap()
            .factorize(&low_rank_matrix())
            .unwrap_err();
        assert_eq!(err, RecommendError::InvalidRank { rank: 5, max: 4 });
    }

    #[test]
    fn test_invalid_config() {
        assert!(SgdFactorizer::new(FactorizerConfig::default().with_rank(0)).is_err());
        assert!(SgdFactorizer::new(FactorizerConfig::default().with_learning_rate(-1.0)).is_err());
        assert!(
            SgdFactorizer::new(FactorizerConfig::default().with_regularization(f32::NAN)).is_err()
        );
    }

    #[test]
    fn test_zero_max_epochs_means_default() {
        let config = FactorizerConfig::default().with_max_epochs(0);
        assert_eq!(config.effective_max_epochs(), DEFAULT_MAX_EPOCHS);
    }

    #[test]
    fn test_cancelled_before_training() {
        let factorizer = SgdFactorizer::new(test_config()).unwrap();
        factorizer.cancel_handle().cancel();

        let err = factorizer.factorize(&low_rank_matrix()).unwrap_err();
        assert_eq!(err, RecommendError::TrainingCancelled);
    }

    #[test]
    fn test_time_budget_stops_training() {
        let factorizer =
            SgdFactorizer::new(test_config().with_time_budget(Duration::ZERO)).unwrap();
        let result = factorizer.factorize(&low_rank_matrix()).unwrap();

        assert_eq!(result.report.stop_reason, StopReason::TimeBudget);
        assert_eq!(result.report.epochs_run, 0);
    }

    #[test]
    fn test_divergence_reported() {
        let config = test_config()
            .with_learning_rate(1000.0)
            .with_convergence_threshold(1e-6);
        let err = SgdFactorizer::new(config)
            .unwrap()
            .factorize(&low_rank_matrix())
            .unwrap_err();
        assert!(matches!(err, RecommendError::Diverged { .. }));
    }
}
