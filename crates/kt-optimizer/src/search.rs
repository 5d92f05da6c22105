//! Search space definitions and parameter sweep strategies.

use kt_types::{KtError, KtResult, ParamSample, PARAM_NAMES};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::trial::ObjectiveDirection;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name as the objective expects it (e.g. "theta").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a parameter is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
}

impl ParameterKind {
    fn contains(&self, value: f64) -> bool {
        match *self {
            Self::FloatRange { low, high } | Self::LogUniform { low, high } => {
                value >= low && value <= high
            }
        }
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            Self::FloatRange { low, high } => rng.random_range(low..=high),
            Self::LogUniform { low, high } => {
                let log_val: f64 = rng.random_range(low.ln()..=high.ln());
                log_val.exp().clamp(low, high)
            }
        }
    }

    /// `steps` evenly spaced points (evenly in log-space for log-uniform).
    fn grid(&self, steps: usize) -> Vec<f64> {
        let steps = steps.max(2);
        let (from, to, log) = match *self {
            Self::FloatRange { low, high } => (low, high, false),
            Self::LogUniform { low, high } => (low.ln(), high.ln(), true),
        };
        (0..steps)
            .map(|i| {
                let t = i as f64 / (steps - 1) as f64;
                let v = from + t * (to - from);
                if log {
                    v.exp()
                } else {
                    v
                }
            })
            .collect()
    }

    /// Move `value` by a random step of up to `fraction` of the range.
    fn perturb<R: Rng + ?Sized>(&self, value: f64, fraction: f64, rng: &mut R) -> f64 {
        match *self {
            Self::FloatRange { low, high } => {
                let noise = rng.random_range(-fraction..fraction) * (high - low);
                (value + noise).clamp(low, high)
            }
            Self::LogUniform { low, high } => {
                let log_range = high.ln() - low.ln();
                let noise = rng.random_range(-fraction..fraction) * log_range;
                (value.ln() + noise).exp().clamp(low, high)
            }
        }
    }
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    /// True when every named dimension of `sample` lies inside its range.
    pub fn contains(&self, sample: &ParamSample) -> bool {
        self.parameters.iter().all(|param| {
            sample
                .get(&param.name)
                .is_some_and(|value| param.kind.contains(*value))
        })
    }

    /// Total number of grid points for `steps` per dimension.
    pub fn grid_size(&self, steps: usize) -> Option<usize> {
        let per_dim = steps.max(2);
        self.parameters
            .iter()
            .try_fold(1usize, |total, _| total.checked_mul(per_dim))
    }
}

/// The six covariance dimensions, each log-uniform over `[e^0, e^20]`.
///
/// Samples are inverse covariances; the objective applies the reciprocal
/// before writing them into the filter config.
pub fn covariance_search_space() -> SearchSpace {
    let high = 20f64.exp();
    PARAM_NAMES
        .iter()
        .fold(SearchSpace::new(), |space, name| space.add_log_uniform(*name, 1.0, high))
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Generate the next batch of parameter samples to evaluate.
    fn suggest(&mut self, count: usize) -> Vec<ParamSample>;

    /// Report a finished trial. `loss` is `None` for failed trials.
    fn report(&mut self, _sample: &ParamSample, _loss: Option<f64>) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Build a strategy by name: "grid", "random" or "bayesian".
pub fn build_strategy(
    name: &str,
    space: SearchSpace,
    direction: ObjectiveDirection,
    exploration_weight: f64,
    grid_steps: usize,
) -> KtResult<Box<dyn SearchStrategy>> {
    match name {
        "grid" => Ok(Box::new(GridSearch::new(space, grid_steps)?)),
        "random" => Ok(Box::new(RandomSearch::new(space))),
        "bayesian" => Ok(Box::new(BayesianSearch::new(space, direction, exploration_weight))),
        other => Err(KtError::Settings(format!("unknown search strategy: {other}"))),
    }
}

// ---- Grid search ----

/// Exhaustive grid search; each dimension is split into `steps` points.
///
/// Points are enumerated by index, read as a mixed-radix number whose last
/// digit is the last dimension, so the grid is never materialized.
#[derive(Debug, Clone)]
pub struct GridSearch {
    names: Vec<String>,
    axes: Vec<Vec<f64>>,
    size: usize,
    cursor: usize,
    /// Indices reported from history, skipped when the cursor reaches them.
    evaluated: HashSet<usize>,
}

impl GridSearch {
    /// Fails when the grid has more points than `usize` can count.
    pub fn new(space: SearchSpace, steps: usize) -> KtResult<Self> {
        let size = space.grid_size(steps).ok_or_else(|| {
            KtError::Settings(format!(
                "grid of {} steps over {} dimensions is too large",
                steps,
                space.parameters.len()
            ))
        })?;
        let (names, axes): (Vec<String>, Vec<Vec<f64>>) = space
            .parameters
            .iter()
            .map(|param| (param.name.clone(), param.kind.grid(steps)))
            .unzip();
        Ok(Self {
            names,
            axes,
            size,
            cursor: 0,
            evaluated: HashSet::new(),
        })
    }

    fn point(&self, mut index: usize) -> ParamSample {
        let mut values = vec![0.0; self.axes.len()];
        for (slot, axis) in values.iter_mut().zip(&self.axes).rev() {
            *slot = axis[index % axis.len()];
            index /= axis.len();
        }
        self.names.iter().cloned().zip(values).collect()
    }

    /// Grid index of `sample`, if every value is one of the grid points.
    /// Values read back from a journal may differ in the last bits.
    fn index_of(&self, sample: &ParamSample) -> Option<usize> {
        self.names
            .iter()
            .zip(&self.axes)
            .try_fold(0usize, |index, (name, axis)| {
                let value = *sample.get(name)?;
                let digit = axis
                    .iter()
                    .position(|v| (v - value).abs() <= 1e-9 * v.abs().max(1.0))?;
                Some(index * axis.len() + digit)
            })
    }

    pub fn remaining(&self) -> usize {
        let skipped = self.evaluated.iter().filter(|&&i| i >= self.cursor).count();
        self.size - self.cursor - skipped
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParamSample> {
        let mut batch = Vec::with_capacity(count.min(self.size - self.cursor));
        while batch.len() < count && self.cursor < self.size {
            let index = self.cursor;
            self.cursor += 1;
            if !self.evaluated.contains(&index) {
                batch.push(self.point(index));
            }
        }
        batch
    }

    fn report(&mut self, sample: &ParamSample, _loss: Option<f64>) {
        // History may arrive in any order, so remember every grid point seen.
        if let Some(index) = self.index_of(sample) {
            if index >= self.cursor {
                self.evaluated.insert(index);
            }
        }
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: SearchSpace,
}

impl RandomSearch {
    pub fn new(space: SearchSpace) -> Self {
        Self { space }
    }

    fn sample_one(&self) -> ParamSample {
        let mut rng = rand::rng();
        self.space
            .parameters
            .iter()
            .map(|param| (param.name.clone(), param.kind.sample(&mut rng)))
            .collect()
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParamSample> {
        (0..count).map(|_| self.sample_one()).collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search (perturbation around the best observation) ----

/// Adaptive search that biases sampling toward the best observation.
///
/// Tracks successful (sample, loss) pairs; with probability
/// `exploration_weight` it samples uniformly, otherwise it perturbs the best
/// point seen so far. Failed trials are never treated as observations.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    space: SearchSpace,
    direction: ObjectiveDirection,
    observations: Vec<(ParamSample, f64)>,
    exploration_weight: f64,
}

impl BayesianSearch {
    pub fn new(space: SearchSpace, direction: ObjectiveDirection, exploration_weight: f64) -> Self {
        Self {
            space,
            direction,
            observations: Vec::new(),
            exploration_weight,
        }
    }

    /// Pure exploration sample (same as random).
    fn explore(&self) -> ParamSample {
        RandomSearch::new(self.space.clone()).sample_one()
    }

    fn best(&self) -> Option<&ParamSample> {
        let cmp = |a: &&(ParamSample, f64), b: &&(ParamSample, f64)| a.1.total_cmp(&b.1);
        let best = match self.direction {
            ObjectiveDirection::Minimize => self.observations.iter().min_by(cmp),
            ObjectiveDirection::Maximize => self.observations.iter().max_by(cmp),
        };
        best.map(|(sample, _)| sample)
    }

    /// Exploitation: perturb the best-known point.
    fn exploit(&self) -> ParamSample {
        let Some(base) = self.best() else {
            return self.explore();
        };

        let mut rng = rand::rng();
        self.space
            .parameters
            .iter()
            .map(|param| {
                let value = match base.get(&param.name) {
                    Some(v) => param.kind.perturb(*v, 0.1, &mut rng),
                    None => param.kind.sample(&mut rng),
                };
                (param.name.clone(), value)
            })
            .collect()
    }

    pub fn observations(&self) -> usize {
        self.observations.len()
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, count: usize) -> Vec<ParamSample> {
        let mut rng = rand::rng();
        (0..count)
            .map(|_| {
                if self.observations.is_empty() || rng.random::<f64>() < self.exploration_weight {
                    self.explore()
                } else {
                    self.exploit()
                }
            })
            .collect()
    }

    fn report(&mut self, sample: &ParamSample, loss: Option<f64>) {
        if let Some(loss) = loss.filter(|l| l.is_finite()) {
            self.observations.push((sample.clone(), loss));
        }
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f64) -> ParamSample {
        ParamSample::from([("x".to_string(), x)])
    }

    #[test]
    fn covariance_space_has_six_log_uniform_dims() {
        let space = covariance_search_space();
        let names: Vec<_> = space.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, PARAM_NAMES.to_vec());
        for param in &space.parameters {
            match param.kind {
                ParameterKind::LogUniform { low, high } => {
                    assert_eq!(low, 1.0);
                    assert!((high - 4.851_651_954_097_903e8).abs() < 1.0);
                }
                other => panic!("unexpected kind: {other:?}"),
            }
        }
    }

    #[test]
    fn grid_search_produces_correct_count() {
        let space = SearchSpace::new().add_float("a", 0.0, 1.0).add_float("b", 10.0, 11.0);
        assert_eq!(space.grid_size(3), Some(9));

        let mut gs = GridSearch::new(space, 3).unwrap();
        let batch = gs.suggest(100);
        assert_eq!(batch.len(), 9);
        assert_eq!(gs.remaining(), 0);
    }

    #[test]
    fn grid_search_cursor_advances() {
        let space = SearchSpace::new().add_float("x", 1.0, 5.0);
        let mut gs = GridSearch::new(space, 5).unwrap();
        let first = gs.suggest(3);
        assert_eq!(first.len(), 3);
        assert_eq!(first[1]["x"], 2.0);
        let second = gs.suggest(10);
        assert_eq!(second.len(), 2); // only 2 remain
    }

    #[test]
    fn grid_search_skips_replayed_points() {
        let space = SearchSpace::new().add_float("x", 1.0, 3.0);
        let mut gs = GridSearch::new(space, 3).unwrap();
        gs.report(&point(1.0), Some(0.5));
        gs.report(&point(2.0), None);
        let rest = gs.suggest(10);
        assert_eq!(rest, vec![point(3.0)]);
    }

    #[test]
    fn grid_search_skips_history_in_any_order() {
        let space = SearchSpace::new().add_float("x", 1.0, 3.0);
        let mut gs = GridSearch::new(space, 3).unwrap();
        gs.report(&point(2.0), Some(0.5));
        gs.report(&point(1.0), Some(0.7));
        assert_eq!(gs.remaining(), 1);
        assert_eq!(gs.suggest(10), vec![point(3.0)]);
        assert_eq!(gs.remaining(), 0);
    }

    #[test]
    fn grid_search_ignores_off_grid_history() {
        let space = SearchSpace::new().add_float("x", 1.0, 3.0);
        let mut gs = GridSearch::new(space, 3).unwrap();
        gs.report(&point(1.5), Some(0.5));
        assert_eq!(gs.suggest(10).len(), 3);
    }

    #[test]
    fn grid_points_follow_mixed_radix_order() {
        let space = SearchSpace::new().add_float("a", 0.0, 1.0).add_float("b", 10.0, 11.0);
        let mut gs = GridSearch::new(space, 2).unwrap();
        let pairs: Vec<(f64, f64)> = gs.suggest(4).iter().map(|s| (s["a"], s["b"])).collect();
        assert_eq!(pairs, vec![(0.0, 10.0), (0.0, 11.0), (1.0, 10.0), (1.0, 11.0)]);
    }

    #[test]
    fn large_covariance_grid_is_not_materialized() {
        let mut gs = GridSearch::new(covariance_search_space(), 20).unwrap();
        assert_eq!(gs.remaining(), 64_000_000);
        let batch = gs.suggest(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(gs.remaining(), 64_000_000 - 2);
    }

    #[test]
    fn overflowing_grid_is_rejected() {
        let space = (0..64).fold(SearchSpace::new(), |space, i| space.add_float(format!("p{i}"), 0.0, 1.0));
        assert_eq!(space.grid_size(4), None);
        assert!(matches!(GridSearch::new(space.clone(), 4), Err(KtError::Settings(_))));
        assert!(build_strategy("grid", space, ObjectiveDirection::Minimize, 0.3, 4).is_err());
    }

    #[test]
    fn log_grid_is_even_in_log_space() {
        let space = SearchSpace::new().add_log_uniform("x", 1.0, 100.0);
        let mut gs = GridSearch::new(space, 3).unwrap();
        let values: Vec<f64> = gs.suggest(3).iter().map(|s| s["x"]).collect();
        assert!((values[0] - 1.0).abs() < 1e-9);
        assert!((values[1] - 10.0).abs() < 1e-9);
        assert!((values[2] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn random_search_respects_bounds() {
        let space = covariance_search_space().add_float("extra", 0.5, 1.0);
        let mut rs = RandomSearch::new(space.clone());
        let suggestions = rs.suggest(200);
        assert_eq!(suggestions.len(), 200);
        for sample in &suggestions {
            assert!(space.contains(sample), "out of bounds: {sample:?}");
        }
    }

    #[test]
    fn bayesian_search_starts_with_exploration() {
        let mut bs = BayesianSearch::new(covariance_search_space(), ObjectiveDirection::Minimize, 0.3);
        let suggestions = bs.suggest(10);
        assert_eq!(suggestions.len(), 10);
        assert_eq!(bs.observations(), 0);
    }

    #[test]
    fn bayesian_search_ignores_failed_trials() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        let mut bs = BayesianSearch::new(space, ObjectiveDirection::Minimize, 0.0);
        bs.report(&point(0.5), None);
        bs.report(&point(0.5), Some(f64::NAN));
        assert_eq!(bs.observations(), 0);
        bs.report(&point(0.5), Some(1.0));
        assert_eq!(bs.observations(), 1);
    }

    #[test]
    fn bayesian_search_exploits_lowest_loss_when_minimizing() {
        let space = SearchSpace::new().add_float("x", 0.0, 100.0);
        // exploration_weight=0 → always exploit after report
        let mut bs = BayesianSearch::new(space, ObjectiveDirection::Minimize, 0.0);
        bs.report(&point(90.0), Some(5.0));
        bs.report(&point(10.0), Some(0.1));

        for sample in bs.suggest(50) {
            // Within ±10% of the range around the best point
            assert!(sample["x"] >= 0.0 && sample["x"] <= 20.0, "{sample:?}");
        }
    }

    #[test]
    fn bayesian_search_exploits_highest_when_maximizing() {
        let space = SearchSpace::new().add_float("x", 0.0, 100.0);
        let mut bs = BayesianSearch::new(space, ObjectiveDirection::Maximize, 0.0);
        bs.report(&point(90.0), Some(5.0));
        bs.report(&point(10.0), Some(0.1));

        for sample in bs.suggest(50) {
            assert!(sample["x"] >= 80.0 && sample["x"] <= 100.0, "{sample:?}");
        }
    }

    #[test]
    fn build_strategy_by_name() {
        for name in ["grid", "random", "bayesian"] {
            let strategy = build_strategy(
                name,
                covariance_search_space(),
                ObjectiveDirection::Minimize,
                0.3,
                2,
            )
            .unwrap();
            assert_eq!(strategy.name(), name);
        }
        assert!(build_strategy("tpe", SearchSpace::new(), ObjectiveDirection::Minimize, 0.3, 2).is_err());
    }
}
