//! Adaptive weighting: per-epoch boost/penalty of base models and the
//! plateau-based auto-stop policy.

use modelprov_core::{ProvenanceError, Result, WeightMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// Range the best model's boost factor is drawn from.
pub const BOOST_RANGE: RangeInclusive<f64> = 0.20..=0.50;
/// Range the worst model's penalty factor is drawn from.
pub const PENALTY_RANGE: RangeInclusive<f64> = 0.30..=0.50;

/// Seeded source of boost/penalty factors.
#[derive(Debug)]
pub struct FactorSampler {
    rng: StdRng,
}

impl FactorSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw `(boost, penalty)` for one epoch.
    pub fn draw(&mut self) -> (f64, f64) {
        let boost = self.rng.gen_range(BOOST_RANGE);
        let penalty = self.rng.gen_range(PENALTY_RANGE);
        (boost, penalty)
    }
}

/// Reject losses the weighting cannot use.
pub fn validate_losses(losses: &BTreeMap<String, f64>) -> Result<()> {
    if losses.is_empty() {
        return Err(ProvenanceError::trainer("no losses reported for epoch"));
    }
    for (name, loss) in losses {
        if !loss.is_finite() || *loss < 0.0 {
            return Err(ProvenanceError::trainer(format!(
                "loss for '{name}' must be finite and non-negative, got {loss}"
            )));
        }
    }
    Ok(())
}

/// Best (lowest loss, first by name) and worst (highest loss, last by name).
///
/// When every loss is equal both are the first model, so no adjustment follows.
pub fn select_best_worst(losses: &BTreeMap<String, f64>) -> Option<(String, String)> {
    let mut iter = losses.iter();
    let (first_name, first_loss) = iter.next()?;
    let (mut best, mut best_loss) = (first_name, *first_loss);
    let (mut worst, mut worst_loss) = (first_name, *first_loss);
    for (name, &loss) in iter {
        if loss < best_loss {
            best = name;
            best_loss = loss;
        }
        if loss >= worst_loss {
            worst = name;
            worst_loss = loss;
        }
    }
    if worst_loss == best_loss {
        // all losses equal: nothing to reward or punish
        worst = best;
    }
    Some((best.clone(), worst.clone()))
}

/// Weighted ensemble loss `Σ wᵢ·lossᵢ`.
pub fn ensemble_loss(weights: &WeightMap, losses: &BTreeMap<String, f64>) -> f64 {
    weights
        .iter()
        .map(|(name, w)| w * losses.get(name).copied().unwrap_or(0.0))
        .sum()
}

/// What happened in one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: u32,
    pub losses: BTreeMap<String, f64>,
    pub ensemble_loss: f64,
    pub weights_before: WeightMap,
    pub weights_after: WeightMap,
    pub best: String,
    pub worst: String,
    pub boost: f64,
    pub penalty: f64,
}

/// Apply one epoch of adaptive weighting.
///
/// Factors are drawn every epoch, even when no adjustment happens, so the
/// random stream depends only on the seed and the epoch count.
pub fn adapt_epoch(
    epoch: u32,
    weights: &WeightMap,
    losses: BTreeMap<String, f64>,
    sampler: &mut FactorSampler,
) -> Result<EpochRecord> {
    validate_losses(&losses)?;
    for name in weights.names() {
        if !losses.contains_key(name) {
            return Err(ProvenanceError::trainer(format!(
                "no loss reported for base model '{name}'"
            )));
        }
    }
    if let Some(extra) = losses.keys().find(|n| weights.get(n).is_none()) {
        return Err(ProvenanceError::trainer(format!(
            "loss reported for unknown base model '{extra}'"
        )));
    }
    let (best, worst) = select_best_worst(&losses)
        .ok_or_else(|| ProvenanceError::trainer("no losses reported for epoch"))?;
    let (boost, penalty) = sampler.draw();
    let weights_after = weights.adjusted(&best, &worst, boost, penalty)?;

    Ok(EpochRecord {
        epoch,
        ensemble_loss: ensemble_loss(weights, &losses),
        losses,
        weights_before: weights.clone(),
        weights_after,
        best,
        worst,
        boost,
        penalty,
    })
}

/// Decision after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    Continue,
    Stop,
}

/// Stops once the per-epoch loss change stays below `threshold` for
/// `patience` consecutive epochs. Any larger change resets the count.
#[derive(Debug, Clone)]
pub struct AutoStopPolicy {
    pub threshold: f64,
    pub patience: u32,
    plateau: u32,
    last_loss: Option<f64>,
}

impl AutoStopPolicy {
    pub fn new(threshold: f64, patience: u32) -> Self {
        Self {
            threshold,
            patience,
            plateau: 0,
            last_loss: None,
        }
    }

    /// Feed one epoch's loss. The first epoch has no delta.
    pub fn observe(&mut self, loss: f64) -> StopDecision {
        if let Some(previous) = self.last_loss.replace(loss) {
            if (loss - previous).abs() < self.threshold {
                self.plateau += 1;
            } else {
                self.plateau = 0;
            }
        }
        if self.plateau >= self.patience {
            StopDecision::Stop
        } else {
            StopDecision::Continue
        }
    }

    /// Consecutive plateaued epochs so far.
    pub fn plateau(&self) -> u32 {
        self.plateau
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn losses(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_sampler_is_seeded_and_in_range() {
        let mut a = FactorSampler::new(42);
        let mut b = FactorSampler::new(42);
        for _ in 0..100 {
            let (boost, penalty) = a.draw();
            assert_eq!((boost, penalty), b.draw());
            assert!(BOOST_RANGE.contains(&boost));
            assert!(PENALTY_RANGE.contains(&penalty));
        }
        assert_ne!(FactorSampler::new(1).draw(), FactorSampler::new(2).draw());
    }

    #[test]
    fn test_select_best_worst() {
        let l = losses(&[("a", 0.3), ("b", 0.1), ("c", 0.9)]);
        assert_eq!(select_best_worst(&l), Some(("b".into(), "c".into())));
    }

    #[test]
    fn test_ties_break_by_name() {
        let l = losses(&[("a", 0.5), ("b", 0.1), ("c", 0.1), ("d", 0.5)]);
        assert_eq!(select_best_worst(&l), Some(("b".into(), "d".into())));
    }

    #[test]
    fn test_all_equal_losses_select_same_model() {
        let l = losses(&[("a", 0.5), ("b", 0.5)]);
        assert_eq!(select_best_worst(&l), Some(("a".into(), "a".into())));
    }

    #[test]
    fn test_single_model_is_noop() {
        let weights = WeightMap::equal(["solo"]).unwrap();
        let mut sampler = FactorSampler::new(0);
        let record = adapt_epoch(1, &weights, losses(&[("solo", 0.4)]), &mut sampler).unwrap();
        assert_eq!(record.best, record.worst);
        assert_eq!(record.weights_after, weights);
    }

    #[test]
    fn test_adapt_moves_weight_toward_best() {
        let weights = WeightMap::equal(["A", "B"]).unwrap();
        let mut sampler = FactorSampler::new(7);
        let record = adapt_epoch(1, &weights, losses(&[("A", 0.2), ("B", 0.8)]), &mut sampler).unwrap();
        assert!(record.weights_after.get("A").unwrap() > 0.5);
        assert!(record.weights_after.get("B").unwrap() < 0.5);
        record.weights_after.validate().unwrap();
        assert!((record.ensemble_loss - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_losses() {
        let weights = WeightMap::equal(["A", "B"]).unwrap();
        let mut sampler = FactorSampler::new(7);
        for bad in [f64::NAN, f64::INFINITY, -0.1] {
            let err = adapt_epoch(1, &weights, losses(&[("A", bad), ("B", 0.8)]), &mut sampler)
                .unwrap_err();
            assert!(matches!(err, ProvenanceError::Trainer(_)));
        }
    }

    #[test]
    fn test_rejects_missing_model_loss() {
        let weights = WeightMap::equal(["A", "B"]).unwrap();
        let mut sampler = FactorSampler::new(7);
        assert!(adapt_epoch(1, &weights, losses(&[("A", 0.1)]), &mut sampler).is_err());
    }

    #[test]
    fn test_auto_stop_after_three_plateaued_epochs() {
        let mut policy = AutoStopPolicy::new(0.001, 3);
        assert_eq!(policy.observe(0.5000), StopDecision::Continue);
        assert_eq!(policy.observe(0.5005), StopDecision::Continue);
        assert_eq!(policy.observe(0.5010), StopDecision::Continue);
        assert_eq!(policy.observe(0.5012), StopDecision::Stop);
    }

    #[test]
    fn test_auto_stop_resets_on_large_delta() {
        let mut policy = AutoStopPolicy::new(0.001, 3);
        policy.observe(0.5000);
        policy.observe(0.5005);
        policy.observe(0.5009);
        assert_eq!(policy.plateau(), 2);
        assert_eq!(policy.observe(0.4500), StopDecision::Continue);
        assert_eq!(policy.plateau(), 0);
        assert_eq!(policy.observe(0.4501), StopDecision::Continue);
    }

    #[test]
    fn test_auto_stop_boundary_is_strict() {
        let mut policy = AutoStopPolicy::new(0.25, 1);
        policy.observe(1.0);
        // a delta equal to the threshold is not a plateau
        assert_eq!(policy.observe(1.25), StopDecision::Continue);
        assert_eq!(policy.observe(1.375), StopDecision::Stop);
    }
}
