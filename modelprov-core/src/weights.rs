//! Base-model weight map: an immutable probability-like distribution over
//! base models, replaced (never mutated) once per epoch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ProvenanceError, Result};

/// Tolerance used when checking that weights sum to 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Mapping from base-model name to weight.
///
/// Values built through [`WeightMap::equal`], [`WeightMap::from_raw`] or
/// [`WeightMap::adjusted`] always sum to 1.0 within [`WEIGHT_TOLERANCE`] and
/// lie in `[0, 1]`. Deserialization is transparent so stored maps keep their
/// exact values (and hashes); call [`WeightMap::validate`] on untrusted input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightMap(BTreeMap<String, f64>);

impl WeightMap {
    /// Equal weights across the given model names.
    pub fn equal<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(ProvenanceError::configuration(
                "cannot build a weight map without base models",
            ));
        }
        let raw = names.into_iter().map(|n| (n, 1.0)).collect();
        Self::from_raw(raw)
    }

    /// Build from unnormalized non-negative weights, normalizing to sum 1.0.
    pub fn from_raw(raw: BTreeMap<String, f64>) -> Result<Self> {
        if raw.is_empty() {
            return Err(ProvenanceError::validation("weight map is empty"));
        }
        for (name, w) in &raw {
            if !w.is_finite() || *w < 0.0 {
                return Err(ProvenanceError::validation(format!(
                    "weight for '{name}' must be finite and non-negative, got {w}"
                )));
            }
        }
        let total: f64 = raw.values().sum();
        if total <= 0.0 {
            return Err(ProvenanceError::validation("weights sum to zero"));
        }
        Ok(Self(raw.into_iter().map(|(k, v)| (k, v / total)).collect()))
    }

    /// Apply the adaptive rule and return the renormalized result.
    ///
    /// `best` is scaled by `1 + boost`, `worst` by `1 - penalty`; all other
    /// entries are left unscaled before renormalization. When `best` and
    /// `worst` name the same model the map is returned unchanged.
    pub fn adjusted(&self, best: &str, worst: &str, boost: f64, penalty: f64) -> Result<Self> {
        for name in [best, worst] {
            if !self.0.contains_key(name) {
                return Err(ProvenanceError::validation(format!(
                    "unknown base model '{name}'"
                )));
            }
        }
        if !boost.is_finite() || boost < 0.0 {
            return Err(ProvenanceError::validation(format!(
                "boost must be non-negative, got {boost}"
            )));
        }
        if !penalty.is_finite() || !(0.0..1.0).contains(&penalty) {
            return Err(ProvenanceError::validation(format!(
                "penalty must lie in [0, 1), got {penalty}"
            )));
        }
        if best == worst {
            return Ok(self.clone());
        }

        let mut raw = self.0.clone();
        if let Some(w) = raw.get_mut(best) {
            *w *= 1.0 + boost;
        }
        if let Some(w) = raw.get_mut(worst) {
            *w *= 1.0 - penalty;
        }
        Self::from_raw(raw)
    }

    /// Check the distribution invariants.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(ProvenanceError::validation("weight map is empty"));
        }
        if let Some((name, w)) = self
            .0
            .iter()
            .find(|(_, w)| !w.is_finite() || !(0.0..=1.0).contains(*w))
        {
            return Err(ProvenanceError::validation(format!(
                "weight for '{name}' is outside [0, 1]: {w}"
            )));
        }
        let total = self.sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ProvenanceError::validation(format!(
                "weights sum to {total}, expected 1.0"
            )));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn sum(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(a: f64, b: f64) -> WeightMap {
        WeightMap::from_raw(BTreeMap::from([("a".to_string(), a), ("b".to_string(), b)])).unwrap()
    }

    #[test]
    fn test_equal_weights() {
        let w = WeightMap::equal(["x", "y", "z", "w"]).unwrap();
        assert_eq!(w.len(), 4);
        assert!((w.get("x").unwrap() - 0.25).abs() < 1e-12);
        w.validate().unwrap();
    }

    #[test]
    fn test_equal_requires_models() {
        let names: Vec<String> = Vec::new();
        let err = WeightMap::equal(names).unwrap_err();
        assert!(matches!(err, ProvenanceError::Configuration(_)));
    }

    #[test]
    fn test_from_raw_rejects_nan_and_negative() {
        assert!(WeightMap::from_raw(BTreeMap::from([("a".to_string(), f64::NAN)])).is_err());
        assert!(WeightMap::from_raw(BTreeMap::from([("a".to_string(), -0.1)])).is_err());
        assert!(WeightMap::from_raw(BTreeMap::from([("a".to_string(), 0.0)])).is_err());
    }

    #[test]
    fn test_adjusted_reference_fixture() {
        let w = pair(0.5, 0.5);
        let next = w.adjusted("a", "b", 0.395, 0.45).unwrap();
        assert!((next.get("a").unwrap() - 0.717).abs() < 1e-3);
        assert!((next.get("b").unwrap() - 0.283).abs() < 1e-3);
        next.validate().unwrap();
    }

    #[test]
    fn test_adjusted_leaves_others_unscaled_before_normalization() {
        let w = WeightMap::from_raw(BTreeMap::from([
            ("a".to_string(), 1.0),
            ("b".to_string(), 1.0),
            ("c".to_string(), 1.0),
        ]))
        .unwrap();
        let next = w.adjusted("a", "c", 0.5, 0.5).unwrap();
        // raw: a=1.5, b=1.0, c=0.5 over a total of 3.0
        assert!((next.get("a").unwrap() - 0.5).abs() < 1e-12);
        assert!((next.get("b").unwrap() - 1.0 / 3.0).abs() < 1e-12);
        assert!((next.get("c").unwrap() - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_adjusted_same_model_is_noop() {
        let w = pair(0.3, 0.7);
        assert_eq!(w.adjusted("a", "a", 0.5, 0.5).unwrap(), w);
    }

    #[test]
    fn test_adjusted_unknown_model() {
        let w = pair(0.5, 0.5);
        assert!(w.adjusted("a", "zzz", 0.3, 0.3).is_err());
    }

    #[test]
    fn test_adjusted_does_not_mutate_original() {
        let w = pair(0.5, 0.5);
        let _ = w.adjusted("a", "b", 0.5, 0.5).unwrap();
        assert_eq!(w.get("a"), Some(0.5));
    }

    #[test]
    fn test_validate_detects_bad_sum() {
        let w: WeightMap = serde_json::from_str(r#"{"a":0.4,"b":0.4}"#).unwrap();
        assert!(w.validate().is_err());
    }

    #[test]
    fn test_serde_is_transparent() {
        let w = pair(0.4, 0.6);
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"a":0.4,"b":0.6}"#);
    }
}
