//! Property-based tests for the deterministic primitives.

use proptest::prelude::*;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use modelprov_core::canonical::{canonical_bytes, canonical_hash};
use modelprov_core::categories::extract_categories;
use modelprov_core::dna::DnaFingerprint;
use modelprov_core::weights::{WEIGHT_TOLERANCE, WeightMap};

fn object_in_order(pairs: &[(String, i64)]) -> Value {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert(k.clone(), Value::from(*v));
    }
    Value::Object(map)
}

// --- Canonical serializer properties ---

proptest! {
    #[test]
    fn canonical_bytes_ignore_insertion_order(
        entries in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 1..12)
    ) {
        let forward: Vec<(String, i64)> = entries.clone().into_iter().collect();
        let mut reversed = forward.clone();
        reversed.reverse();
        prop_assert_eq!(
            canonical_bytes(&object_in_order(&forward)).unwrap(),
            canonical_bytes(&object_in_order(&reversed)).unwrap()
        );
    }

    #[test]
    fn canonical_hash_is_stable(
        entries in prop::collection::btree_map("[a-z_-]{1,10}", 0.0f64..1.0, 1..8)
    ) {
        prop_assert_eq!(canonical_hash(&entries).unwrap(), canonical_hash(&entries).unwrap());
    }

    #[test]
    fn canonical_hash_survives_json_roundtrip(
        entries in prop::collection::btree_map("[a-z]{1,6}", 0.0f64..1.0e6, 1..8)
    ) {
        let json = serde_json::to_string(&entries).unwrap();
        let back: BTreeMap<String, f64> = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(canonical_hash(&entries).unwrap(), canonical_hash(&back).unwrap());
    }
}

// --- Weight map properties ---

proptest! {
    #[test]
    fn adjusted_weights_stay_normalized(
        raw in prop::collection::vec(0.01f64..10.0, 2..8),
        boost in 0.20f64..=0.50,
        penalty in 0.30f64..=0.50,
        best_idx in 0usize..8,
        worst_idx in 0usize..8,
    ) {
        let names: Vec<String> = (0..raw.len()).map(|i| format!("model-{i}")).collect();
        let weights = WeightMap::from_raw(names.iter().cloned().zip(raw.iter().copied()).collect()).unwrap();
        let best = &names[best_idx % names.len()];
        let worst = &names[worst_idx % names.len()];

        let next = weights.adjusted(best, worst, boost, penalty).unwrap();
        prop_assert!((next.sum() - 1.0).abs() <= WEIGHT_TOLERANCE);
        prop_assert!(next.iter().all(|(_, w)| (0.0..=1.0).contains(&w)));
        prop_assert_eq!(next.len(), weights.len());
        if best != worst {
            prop_assert!(next.get(best).unwrap() > weights.get(best).unwrap());
            prop_assert!(next.get(worst).unwrap() < weights.get(worst).unwrap());
        }
    }
}

// --- Category and DNA properties ---

proptest! {
    #[test]
    fn categories_are_order_independent(
        names in prop::collection::vec("(civic|sv|privacy|bias|misc|data)[_-](identity|nordic|x|policy)\\.jsonl", 0..6)
    ) {
        let mut reversed = names.clone();
        reversed.reverse();
        prop_assert_eq!(extract_categories(&names), extract_categories(&reversed));
    }

    #[test]
    fn dna_changes_only_the_timestamp_segment(
        a in 0u32..1_000_000,
        b in 0u32..1_000_000,
    ) {
        prop_assume!(a != b);
        let weights = WeightMap::equal(["llama-2", "mistral-7b"]).unwrap();
        let cats: BTreeSet<String> = ["CivicID".to_string()].into();
        let fa = DnaFingerprint::generate("m", "1.0", &weights, &cats, &a.to_string()).unwrap();
        let fb = DnaFingerprint::generate("m", "1.0", &weights, &cats, &b.to_string()).unwrap();
        prop_assert_eq!(&fa.weights_segment, &fb.weights_segment);
        prop_assert_eq!(&fa.categories_segment, &fb.categories_segment);
        prop_assert_ne!(fa.dna, fb.dna);
    }
}
