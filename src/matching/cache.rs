//! Injected memoisation handle for the spatial join
//!
//! The candidate enumeration is pure given its inputs, so its result can be
//! memoised across runs. Callers that want persistence implement
//! [`MatchCache`]; the crate only ships the no-op implementation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::CandidateTuple;

/// Storage for previously enumerated candidate sets, keyed by a fingerprint
/// of the enumeration inputs
pub trait MatchCache {
    /// Look up a previously stored candidate set
    fn fetch(&self, key: u64) -> Option<Vec<CandidateTuple>>;

    /// Store a candidate set under the given fingerprint
    fn store(&mut self, key: u64, candidates: &[CandidateTuple]);
}

/// Cache implementation that never stores anything
pub struct NoCache;

impl MatchCache for NoCache {
    fn fetch(&self, _key: u64) -> Option<Vec<CandidateTuple>> {
        None
    }

    fn store(&mut self, _key: u64, _candidates: &[CandidateTuple]) {}
}

/// Fingerprint of the enumeration inputs: the search radius and every
/// coordinate of every catalogue, bit-exact
pub fn fingerprint(positions: &[(&[f64], &[f64])], radius_deg: f64) -> u64 {
    let mut hasher = DefaultHasher::new();
    radius_deg.to_bits().hash(&mut hasher);
    positions.len().hash(&mut hasher);
    for (ra, dec) in positions {
        ra.len().hash(&mut hasher);
        for value in ra.iter().chain(dec.iter()) {
            value.to_bits().hash(&mut hasher);
        }
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_sensitivity() {
        let ra = vec![10.0, 11.0];
        let dec = vec![-5.0, -6.0];
        let base = fingerprint(&[(&ra, &dec)], 0.01);

        assert_eq!(base, fingerprint(&[(&ra, &dec)], 0.01));
        assert_ne!(base, fingerprint(&[(&ra, &dec)], 0.02));

        let shifted = vec![10.0, 11.000001];
        assert_ne!(base, fingerprint(&[(&shifted, &dec)], 0.01));
    }

    #[test]
    fn test_nocache_is_empty() {
        let mut cache = NoCache;
        cache.store(7, &[vec![0, 1]]);
        assert!(cache.fetch(7).is_none());
    }
}
