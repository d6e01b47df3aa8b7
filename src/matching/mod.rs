//! Spatial join engine: hash-grid indexing and candidate enumeration
//!
//! Sources are bucketed into grid cells of the search radius; the Cartesian
//! product within each bucket, with an explicit "no counterpart" option per
//! secondary catalogue, yields every candidate association closer than the
//! radius. The naive Θ(∏Nᵢ) enumeration shrinks by orders of magnitude
//! because only co-located sources ever meet in a bucket.
//!
//! Right-ascension wrap-around at 0°/360° is not handled: the grid uses
//! unbounded integer cells, so sources on opposite sides of the meridian
//! never share a bucket. Pre-rotate coordinates for fields crossing RA = 0.

use log::{debug, info, warn};
use std::collections::{BTreeSet, HashMap};

use crate::Result;

pub mod cache;
pub mod join;

pub use cache::{fingerprint, MatchCache, NoCache};

/// A candidate association: one row index per catalogue, `-1` marking an
/// absent counterpart in a secondary catalogue
pub type CandidateTuple = Vec<i32>;

/// Expected candidate counts above this produce a warning before enumeration
pub const CANDIDATE_BUDGET: u64 = 100_000_000;

/// Hash grid over the sky with cells the size of the search radius.
///
/// Every source is stamped into its own cell `(⌊RA/ε⌋, ⌊DEC/ε⌋)` and the
/// three forward neighbours `(i+1,j)`, `(i,j+1)`, `(i+1,j+1)`: two sources
/// closer than one cell size are then guaranteed to share at least one
/// bucket, at the cost of each pair being visited up to four times.
pub struct GridIndex {
    buckets: HashMap<(i64, i64), Vec<Vec<i32>>>,
}

impl GridIndex {
    /// Bucket every source of every catalogue into the grid
    pub fn build(positions: &[(&[f64], &[f64])], cell_deg: f64) -> Self {
        let ncat = positions.len();
        let mut buckets: HashMap<(i64, i64), Vec<Vec<i32>>> = HashMap::new();
        for (ti, (ra_col, dec_col)) in positions.iter().enumerate() {
            for (ei, (&ra, &dec)) in ra_col.iter().zip(dec_col.iter()).enumerate() {
                let i = (ra / cell_deg).floor() as i64;
                let j = (dec / cell_deg).floor() as i64;
                for key in [(i, j), (i + 1, j), (i, j + 1), (i + 1, j + 1)] {
                    buckets
                        .entry(key)
                        .or_insert_with(|| vec![Vec::new(); ncat])[ti]
                        .push(ei as i32);
                }
            }
        }
        Self { buckets }
    }

    /// Number of non-empty buckets
    pub fn n_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Expected candidate count after hashing:
    /// Σ over buckets of |L₀|·∏ᵢ(|Lᵢ|+1)
    pub fn expected_candidates(&self) -> u64 {
        self.buckets
            .values()
            .map(|lists| {
                let secondaries = lists[1..]
                    .iter()
                    .fold(1u64, |acc, l| acc.saturating_mul(l.len() as u64 + 1));
                (lists[0].len() as u64).saturating_mul(secondaries)
            })
            .fold(0u64, u64::saturating_add)
    }
}

/// Enumerate all candidate associations within the search radius.
///
/// Returns the deduplicated tuples in lexicographic order. Tuples whose
/// only present slot is the primary are dropped: a primary without any
/// counterpart carries no information and re-enters the scoring only
/// through the group no-match probability. The injected cache can
/// short-circuit the enumeration entirely.
pub fn enumerate_candidates(
    positions: &[(&[f64], &[f64])],
    radius_deg: f64,
    cache: &mut dyn MatchCache,
) -> Result<Vec<CandidateTuple>> {
    let key = cache::fingerprint(positions, radius_deg);
    if let Some(hit) = cache.fetch(key) {
        debug!("spatial join served from cache ({} tuples)", hit.len());
        return Ok(hit);
    }

    let naive = positions
        .iter()
        .map(|(ra, _)| ra.len() as u64)
        .fold(1u64, u64::saturating_mul);
    info!("matching: {} naive possibilities", naive);

    let index = GridIndex::build(positions, radius_deg);
    let expected = index.expected_candidates();
    info!(
        "matching: {} matches after hashing, collecting from {} buckets",
        expected,
        index.n_buckets()
    );
    if expected > CANDIDATE_BUDGET {
        warn!(
            "candidate set after hashing is very large ({} tuples); \
             consider a smaller search radius",
            expected
        );
    }

    let mut results: BTreeSet<CandidateTuple> = BTreeSet::new();
    // buckets are consumed as they are processed, releasing indexer memory
    // before the join table is materialised
    for (_, mut lists) in index.buckets {
        if lists[0].is_empty() {
            continue;
        }
        for list in lists.iter_mut().skip(1) {
            list.push(-1);
        }
        emit_product(&lists, &mut results);
    }
    info!("matching: {} unique matches from crossproduct", results.len());

    let candidates: Vec<CandidateTuple> = results
        .into_iter()
        .filter(|tuple| tuple.iter().filter(|&&e| e != -1).count() > 1)
        .collect();
    info!("matching: {} matches", candidates.len());

    cache.store(key, &candidates);
    Ok(candidates)
}

/// Emit the Cartesian product of the per-catalogue lists into `out`.
///
/// Iterative odometer over the list lengths; recursion would grow with the
/// catalogue count and the stack-based form keeps memory bounded when some
/// lists are large.
fn emit_product(lists: &[Vec<i32>], out: &mut BTreeSet<CandidateTuple>) {
    if lists.iter().any(|l| l.is_empty()) {
        return;
    }
    let mut cursor = vec![0usize; lists.len()];
    loop {
        out.insert(cursor.iter().zip(lists).map(|(&c, l)| l[c]).collect());
        let mut depth = lists.len() - 1;
        loop {
            cursor[depth] += 1;
            if cursor[depth] < lists[depth].len() {
                break;
            }
            cursor[depth] = 0;
            if depth == 0 {
                return;
            }
            depth -= 1;
        }
    }
}
