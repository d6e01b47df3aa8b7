//! Bayesian association scoring
//!
//! Evidence that a tuple of sources is the same astrophysical object,
//! against the hypothesis that the sources are unrelated: each catalogue
//! contributes a 2D Gaussian astrometric error model, the true source
//! position is marginalised out, and the resulting Bayes factor is combined
//! with a prior built from the catalogue source densities.

use std::f64::consts::{LN_10, LN_2, PI};

use crate::coordinates::ARCSEC_PER_DEG;
use crate::matching::join::pair_index;
use crate::matching::CandidateTuple;
use crate::{Result, SkymatchError};

/// log₁₀ Bayes factor for one association.
///
/// `errors` are the positional uncertainties σᵢ (arcsec) of the catalogues
/// the tuple is present in; `psi(i, j)` is the angular separation (arcsec)
/// between members i and j (indices into `errors`, i < j). With precisions
/// wᵢ = σᵢ⁻² the log evidence ratio is
///
/// ```text
/// ln BF = (n−1)(ln 2 + 2 ln r) + Σ ln wᵢ − ln Σ wᵢ − Σᵢ<ⱼ wᵢwⱼψᵢⱼ² / (2 Σ wᵢ)
/// ```
///
/// where r converts arcseconds to radians. A single present catalogue has
/// no positional information and scores 0.
pub fn log_bf(errors: &[f64], psi: impl Fn(usize, usize) -> f64) -> f64 {
    let n = errors.len();
    if n <= 1 {
        return 0.0;
    }
    let ln_r = (ARCSEC_PER_DEG * 180.0 / PI).ln();
    let w: Vec<f64> = errors.iter().map(|s| s.powi(-2)).collect();
    let w_sum: f64 = w.iter().sum();
    let norm = (n - 1) as f64 * (LN_2 + 2.0 * ln_r);
    let shape = w.iter().map(|wi| wi.ln()).sum::<f64>() - w_sum.ln();
    let mut q = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            let s = psi(i, j);
            q += w[i] * w[j] * s * s;
        }
    }
    (norm + shape - q / (2.0 * w_sum)) / LN_10
}

/// Posterior association probability from a prior and a log₁₀ Bayes factor.
///
/// Evaluated through the log odds so that huge Bayes factors cannot
/// overflow: posterior = 1 / (1 + 10^{−(log_bf + log₁₀ π/(1−π))}).
/// Degenerate priors short-circuit to 0 and 1.
pub fn posterior(prior: f64, log_bf: f64) -> f64 {
    if prior <= 0.0 {
        return 0.0;
    }
    if prior >= 1.0 {
        return 1.0;
    }
    let log_odds = log_bf + (prior / (1.0 - prior)).log10();
    1.0 / (1.0 + 10f64.powf(-log_odds))
}

/// Base-10 logsumexp: log₁₀ Σ 10^vᵢ, stabilised by the maximum element.
///
/// The reduction order is the slice order, so group sums stay reproducible
/// across runs.
pub fn logsumexp10(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values
        .iter()
        .map(|v| 10f64.powf(v - max))
        .sum::<f64>()
        .log10()
}

/// Everything the scorer needs besides the tuples themselves
pub struct ScoreInputs<'a> {
    /// Positional uncertainty per catalogue, per join row (arcsec); entries
    /// for absent slots are never read
    pub errors: Vec<Vec<f64>>,
    /// Pairwise separation columns (arcsec) in [`pair_index`] order
    pub separations: Vec<&'a [f64]>,
    /// Inflated source densities ρᵢ⁺ per catalogue, with ρ₀⁺ = ρ₀
    pub densities_plus: Vec<f64>,
    /// Source density ρ₀ of the primary catalogue
    pub primary_density: f64,
    /// Completeness prior C in [0, 1]
    pub completeness: f64,
}

/// Score every tuple: log₁₀ Bayes factor and prior.
///
/// Each row is scored under its own presence pattern — the 2^{N−1} possible
/// patterns partition the rows, and the pattern picks the reduced error,
/// separation and density sets. The prior divides ρ₀·C by the inflated
/// density of every present catalogue; the primary's ρ₀⁺ ≡ ρ₀ cancels, so
/// absent counterparts leave their ρᵢ⁺ out of the denominator.
pub fn score_tuples(
    tuples: &[CandidateTuple],
    inputs: &ScoreInputs,
) -> Result<(Vec<f64>, Vec<f64>)> {
    let ncat = inputs.densities_plus.len();
    let mut log_bfs = Vec::with_capacity(tuples.len());
    let mut priors = Vec::with_capacity(tuples.len());

    for (row, tuple) in tuples.iter().enumerate() {
        let present: Vec<usize> = (0..ncat).filter(|&i| tuple[i] >= 0).collect();
        let errs: Vec<f64> = present.iter().map(|&i| inputs.errors[i][row]).collect();
        let lbf = log_bf(&errs, |a, b| {
            inputs.separations[pair_index(ncat, present[a], present[b])][row]
        });
        // a NaN from clean inputs is a bug; zero uncertainties have already
        // been warned about and flow through as NaN posteriors
        if lbf.is_nan() && errs.iter().all(|&e| e > 0.0) {
            return Err(SkymatchError::Numeric(format!(
                "NaN Bayes factor for tuple {:?}",
                tuple
            )));
        }

        let mut prior = inputs.primary_density * inputs.completeness;
        for &i in &present {
            prior /= inputs.densities_plus[i];
        }

        log_bfs.push(lbf);
        priors.push(prior);
    }
    Ok((log_bfs, priors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_log_bf_two_way_closed_form() {
        // closed 2-way form: (ln 2 + 2 ln r − ln(σ₁²+σ₂²) − ψ²/2(σ₁²+σ₂²)) / ln 10
        let (s1, s2, psi) = (0.5f64, 1.2f64, 0.8f64);
        let ln_r = (ARCSEC_PER_DEG * 180.0 / PI).ln();
        let ss = s1 * s1 + s2 * s2;
        let expected = (LN_2 + 2.0 * ln_r - ss.ln() - psi * psi / (2.0 * ss)) / LN_10;

        let got = log_bf(&[s1, s2], |_, _| psi);
        assert_relative_eq!(got, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_log_bf_single_member_is_zero() {
        assert_eq!(log_bf(&[0.7], |_, _| unreachable!()), 0.0);
        assert_eq!(log_bf(&[], |_, _| unreachable!()), 0.0);
    }

    #[test]
    fn test_log_bf_decreases_with_separation() {
        let near = log_bf(&[1.0, 1.0], |_, _| 0.1);
        let far = log_bf(&[1.0, 1.0], |_, _| 3.0);
        assert!(near > far);
        // a coincident pair with tight errors is strong evidence
        assert!(log_bf(&[0.1, 0.1], |_, _| 0.0) > 0.0);
    }

    #[test]
    fn test_posterior_law() {
        for &prior in &[1e-6, 0.01, 0.5, 0.99] {
            // zero evidence returns the prior
            assert_relative_eq!(posterior(prior, 0.0), prior, epsilon = 1e-12);
            for &lbf in &[-400.0, -3.0, 0.0, 3.0, 400.0] {
                let p = posterior(prior, lbf);
                assert!((0.0..=1.0).contains(&p), "posterior {} out of range", p);
            }
        }
        assert_eq!(posterior(0.0, 100.0), 0.0);
        assert_eq!(posterior(1.0, -100.0), 1.0);
        // overwhelming evidence saturates without overflow
        assert_relative_eq!(posterior(1e-9, 500.0), 1.0);
        assert_relative_eq!(posterior(0.9, -500.0), 0.0);
    }

    #[test]
    fn test_logsumexp10() {
        let got = logsumexp10(&[2.0, 3.0]);
        assert_relative_eq!(got, (1e2f64 + 1e3).log10(), epsilon = 1e-12);

        // stable far outside the range of 10^x
        let got = logsumexp10(&[400.0, 400.0]);
        assert_relative_eq!(got, 400.0 + 2f64.log10(), epsilon = 1e-12);

        assert_eq!(logsumexp10(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_score_tuples_patterns_and_prior() {
        // two catalogues, density 1 each, inflated density 2 for the secondary
        let separations = vec![0.5, f64::NAN];
        let seps: Vec<&[f64]> = vec![&separations];
        let inputs = ScoreInputs {
            errors: vec![vec![1.0, 1.0], vec![1.0, 1.0]],
            separations: seps,
            densities_plus: vec![1.0, 2.0],
            primary_density: 1.0,
            completeness: 0.5,
        };
        let tuples = vec![vec![0, 0], vec![0, -1]];
        let (lbf, prior) = score_tuples(&tuples, &inputs).unwrap();

        // present pair: prior = rho0*C/(rho0 * rho1+) = 0.5/2
        assert_relative_eq!(prior[0], 0.25, epsilon = 1e-12);
        // primary alone: nothing but the completeness in the numerator
        assert_relative_eq!(prior[1], 0.5, epsilon = 1e-12);

        assert_relative_eq!(lbf[0], log_bf(&[1.0, 1.0], |_, _| 0.5), epsilon = 1e-12);
        assert_eq!(lbf[1], 0.0);
    }

    #[test]
    fn test_score_tuples_three_way_uses_all_pairs() {
        // separations in pair_index order: (0,1), (0,2), (1,2)
        let s01 = vec![0.3];
        let s02 = vec![0.4];
        let s12 = vec![0.5];
        let seps: Vec<&[f64]> = vec![&s01, &s02, &s12];
        let inputs = ScoreInputs {
            errors: vec![vec![0.5], vec![0.6], vec![0.7]],
            separations: seps,
            densities_plus: vec![10.0, 20.0, 30.0],
            primary_density: 10.0,
            completeness: 1.0,
        };
        let tuples = vec![vec![0, 0, 0]];
        let (lbf, prior) = score_tuples(&tuples, &inputs).unwrap();

        let expected = log_bf(&[0.5, 0.6, 0.7], |i, j| match (i, j) {
            (0, 1) => 0.3,
            (0, 2) => 0.4,
            (1, 2) => 0.5,
            _ => unreachable!(),
        });
        assert_relative_eq!(lbf[0], expected, epsilon = 1e-12);
        assert_relative_eq!(prior[0], 1.0 / (20.0 * 30.0), epsilon = 1e-15);
    }
}
