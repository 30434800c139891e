// Benjamini–Hochberg false discovery rate correction
//
// Every segment receives an adjusted q-value, whether or not any hypothesis
// is rejected at alpha: q(i) = min over j >= i of p(j) * m / j, taken over the
// ascending p-value order.

/// Output of the Benjamini–Hochberg procedure
#[derive(Debug, Clone, PartialEq)]
pub struct FdrCorrection {
    /// Adjusted q-values, in the same order as the input p-values
    pub q_values: Vec<f64>,

    /// Largest raw p-value rejected at alpha, if any
    pub cutoff: Option<f64>,

    /// Number of hypotheses rejected at alpha
    pub rejected: usize,
}

/// Apply the Benjamini–Hochberg step-up procedure at level `alpha`
///
/// # Example
/// ```
/// use rollout_guard::regression::benjamini_hochberg;
///
/// let fdr = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.20], 0.10);
/// assert_eq!(fdr.rejected, 3);
/// assert_eq!(fdr.cutoff, Some(0.04));
/// assert!((fdr.q_values[0] - 0.04).abs() < 1e-12);
/// ```
pub fn benjamini_hochberg(p_values: &[f64], alpha: f64) -> FdrCorrection {
    let m = p_values.len();
    if m == 0 {
        return FdrCorrection {
            q_values: Vec::new(),
            cutoff: None,
            rejected: 0,
        };
    }

    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));
    let ranked: Vec<f64> = order.iter().map(|&i| p_values[i]).collect();

    let rejected = ranked
        .iter()
        .enumerate()
        .filter(|(i, p)| **p <= alpha * (i + 1) as f64 / m as f64)
        .map(|(i, _)| i + 1)
        .max()
        .unwrap_or(0);
    let cutoff = (rejected > 0).then(|| ranked[rejected - 1]);

    let mut q_values = vec![0.0; m];
    let mut running_min = f64::INFINITY;
    for rank in (0..m).rev() {
        let adjusted = ranked[rank] * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(adjusted);
        q_values[order[rank]] = running_min;
    }

    FdrCorrection {
        q_values,
        cutoff,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        let fdr = benjamini_hochberg(&[], 0.1);
        assert!(fdr.q_values.is_empty());
        assert_eq!(fdr.cutoff, None);
        assert_eq!(fdr.rejected, 0);
    }

    #[test]
    fn test_single_p_value_is_unchanged() {
        let fdr = benjamini_hochberg(&[0.07], 0.1);
        assert_eq!(fdr.q_values, vec![0.07]);
        assert_eq!(fdr.rejected, 1);
    }

    #[test]
    fn test_reference_q_values() {
        // Reference: statsmodels multipletests(method="fdr_bh")
        let p = [0.01, 0.02, 0.03, 0.04, 0.05];
        let fdr = benjamini_hochberg(&p, 0.05);
        for q in &fdr.q_values {
            assert!((q - 0.05).abs() < 1e-12, "q={}", q);
        }
        assert_eq!(fdr.rejected, 5);
    }

    #[test]
    fn test_step_up_rejects_below_larger_rank() {
        // rank 2 fails (0.06 > 0.05) but rank 3 passes (0.07 <= 0.075)
        let p = [0.001, 0.06, 0.07, 0.5];
        let fdr = benjamini_hochberg(&p, 0.1);
        assert_eq!(fdr.rejected, 3);
        assert_eq!(fdr.cutoff, Some(0.07));
    }

    #[test]
    fn test_q_values_assigned_without_rejection() {
        let p = [0.4, 0.9, 0.6];
        let fdr = benjamini_hochberg(&p, 0.1);
        assert_eq!(fdr.rejected, 0);
        assert_eq!(fdr.cutoff, None);
        assert!((fdr.q_values[0] - 0.9).abs() < 1e-12);
        assert!((fdr.q_values[1] - 0.9).abs() < 1e-12);
        assert!((fdr.q_values[2] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_q_values_not_below_p_values() {
        let p = [0.2, 0.001, 0.03, 0.5, 0.012, 0.9];
        let fdr = benjamini_hochberg(&p, 0.1);
        for (q, p) in fdr.q_values.iter().zip(p.iter()) {
            assert!(q >= p);
        }
    }
}
