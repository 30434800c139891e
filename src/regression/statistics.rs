// Two-sample statistics for arm comparisons
//
// Welch's unequal-variance t-test in f64: paid amounts run into the millions,
// so moments are accumulated in double precision. Student's t tail
// probabilities and critical values come from statrs. Medians use aprender's
// DescriptiveStats over a trueno Vector, which is f32; they are reported for
// display only and never feed a decision.

use anyhow::{Context, Result};
use aprender::stats::DescriptiveStats;
use statrs::distribution::{ContinuousCDF, StudentsT};
use trueno::Vector;

/// Result of Welch's two-sample t-test between `a` and `b`
#[derive(Debug, Clone, PartialEq)]
pub struct WelchTest {
    /// Mean of `a` minus mean of `b`
    pub mean_difference: f64,

    /// t-statistic
    pub statistic: f64,

    /// Two-sided p-value
    pub p_value: f64,

    /// Welch–Satterthwaite degrees of freedom
    pub df: f64,

    /// Standard error of the mean difference
    pub std_error: f64,
}

impl WelchTest {
    /// Two-sided confidence interval around the mean difference
    ///
    /// `confidence` is the coverage, e.g. 0.95.
    pub fn confidence_interval(&self, confidence: f64) -> Result<(f64, f64)> {
        let crit = t_critical(self.df, confidence)?;
        let half_width = crit * self.std_error;
        Ok((
            self.mean_difference - half_width,
            self.mean_difference + half_width,
        ))
    }
}

/// Arithmetic mean; NaN for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance (Bessel's correction, divides by n - 1)
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Compare two samples using Welch's independent t-test
///
/// # Errors
/// Fails when either sample has fewer than 2 values or when both samples
/// have zero variance (the statistic is undefined).
///
/// # Example
/// ```
/// use rollout_guard::regression::welch_t_test;
///
/// let control = vec![120.0, 125.0, 118.0, 130.0, 122.0];
/// let treatment = vec![100.0, 98.0, 104.0, 101.0, 97.0];
///
/// let test = welch_t_test(&control, &treatment).unwrap();
/// assert!(test.mean_difference > 0.0);
/// assert!(test.p_value < 0.05);
/// ```
pub fn welch_t_test(a: &[f64], b: &[f64]) -> Result<WelchTest> {
    if a.len() < 2 || b.len() < 2 {
        anyhow::bail!(
            "Need at least 2 samples per group for t-test (got {} and {})",
            a.len(),
            b.len()
        );
    }

    let (n_a, n_b) = (a.len() as f64, b.len() as f64);
    let se2_a = sample_variance(a) / n_a;
    let se2_b = sample_variance(b) / n_b;
    let se2 = se2_a + se2_b;

    if se2 <= 0.0 || !se2.is_finite() {
        anyhow::bail!("Both samples have zero variance; t-statistic is undefined");
    }

    let mean_difference = mean(a) - mean(b);
    let std_error = se2.sqrt();
    let statistic = mean_difference / std_error;
    let df = se2.powi(2) / (se2_a.powi(2) / (n_a - 1.0) + se2_b.powi(2) / (n_b - 1.0));

    let dist = students_t(df)?;
    let p_value = (2.0 * (1.0 - dist.cdf(statistic.abs()))).clamp(0.0, 1.0);

    Ok(WelchTest {
        mean_difference,
        statistic,
        p_value,
        df,
        std_error,
    })
}

/// Two-sided critical value of Student's t for the given coverage
pub fn t_critical(df: f64, confidence: f64) -> Result<f64> {
    if !(confidence > 0.0 && confidence < 1.0) {
        anyhow::bail!("confidence must be in (0, 1), got {}", confidence);
    }
    let dist = students_t(df)?;
    Ok(dist.inverse_cdf(1.0 - (1.0 - confidence) / 2.0))
}

fn students_t(df: f64) -> Result<StudentsT> {
    StudentsT::new(0.0, 1.0, df)
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Invalid Student's t degrees of freedom: {}", df))
}

/// Median using aprender's DescriptiveStats (R-7 quantile)
///
/// Computed in single precision: amounts above 2^24 lose their fractional
/// part and relative error is about 6e-8.
pub fn median(values: &[f64]) -> Result<f64> {
    if values.is_empty() {
        anyhow::bail!("Cannot compute median of an empty sample");
    }
    let narrowed: Vec<f32> = values.iter().map(|v| *v as f32).collect();
    let vector = Vector::from_slice(&narrowed);
    let stats = DescriptiveStats::new(&vector);
    stats
        .quantile(0.5)
        .map(f64::from)
        .map_err(|e| anyhow::anyhow!("Failed to compute median: {}", e))
}
