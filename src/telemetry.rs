//! Savings and operations KPIs over a ledger snapshot
//!
//! Savings are estimated as effect-per-claim times the number of TREATMENT
//! claims in a window. Windows end at the as-of date, which is the latest
//! claim date in the ledger rather than the wall clock.

use crate::ledger::{Arm, ClaimDecision, ClaimRecord};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::BTreeMap;

/// Savings KPI bundle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SavingKpi {
    pub asof_date: Option<NaiveDate>,
    pub saving_today: Option<f64>,
    pub saving_mtd: Option<f64>,
    pub saving_qtd: Option<f64>,
    /// Day-over-day change against the previous calendar day
    pub dod_pct: Option<f64>,
    /// Mean daily saving over the trailing seven calendar days that have claims
    pub ma7: Option<f64>,
    pub target_mtd: f64,
    pub target_qtd: f64,
    pub mtd_progress: Option<f64>,
    pub qtd_progress: Option<f64>,
}

/// Operations KPI bundle for the as-of day
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OpsKpi {
    pub asof_date: Option<NaiveDate>,
    pub claims_today: Option<usize>,
    pub treatment_rate_today: Option<f64>,
    pub review_rate_today: Option<f64>,
    pub avg_score_today: Option<f64>,
    /// CONTROL share over the whole ledger
    pub control_rate_observed: Option<f64>,
}

/// Latest claim date in the ledger
pub fn asof_date(records: &[ClaimRecord]) -> Option<NaiveDate> {
    records.iter().map(|r| r.claim_date).max()
}

pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn quarter_start(date: NaiveDate) -> NaiveDate {
    let month = 3 * ((date.month() - 1) / 3) + 1;
    NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
}

/// Estimated saving per claim date, TREATMENT claims only
pub fn daily_savings(effect_per_claim: f64, records: &[ClaimRecord]) -> BTreeMap<NaiveDate, f64> {
    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for record in records.iter().filter(|r| r.arm == Arm::Treatment) {
        *counts.entry(record.claim_date).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(date, n)| (date, effect_per_claim * n as f64))
        .collect()
}

/// Savings KPIs for today, month-to-date and quarter-to-date
pub fn saving_kpis(
    effect_per_claim: Option<f64>,
    records: &[ClaimRecord],
    target_mtd: f64,
    target_qtd: f64,
) -> SavingKpi {
    let mut kpi = SavingKpi {
        target_mtd,
        target_qtd,
        ..Default::default()
    };

    let Some(effect) = effect_per_claim.filter(|e| e.is_finite()) else {
        return kpi;
    };
    let Some(asof) = asof_date(records) else {
        return kpi;
    };

    let daily = daily_savings(effect, records);
    let window_sum = |start: NaiveDate| -> f64 { daily.range(start..=asof).map(|(_, v)| v).sum() };

    let today = daily.get(&asof).copied().unwrap_or(0.0);
    let mtd = window_sum(month_start(asof));
    let qtd = window_sum(quarter_start(asof));

    let prev = daily.get(&(asof - Duration::days(1))).copied().unwrap_or(0.0);
    let last7: Vec<f64> = daily
        .range(asof - Duration::days(6)..=asof)
        .map(|(_, v)| *v)
        .collect();

    kpi.asof_date = Some(asof);
    kpi.saving_today = Some(today);
    kpi.saving_mtd = Some(mtd);
    kpi.saving_qtd = Some(qtd);
    kpi.dod_pct = (prev > 0.0).then(|| (today - prev) / prev);
    kpi.ma7 = (!last7.is_empty()).then(|| last7.iter().sum::<f64>() / last7.len() as f64);
    kpi.mtd_progress = (target_mtd > 0.0).then(|| mtd / target_mtd);
    kpi.qtd_progress = (target_qtd > 0.0).then(|| qtd / target_qtd);
    kpi
}

/// Operations KPIs for the as-of day
pub fn ops_kpis(records: &[ClaimRecord]) -> OpsKpi {
    let Some(asof) = asof_date(records) else {
        return OpsKpi::default();
    };

    let today: Vec<&ClaimRecord> = records.iter().filter(|r| r.claim_date == asof).collect();
    let n = today.len() as f64;
    let share = |pred: &dyn Fn(&ClaimRecord) -> bool| {
        today.iter().filter(|r| pred(**r)).count() as f64 / n
    };

    let scores: Vec<f64> = today
        .iter()
        .filter_map(|r| r.risk_score)
        .filter(|s| s.is_finite())
        .collect();
    let control = records.iter().filter(|r| r.arm == Arm::Control).count();

    OpsKpi {
        asof_date: Some(asof),
        claims_today: Some(today.len()),
        treatment_rate_today: Some(share(&|r| r.arm == Arm::Treatment)),
        review_rate_today: Some(share(&|r| r.decision == ClaimDecision::Review)),
        avg_score_today: (!scores.is_empty())
            .then(|| scores.iter().sum::<f64>() / scores.len() as f64),
        control_rate_observed: Some(control as f64 / records.len() as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ledger() -> Vec<ClaimRecord> {
        vec![
            // previous quarter
            ClaimRecord::new("q1", date(2024, 3, 31), Arm::Treatment, 100.0),
            // same quarter, previous month
            ClaimRecord::new("a1", date(2024, 4, 30), Arm::Treatment, 100.0),
            ClaimRecord::new("a2", date(2024, 4, 30), Arm::Control, 100.0),
            // same month
            ClaimRecord::new("m1", date(2024, 5, 14), Arm::Treatment, 100.0),
            ClaimRecord::new("m2", date(2024, 5, 14), Arm::Treatment, 100.0),
            // as-of day
            ClaimRecord::new("t1", date(2024, 5, 15), Arm::Treatment, 100.0)
                .with_score(0.9)
                .with_decision(ClaimDecision::Review),
            ClaimRecord::new("t2", date(2024, 5, 15), Arm::Treatment, 100.0).with_score(0.3),
            ClaimRecord::new("t3", date(2024, 5, 15), Arm::Control, 100.0),
            ClaimRecord::new("t4", date(2024, 5, 15), Arm::Treatment, 100.0),
        ]
    }

    #[test]
    fn test_period_starts() {
        assert_eq!(month_start(date(2024, 5, 15)), date(2024, 5, 1));
        assert_eq!(quarter_start(date(2024, 5, 15)), date(2024, 4, 1));
        assert_eq!(quarter_start(date(2024, 12, 31)), date(2024, 10, 1));
        assert_eq!(quarter_start(date(2024, 1, 1)), date(2024, 1, 1));
    }

    #[test]
    fn test_saving_windows() {
        let kpi = saving_kpis(Some(1000.0), &ledger(), 10_000.0, 0.0);

        assert_eq!(kpi.asof_date, Some(date(2024, 5, 15)));
        assert_eq!(kpi.saving_today, Some(3000.0));
        assert_eq!(kpi.saving_mtd, Some(5000.0));
        assert_eq!(kpi.saving_qtd, Some(6000.0));
        assert_eq!(kpi.mtd_progress, Some(0.5));
        assert_eq!(kpi.qtd_progress, None);
        // 3000 today vs 2000 yesterday
        assert!((kpi.dod_pct.unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(kpi.ma7, Some(2500.0));
    }

    #[test]
    fn test_saving_without_effect_or_ledger() {
        let kpi = saving_kpis(None, &ledger(), 1.0, 1.0);
        assert_eq!(kpi.asof_date, None);
        assert_eq!(kpi.saving_today, None);
        assert_eq!(kpi.target_mtd, 1.0);

        let kpi = saving_kpis(Some(1000.0), &[], 1.0, 1.0);
        assert_eq!(kpi.saving_mtd, None);
    }

    #[test]
    fn test_saving_with_no_treatment_claims_is_zero() {
        let records = vec![ClaimRecord::new("c", date(2024, 5, 1), Arm::Control, 1.0)];
        let kpi = saving_kpis(Some(1000.0), &records, 0.0, 0.0);
        assert_eq!(kpi.saving_today, Some(0.0));
        assert_eq!(kpi.saving_qtd, Some(0.0));
        assert_eq!(kpi.dod_pct, None);
    }

    #[test]
    fn test_ops_kpis() {
        let ops = ops_kpis(&ledger());
        assert_eq!(ops.asof_date, Some(date(2024, 5, 15)));
        assert_eq!(ops.claims_today, Some(4));
        assert_eq!(ops.treatment_rate_today, Some(0.75));
        assert_eq!(ops.review_rate_today, Some(0.25));
        assert!((ops.avg_score_today.unwrap() - 0.6).abs() < 1e-12);
        assert!((ops.control_rate_observed.unwrap() - 2.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_ops_kpis_empty_ledger() {
        assert_eq!(ops_kpis(&[]), OpsKpi::default());
    }
}
