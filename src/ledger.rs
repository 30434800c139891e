//! Claim-outcome ledger
//!
//! The ledger is an append-only list of [`ClaimRecord`]s written by the batch
//! scorer. This module is the single ingestion boundary: field aliases are
//! resolved and malformed rows are dropped here, so the estimator, detector
//! and telemetry only ever see canonical, typed records.
//!
//! Wire format is JSON Lines, one claim per line:
//!
//! ```text
//! {"claim_id":"C0000001","claim_date":"2024-03-01","exp_group":"TREATMENT","paid_amount":125000.0,"decision":"PAY","score":0.12,"channel":"web"}
//! ```

use crate::policy::PolicyMode;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Columns that are never treated as segment attributes
const RESERVED_COLUMNS: &[&str] = &[
    "claim_id",
    "claim_date",
    "date",
    "exp_group",
    "group",
    "arm",
    "paid_amount",
    "decision",
    "score",
    "risk_score",
    "label",
    "policy_version",
    "mode",
    "control_rate",
];

/// Experiment arm a claim was assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Arm {
    Control,
    Treatment,
}

impl Arm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arm::Control => "CONTROL",
            Arm::Treatment => "TREATMENT",
        }
    }

    /// Parse an arm label case-insensitively
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "CONTROL" => Some(Arm::Control),
            "TREATMENT" => Some(Arm::Treatment),
            _ => None,
        }
    }
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review policy outcome for a claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClaimDecision {
    Pay,
    Review,
}

impl ClaimDecision {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "PAY" => Some(ClaimDecision::Pay),
            "REVIEW" => Some(ClaimDecision::Review),
            _ => None,
        }
    }
}

/// One claim's outcome after policy application
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimRecord {
    pub claim_id: String,
    pub claim_date: NaiveDate,
    #[serde(rename = "exp_group")]
    pub arm: Arm,
    pub paid_amount: f64,
    pub decision: ClaimDecision,
    #[serde(rename = "score", skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<PolicyMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_rate: Option<f64>,
    /// Low-cardinality categorical attributes (channel, product, region, ...)
    #[serde(flatten)]
    pub segments: BTreeMap<String, String>,
}

impl ClaimRecord {
    /// Create a PAY record with no score and no segment attributes
    pub fn new(
        claim_id: impl Into<String>,
        claim_date: NaiveDate,
        arm: Arm,
        paid_amount: f64,
    ) -> Self {
        Self {
            claim_id: claim_id.into(),
            claim_date,
            arm,
            paid_amount,
            decision: ClaimDecision::Pay,
            risk_score: None,
            policy_version: None,
            mode: None,
            control_rate: None,
            segments: BTreeMap::new(),
        }
    }

    pub fn with_decision(mut self, decision: ClaimDecision) -> Self {
        self.decision = decision;
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.risk_score = Some(score);
        self
    }

    pub fn with_segment(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.segments.insert(column.into(), value.into());
        self
    }

    /// Paid amount if it passes the numeric predicate (finite, non-negative)
    pub fn valid_paid(&self) -> Option<f64> {
        (self.paid_amount.is_finite() && self.paid_amount >= 0.0).then_some(self.paid_amount)
    }

    pub fn segment(&self, column: &str) -> Option<&str> {
        self.segments.get(column).map(String::as_str)
    }
}

/// Errors raised while reading a ledger file
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger not found: {0}")]
    Missing(PathBuf),

    #[error("Failed to read ledger {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reason a ledger row was excluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecord {
    InvalidJson,
    MissingField(&'static str),
    InvalidPaidAmount,
    InvalidDate,
    UnknownArm(String),
    UnknownDecision(String),
}

impl fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedRecord::InvalidJson => write!(f, "invalid JSON"),
            MalformedRecord::MissingField(name) => write!(f, "missing field '{}'", name),
            MalformedRecord::InvalidPaidAmount => write!(f, "non-numeric or negative paid_amount"),
            MalformedRecord::InvalidDate => write!(f, "unparseable claim_date"),
            MalformedRecord::UnknownArm(label) => write!(f, "unrecognized arm '{}'", label),
            MalformedRecord::UnknownDecision(label) => {
                write!(f, "unrecognized decision '{}'", label)
            }
        }
    }
}

/// Result of ingesting a ledger: the valid records and how many rows were skipped
#[derive(Debug, Clone, Default)]
pub struct LedgerLoad {
    pub records: Vec<ClaimRecord>,
    pub skipped: usize,
}

/// Parse a JSON Lines ledger, skipping malformed rows
pub fn parse_ledger(text: &str) -> LedgerLoad {
    let mut load = LedgerLoad::default();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok(record) => load.records.push(record),
            Err(reason) => {
                tracing::warn!("Skipping ledger line {}: {}", idx + 1, reason);
                load.skipped += 1;
            }
        }
    }

    tracing::debug!(
        records = load.records.len(),
        skipped = load.skipped,
        "Parsed claim ledger"
    );
    load
}

/// Read and parse a JSON Lines ledger file
pub fn load_ledger<P: AsRef<Path>>(path: P) -> Result<LedgerLoad, LedgerError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            LedgerError::Missing(path.to_path_buf())
        } else {
            LedgerError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    Ok(parse_ledger(&text))
}

/// Parse one ledger line into a canonical record
pub fn parse_line(line: &str) -> Result<ClaimRecord, MalformedRecord> {
    let value: Value = serde_json::from_str(line).map_err(|_| MalformedRecord::InvalidJson)?;
    let Value::Object(map) = value else {
        return Err(MalformedRecord::InvalidJson);
    };
    normalize(&map)
}

/// Resolve aliases and coerce types for one raw row
pub fn normalize(map: &Map<String, Value>) -> Result<ClaimRecord, MalformedRecord> {
    let claim_id = match map.get("claim_id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(MalformedRecord::MissingField("claim_id")),
    };

    let date_text = first_of(map, &["claim_date", "date"])
        .and_then(Value::as_str)
        .ok_or(MalformedRecord::MissingField("claim_date"))?;
    let claim_date = parse_date(date_text).ok_or(MalformedRecord::InvalidDate)?;

    let arm_label = first_of(map, &["exp_group", "group", "arm"])
        .and_then(Value::as_str)
        .ok_or(MalformedRecord::MissingField("exp_group"))?;
    let arm = Arm::parse(arm_label).ok_or_else(|| MalformedRecord::UnknownArm(arm_label.into()))?;

    let paid_amount = map
        .get("paid_amount")
        .and_then(coerce_f64)
        .filter(|p| p.is_finite() && *p >= 0.0)
        .ok_or(MalformedRecord::InvalidPaidAmount)?;

    let decision = match map.get("decision").and_then(Value::as_str) {
        None => ClaimDecision::Pay,
        Some(label) => ClaimDecision::parse(label)
            .ok_or_else(|| MalformedRecord::UnknownDecision(label.into()))?,
    };

    let risk_score = first_of(map, &["score", "risk_score"])
        .and_then(coerce_f64)
        .filter(|s| (0.0..=1.0).contains(s));

    let policy_version = map
        .get("policy_version")
        .and_then(Value::as_str)
        .map(str::to_string);
    let mode = map
        .get("mode")
        .cloned()
        .and_then(|v| serde_json::from_value::<PolicyMode>(v).ok());
    let control_rate = map.get("control_rate").and_then(coerce_f64);

    let segments = map
        .iter()
        .filter(|(key, _)| !RESERVED_COLUMNS.contains(&key.as_str()))
        .filter_map(|(key, value)| match value {
            Value::String(s) if !s.trim().is_empty() => Some((key.clone(), s.clone())),
            _ => None,
        })
        .collect();

    Ok(ClaimRecord {
        claim_id,
        claim_date,
        arm,
        paid_amount,
        decision,
        risk_score,
        policy_version,
        mode,
        control_rate,
        segments,
    })
}

fn first_of<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k).filter(|v| !v.is_null()))
}

fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD` or any timestamp starting with one
fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .or_else(|| text.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// Serialize records as JSON Lines
pub fn to_json_lines(records: &[ClaimRecord]) -> serde_json::Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_canonical_line() {
        let line = r#"{"claim_id":"C1","claim_date":"2024-03-01","exp_group":"TREATMENT","paid_amount":125000.0,"decision":"REVIEW","score":0.91,"channel":"web"}"#;
        let record = parse_line(line).unwrap();

        assert_eq!(record.claim_id, "C1");
        assert_eq!(record.claim_date, date(2024, 3, 1));
        assert_eq!(record.arm, Arm::Treatment);
        assert_eq!(record.paid_amount, 125000.0);
        assert_eq!(record.decision, ClaimDecision::Review);
        assert_eq!(record.risk_score, Some(0.91));
        assert_eq!(record.segment("channel"), Some("web"));
    }

    #[test]
    fn test_aliases_are_resolved() {
        let line = r#"{"claim_id":42,"date":"2024-03-01T09:15:00Z","group":"control","paid_amount":"1000"}"#;
        let record = parse_line(line).unwrap();

        assert_eq!(record.claim_id, "42");
        assert_eq!(record.claim_date, date(2024, 3, 1));
        assert_eq!(record.arm, Arm::Control);
        assert_eq!(record.paid_amount, 1000.0);
        assert_eq!(record.decision, ClaimDecision::Pay);
    }

    #[test]
    fn test_audit_columns_are_not_segments() {
        let line = r#"{"claim_id":"C1","claim_date":"2024-03-01","exp_group":"CONTROL","paid_amount":1.0,"policy_version":"P3","mode":"EXPERIMENT","control_rate":0.05,"region":"north","zip":12345}"#;
        let record = parse_line(line).unwrap();

        assert_eq!(record.policy_version.as_deref(), Some("P3"));
        assert_eq!(record.mode, Some(PolicyMode::Experiment));
        assert_eq!(record.control_rate, Some(0.05));
        assert_eq!(record.segments.len(), 1);
        assert_eq!(record.segment("region"), Some("north"));
    }

    #[test]
    fn test_malformed_rows() {
        let base = |patch: &str| {
            format!(
                r#"{{"claim_id":"C1","claim_date":"2024-03-01","exp_group":"CONTROL",{}}}"#,
                patch
            )
        };

        assert_eq!(
            parse_line(&base(r#""paid_amount":"n/a""#)),
            Err(MalformedRecord::InvalidPaidAmount)
        );
        assert_eq!(
            parse_line(&base(r#""paid_amount":-5"#)),
            Err(MalformedRecord::InvalidPaidAmount)
        );
        assert_eq!(
            parse_line(r#"{"claim_id":"C1","claim_date":"yesterday","exp_group":"CONTROL","paid_amount":1}"#),
            Err(MalformedRecord::InvalidDate)
        );
        assert_eq!(
            parse_line(r#"{"claim_id":"C1","claim_date":"2024-03-01","exp_group":"HOLDOUT","paid_amount":1}"#),
            Err(MalformedRecord::UnknownArm("HOLDOUT".to_string()))
        );
        assert_eq!(parse_line("[1,2,3]"), Err(MalformedRecord::InvalidJson));
    }

    #[test]
    fn test_parse_ledger_skips_bad_rows() {
        let text = concat!(
            r#"{"claim_id":"C1","claim_date":"2024-03-01","exp_group":"CONTROL","paid_amount":10}"#,
            "\n\n",
            "not json\n",
            r#"{"claim_id":"C2","claim_date":"2024-03-01","exp_group":"TREATMENT","paid_amount":"abc"}"#,
            "\n",
            r#"{"claim_id":"C3","claim_date":"2024-03-02","exp_group":"TREATMENT","paid_amount":7}"#,
        );

        let load = parse_ledger(text);
        assert_eq!(load.records.len(), 2);
        assert_eq!(load.skipped, 2);
    }

    #[test]
    fn test_json_lines_round_trip_keeps_segments() {
        let record = ClaimRecord::new("C9", date(2024, 1, 31), Arm::Treatment, 500.0)
            .with_score(0.4)
            .with_segment("channel", "app");

        let text = to_json_lines(std::slice::from_ref(&record)).unwrap();
        assert!(text.contains("\"exp_group\":\"TREATMENT\""));

        let load = parse_ledger(&text);
        assert_eq!(load.records, vec![record]);
    }

    #[test]
    fn test_load_missing_ledger() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = load_ledger(dir.path().join("absent.jsonl")).unwrap_err();
        assert!(matches!(err, LedgerError::Missing(_)));
    }

    #[test]
    fn test_valid_paid_predicate() {
        let d = date(2024, 1, 1);
        assert_eq!(ClaimRecord::new("a", d, Arm::Control, 3.0).valid_paid(), Some(3.0));
        assert_eq!(ClaimRecord::new("b", d, Arm::Control, f64::NAN).valid_paid(), None);
        assert_eq!(ClaimRecord::new("c", d, Arm::Control, -1.0).valid_paid(), None);
    }
}
