//! JSON and plain-text batch report output.

use crate::anomaly::{Classification, Severity};
use crate::engine::{BatchReport, MetricOutcome, OutcomeStatus};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

pub fn write_json_report(report: &BatchReport, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let json = serde_json::to_string_pretty(report).map_err(|e| e.to_string())?;
    fs::write(path, json).map_err(|e| e.to_string())?;
    Ok(())
}

fn severity_label(s: Option<Severity>) -> &'static str {
    match s {
        Some(Severity::High) => "high",
        Some(Severity::Medium) => "medium",
        Some(Severity::Sensitive) => "sensitive",
        None => "-",
    }
}

fn render_outcome(out: &mut String, metric: &str, o: &MetricOutcome) {
    let Some(a) = &o.anomaly else {
        return;
    };
    let kind = match a.classification {
        Classification::Serious => "serious",
        Classification::Sensitive => "sensitive",
        Classification::None => "none",
    };
    let _ = write!(
        out,
        "\n[{}] {} {} ({}): {:.4}, median {:.4}, bounds [{:.4}, {:.4}]",
        severity_label(a.severity),
        metric,
        a.direction.as_str(),
        kind,
        a.current_value,
        a.median,
        a.lower_bound,
        a.upper_bound
    );
    if let Some(d) = o.evaluated_date {
        let _ = write!(out, " on {}", d);
    }
    out.push('\n');
    for r in &a.reasons {
        let _ = writeln!(out, "    - {}", r);
    }
    if let Some(rc) = &o.root_cause {
        let _ = writeln!(out, "  {}", rc.summary);
        for (i, c) in rc.contributions.iter().enumerate() {
            let _ = writeln!(
                out,
                "    {}. {}  {:.4} -> {:.4}  weight {:.1}%  contribution {:+.1}%  score {:.3}",
                i + 1,
                c.channel,
                c.previous,
                c.current,
                c.weight * 100.0,
                c.contribution_pct,
                c.severity_score
            );
            for r in &c.reasons {
                let _ = writeln!(out, "       {}", r);
            }
        }
        for f in rc.findings.iter().skip(1) {
            let _ = writeln!(out, "  also: {}", f.description);
        }
    }
    if let Some(note) = &o.note {
        let _ = writeln!(out, "  note: {}", note);
    }
}

/// Human-readable digest: anomalies first, then the quiet and skipped metrics.
pub fn render_text(report: &BatchReport) -> String {
    let mut out = String::new();
    let anomalous: Vec<_> = report.anomalies().collect();
    let _ = writeln!(
        out,
        "KPI report for {}: {} metric(s) evaluated, {} anomalous",
        report.date,
        report.outcomes.len(),
        anomalous.len()
    );
    for (metric, o) in &anomalous {
        render_outcome(&mut out, metric, o);
    }

    let normal: Vec<&str> = report
        .outcomes
        .iter()
        .filter(|(_, o)| o.status == OutcomeStatus::Normal)
        .map(|(m, _)| m.as_str())
        .collect();
    if !normal.is_empty() {
        let _ = writeln!(out, "\nnormal: {}", normal.join(", "));
    }
    for (metric, o) in &report.outcomes {
        if o.status == OutcomeStatus::InsufficientData {
            let _ = writeln!(
                out,
                "{}: {}",
                metric,
                o.note.as_deref().unwrap_or("no anomaly (insufficient data)")
            );
        }
    }
    if !report.not_evaluated.is_empty() {
        let _ = writeln!(out, "\nnot evaluated:");
        for n in &report.not_evaluated {
            let _ = writeln!(out, "  {}: {}", n.metric, n.reason);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::QuartileDetector;
    use crate::engine::NotEvaluated;
    use crate::registry::MetricDirection;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn sample_report() -> BatchReport {
        let record = QuartileDetector::default()
            .detect("arpu", MetricDirection::Positive, 3.0, &[10.0; 7])
            .unwrap();
        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            "arpu".to_string(),
            MetricOutcome {
                status: OutcomeStatus::Anomalous,
                evaluated_date: NaiveDate::from_ymd_opt(2024, 3, 8),
                anomaly: Some(record),
                root_cause: None,
                note: None,
            },
        );
        outcomes.insert(
            "cpa".to_string(),
            MetricOutcome {
                status: OutcomeStatus::InsufficientData,
                evaluated_date: None,
                anomaly: None,
                root_cause: None,
                note: None,
            },
        );
        BatchReport {
            date: NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
            outcomes,
            not_evaluated: vec![NotEvaluated {
                metric: "good_rate".to_string(),
                reason: "sqlite: disk I/O error".to_string(),
            }],
        }
    }

    #[test]
    fn text_digest_lists_every_metric() {
        let text = render_text(&sample_report());
        assert!(text.contains("1 anomalous"));
        assert!(text.contains("[high] arpu decrease (serious)"));
        assert!(text.contains("out of IQR range (below)"));
        assert!(text.contains("cpa: no anomaly (insufficient data)"));
        assert!(text.contains("not evaluated:"));
        assert!(text.contains("good_rate"));
    }

    #[test]
    fn json_report_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");
        write_json_report(&sample_report(), &path).unwrap();
        let s = std::fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&s).unwrap();
        assert_eq!(v["date"], "2024-03-08");
        assert_eq!(v["outcomes"]["arpu"]["status"], "anomalous");
        assert_eq!(v["outcomes"]["cpa"]["status"], "insufficient_data");
        assert_eq!(v["not_evaluated"][0]["metric"], "good_rate");
    }
}
