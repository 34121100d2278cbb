//! Verification report output, shared by `modelprov verify` and the
//! standalone `modelprov-verify` binary.

use modelprov_core::{Overall, VerificationReport};
use serde::Serialize;
use std::fmt::Write as _;
use std::process::ExitCode;

/// Exit status for a verified bundle: 0 when valid, 2 when not.
pub fn exit_code(report: &VerificationReport) -> ExitCode {
    match report.overall {
        Overall::Valid => ExitCode::SUCCESS,
        Overall::Invalid => ExitCode::from(2),
    }
}

pub fn to_json(report: &VerificationReport) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Plain-text summary followed by any mismatch details.
pub fn render(report: &VerificationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "DNA:      {}", status(&report.dna));
    let _ = writeln!(out, "Ledger:   {}", status(&report.ledger));
    let _ = writeln!(out, "Datasets: {}", status(&report.datasets));
    let _ = writeln!(out, "Overall:  {}", status(&report.overall));

    for line in report.details.dna.iter().chain(&report.details.ledger) {
        let _ = writeln!(out, "  - {line}");
    }
    for check in &report.details.datasets {
        let _ = writeln!(
            out,
            "  {} {}",
            status(&check.status),
            check.resolved.as_deref().unwrap_or(&check.path)
        );
    }
    out
}

/// The serialized name of a status enum (`SYNCED`, `MISSING`, ...).
fn status<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}
