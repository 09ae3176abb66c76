//! Compliance engine: Terraform code checked against a named standard.
//!
//! The code is parsed with [`crate::hcl`]; every rule the standard enforces
//! is evaluated against every resource it applies to. Findings come out in
//! rule registration order, then resource order in the file, so identical
//! input always yields an identical report.

pub mod rules;
pub mod standards;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::error::ComplianceError;
use crate::hcl::{self, Body};

use rules::{Category, Context};
pub use standards::{STANDARDS, Standard, StandardSummary};

/// Outcome of one rule against one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Pass,
    Warning,
    Fail,
}

/// One line of a compliance report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub rule_id: &'static str,
    pub severity: Severity,
    pub message: String,
    /// `type.name` of the resource.
    pub resource: Option<String>,
    pub line: usize,
    pub category: Category,
}

/// Score for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryScore {
    pub category: Category,
    pub score: u8,
    pub passed: usize,
    pub total: usize,
}

/// The artifact a compliance job produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComplianceReport {
    pub standard: &'static str,
    pub score: u8,
    pub passed: usize,
    pub warnings: usize,
    pub failed: usize,
    pub resources_scanned: usize,
    pub findings: Vec<Finding>,
    pub categories: Vec<CategoryScore>,
    pub recommendations: Vec<String>,
}

/// Percentage rounded half-up. `total` must be non-zero.
fn percent(passed: usize, total: usize) -> u8 {
    u8::try_from((200 * passed + total) / (2 * total)).unwrap_or(100)
}

/// Parse `code` and check it against the standard called `standard`.
///
/// # Errors
///
/// - [`ComplianceError::UnknownStandard`] for an unrecognized name.
/// - [`ComplianceError::Parse`] if the code is not valid Terraform syntax.
/// - [`ComplianceError::NoApplicableRules`] if nothing could be checked.
pub fn check(code: &str, standard: &str) -> Result<ComplianceReport, ComplianceError> {
    let standard = resolve(standard)?;
    let doc = hcl::parse(code)?;
    check_document(&doc, standard)
}

/// Look up a standard by name.
///
/// # Errors
///
/// Returns [`ComplianceError::UnknownStandard`] if no standard matches.
pub fn resolve(name: &str) -> Result<&'static Standard, ComplianceError> {
    standards::find(name).ok_or_else(|| ComplianceError::UnknownStandard {
        name: name.to_owned(),
    })
}

/// Check an already parsed document.
///
/// # Errors
///
/// Returns [`ComplianceError::NoApplicableRules`] if no rule of the
/// standard produced a finding.
pub fn check_document(
    doc: &Body,
    standard: &'static Standard,
) -> Result<ComplianceReport, ComplianceError> {
    let ctx = Context::new(doc);
    let mut findings = Vec::new();
    let mut recommendations: Vec<String> = Vec::new();

    for rule in standard.rules() {
        for resource in ctx.resources().iter().filter(|r| rule.applies(r.resource_type)) {
            let Some(outcome) = rule.evaluate(&ctx, resource) else {
                continue;
            };
            if outcome.severity != Severity::Pass
                && !recommendations.iter().any(|r| r == rule.recommendation)
            {
                recommendations.push(rule.recommendation.to_owned());
            }
            findings.push(Finding {
                rule_id: rule.id,
                severity: outcome.severity,
                message: outcome.message,
                resource: Some(resource.address()),
                line: resource.line,
                category: rule.category,
            });
        }
    }

    if findings.is_empty() {
        return Err(ComplianceError::NoApplicableRules {
            standard: standard.name.to_owned(),
        });
    }

    let count = |s: Severity| findings.iter().filter(|f| f.severity == s).count();
    let (passed, warnings, failed) = (
        count(Severity::Pass),
        count(Severity::Warning),
        count(Severity::Fail),
    );

    let mut by_category: BTreeMap<Category, (usize, usize)> = BTreeMap::new();
    for f in &findings {
        let entry = by_category.entry(f.category).or_default();
        entry.1 += 1;
        if f.severity == Severity::Pass {
            entry.0 += 1;
        }
    }
    let categories = by_category
        .into_iter()
        .map(|(category, (passed, total))| CategoryScore {
            category,
            score: percent(passed, total),
            passed,
            total,
        })
        .collect();

    let report = ComplianceReport {
        standard: standard.name,
        score: percent(passed, findings.len()),
        passed,
        warnings,
        failed,
        resources_scanned: ctx.resources().len(),
        findings,
        categories,
        recommendations,
    };
    debug!(
        standard = report.standard,
        score = report.score,
        failed = report.failed,
        "compliance check complete"
    );
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const UNENCRYPTED_VOLUME: &str = r#"
resource "aws_ebs_volume" "data" {
  availability_zone = "us-east-1a"
  size              = 20
}
"#;

    #[test]
    fn missing_encryption_fails_cis_once() {
        let report = check(UNENCRYPTED_VOLUME, "CIS Benchmark").unwrap();
        let fails: Vec<_> = report
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Fail)
            .collect();
        assert_eq!(fails.len(), 1);
        assert_eq!(fails[0].rule_id, "ENC-001");
        assert_eq!(fails[0].resource.as_deref(), Some("aws_ebs_volume.data"));
        assert_eq!(fails[0].line, 2);
        assert!(report.score < 100);
        assert_eq!(report.recommendations.len(), 2);
    }

    #[test]
    fn check_is_deterministic() {
        let code = crate::generate::Generator::default()
            .generate(
                "a vpc with 2 t3.small servers behind a load balancer and a postgres database",
                crate::job::Target::Hcl,
            )
            .unwrap()
            .text;
        let a = check(&code, "nist").unwrap();
        let b = check(&code, "NIST").unwrap();
        assert_eq!(a, b);
        assert!(a.findings.len() > 10);
    }

    #[test]
    fn findings_follow_rule_then_resource_order() {
        let code = r#"
resource "aws_ebs_volume" "b" {
  encrypted = true
}
resource "aws_ebs_volume" "a" {}
"#;
        let report = check(code, "hipaa").unwrap();
        let order: Vec<_> = report
            .findings
            .iter()
            .map(|f| (f.rule_id, f.resource.clone().unwrap()))
            .collect();
        assert_eq!(
            order,
            [
                ("ENC-001", "aws_ebs_volume.b".to_owned()),
                ("ENC-001", "aws_ebs_volume.a".to_owned()),
            ]
        );
        assert_eq!(report.score, 50);
    }

    #[test]
    fn scores_round_half_up() {
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(1, 8), 13);
        assert_eq!(percent(0, 5), 0);
        assert_eq!(percent(5, 5), 100);
    }

    #[test]
    fn nothing_applicable_is_an_error() {
        let code = "variable \"region\" {\n  default = \"us-east-1\"\n}\n";
        assert!(matches!(
            check(code, "CIS"),
            Err(ComplianceError::NoApplicableRules { .. })
        ));
        assert!(matches!(
            check("resource \"aws_sqs_queue\" \"q\" {}", "pci"),
            Err(ComplianceError::NoApplicableRules { .. })
        ));
    }

    #[test]
    fn bad_input_errors() {
        assert!(matches!(
            check(UNENCRYPTED_VOLUME, "SOX"),
            Err(ComplianceError::UnknownStandard { .. })
        ));
        assert!(matches!(
            check("resource \"x\" {", "CIS"),
            Err(ComplianceError::Parse(_))
        ));
    }

    #[test]
    fn category_scores_cover_findings() {
        let report = check(UNENCRYPTED_VOLUME, "cis").unwrap();
        let names: Vec<_> = report.categories.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(names, ["Encryption", "Resource Tagging"]);
        let total: usize = report.categories.iter().map(|c| c.total).sum();
        assert_eq!(total, report.findings.len());
    }
}
