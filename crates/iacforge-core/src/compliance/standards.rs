//! Named compliance standards and the rules each one enforces.

use serde::Serialize;

use super::rules::{RULES, Rule};

/// Which registered rules a standard enforces.
#[derive(Debug, Clone, Copy)]
pub enum Coverage {
    All,
    Only(&'static [&'static str]),
}

/// A compliance standard.
#[derive(Debug, Clone, Copy)]
pub struct Standard {
    pub name: &'static str,
    pub description: &'static str,
    aliases: &'static [&'static str],
    coverage: Coverage,
}

impl Standard {
    /// The enforced rules, in registration order.
    pub fn rules(&self) -> impl Iterator<Item = &'static Rule> {
        let coverage = self.coverage;
        RULES.iter().filter(move |r| match coverage {
            Coverage::All => true,
            Coverage::Only(ids) => ids.contains(&r.id),
        })
    }

    /// Serializable summary for listings.
    #[must_use]
    pub fn summary(&self) -> StandardSummary {
        StandardSummary {
            name: self.name,
            description: self.description,
            rules: self.rules().map(|r| r.id).collect(),
        }
    }
}

/// What `GET /standards` returns per standard.
#[derive(Debug, Clone, Serialize)]
pub struct StandardSummary {
    pub name: &'static str,
    pub description: &'static str,
    pub rules: Vec<&'static str>,
}

pub static STANDARDS: &[Standard] = &[
    Standard {
        name: "CIS Benchmark",
        description: "CIS Amazon Web Services Foundations Benchmark controls expressible in Terraform",
        aliases: &["cis", "cisaws", "cisbenchmark", "cisawsfoundations"],
        coverage: Coverage::Only(&[
            "ENC-001", "ENC-002", "ENC-003", "ENC-004", "NET-001", "NET-002", "NET-003", "NET-004",
            "NET-005", "TAG-001", "IAM-001", "INS-002", "S3-001", "LOG-001",
        ]),
    },
    Standard {
        name: "PCI DSS",
        description: "Payment Card Industry Data Security Standard: encryption, segmentation, logging",
        aliases: &["pci", "pcidss", "pcidss4"],
        coverage: Coverage::Only(&[
            "ENC-001", "ENC-002", "ENC-003", "ENC-004", "ENC-005", "NET-001", "NET-002", "NET-005",
            "IAM-001", "S3-001", "LOG-001", "LOG-002", "BAK-001",
        ]),
    },
    Standard {
        name: "HIPAA",
        description: "HIPAA Security Rule safeguards for protected health information",
        aliases: &["hipaa"],
        coverage: Coverage::Only(&[
            "ENC-001", "ENC-002", "ENC-003", "ENC-004", "ENC-005", "NET-005", "S3-001", "LOG-001",
            "LOG-002", "BAK-001", "REL-001", "REL-002",
        ]),
    },
    Standard {
        name: "NIST",
        description: "NIST SP 800-53 technical controls",
        aliases: &["nist", "nist80053", "nistsp80053"],
        coverage: Coverage::All,
    },
    Standard {
        name: "AWS Well-Architected",
        description: "Security and reliability pillars of the AWS Well-Architected Framework",
        aliases: &["wellarchitected", "awswellarchitected", "waf"],
        coverage: Coverage::All,
    },
];

fn normalize(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Find a standard by name or alias, ignoring case, spaces and punctuation.
#[must_use]
pub fn find(name: &str) -> Option<&'static Standard> {
    let wanted = normalize(name);
    if wanted.is_empty() {
        return None;
    }
    STANDARDS
        .iter()
        .find(|s| normalize(s.name) == wanted || s.aliases.contains(&wanted.as_str()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::compliance::rules::rule;

    #[test]
    fn names_and_aliases_resolve() {
        assert_eq!(find("CIS Benchmark").unwrap().name, "CIS Benchmark");
        assert_eq!(find("cis").unwrap().name, "CIS Benchmark");
        assert_eq!(find("pci-dss").unwrap().name, "PCI DSS");
        assert_eq!(find("NIST-800-53").unwrap().name, "NIST");
        assert_eq!(find("well-architected").unwrap().name, "AWS Well-Architected");
        assert!(find("sox").is_none());
        assert!(find("  ").is_none());
    }

    #[test]
    fn every_listed_rule_exists() {
        for s in STANDARDS {
            if let Coverage::Only(ids) = s.coverage {
                for id in ids {
                    assert!(rule(id).is_some(), "{} lists unknown rule {id}", s.name);
                }
                assert_eq!(s.rules().count(), ids.len());
            }
        }
    }

    #[test]
    fn rules_keep_registration_order() {
        let ids: Vec<_> = find("hipaa").unwrap().rules().map(|r| r.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_by_key(|id| RULES.iter().position(|r| r.id == *id));
        assert_eq!(ids, sorted);
    }
}
