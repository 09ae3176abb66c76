//! Natural-language description to resource graph.
//!
//! Keyword driven: component words from the catalog, counts in front of
//! them ("3 instances", "two private subnets"), explicit instance types,
//! port names, a region, database engine, volume size and encryption intent.
//! Anything not stated gets a secure default. Descriptions that name no
//! known component or that ask for contradictory things are rejected.

use std::collections::BTreeMap;

use serde_json::json;

use crate::error::GenerateError;

use super::catalog::{self, NodeType, PHRASES};
use super::graph::{Edge, Node, ResourceGraph};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.micro";
pub const VPC_CIDR: &str = "10.0.0.0/16";

/// What the description asked for, before defaults.
#[derive(Debug, Default)]
struct Intent {
    counts: BTreeMap<NodeType, u64>,
    public_subnets: u64,
    private_subnets: u64,
    plain_subnets: u64,
    instance_types: Vec<String>,
    ports: Vec<u16>,
    region: Option<String>,
    engine: Option<&'static str>,
    volume_gb: Option<u64>,
    wants_encryption: bool,
    refuses_encryption: bool,
    multi_az: bool,
}

impl Intent {
    fn mentioned(&self, kind: NodeType) -> bool {
        self.counts.contains_key(&kind)
    }

    fn count(&self, kind: NodeType) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    fn note(&mut self, kind: NodeType, n: u64) {
        let slot = self.counts.entry(kind).or_insert(0);
        *slot = (*slot).max(n);
    }
}

/// Interpret a description.
///
/// # Errors
///
/// - [`GenerateError::EmptyDescription`] for blank input.
/// - [`GenerateError::NothingRecognized`] if no component is named.
/// - [`GenerateError::Contradiction`] for mutually exclusive requests.
pub fn interpret(description: &str) -> Result<ResourceGraph, GenerateError> {
    if description.trim().is_empty() {
        return Err(GenerateError::EmptyDescription);
    }

    let intent = scan(&tokens(description));

    if intent.counts.is_empty() {
        return Err(GenerateError::NothingRecognized {
            hint: "name components such as a vpc, subnets, ec2 instances, an s3 bucket, \
                   an rds database, a load balancer or a lambda function"
                .to_owned(),
        });
    }
    if intent.wants_encryption && intent.refuses_encryption {
        return Err(GenerateError::Contradiction {
            detail: "storage is requested both encrypted and unencrypted".to_owned(),
        });
    }
    let mut types = intent.instance_types.clone();
    types.dedup();
    if types.len() > 1 && intent.count(NodeType::Instance) == 1 {
        return Err(GenerateError::Contradiction {
            detail: format!(
                "a single instance cannot be both {} and {}",
                types[0], types[1]
            ),
        });
    }

    Ok(build(&intent))
}

fn tokens(description: &str) -> Vec<String> {
    let mut text = description.to_lowercase();
    for (phrase, token) in PHRASES {
        text = text.replace(phrase, token);
    }
    text.split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        .map(|t| t.trim_matches(|c| c == '.' || c == '-').to_owned())
        .filter(|t| !t.is_empty())
        .collect()
}

fn scan(tokens: &[String]) -> Intent {
    let mut intent = Intent::default();

    for (i, word) in tokens.iter().map(String::as_str).enumerate() {
        let prev = |back: usize| i.checked_sub(back).map(|j| tokens[j].as_str());

        if catalog::is_region(word) {
            intent.region = Some(word.to_owned());
            continue;
        }
        if catalog::is_instance_type(word) {
            intent.instance_types.push(word.to_owned());
            continue;
        }
        if let Some(port) = catalog::named_port(word) {
            if !intent.ports.contains(&port) {
                intent.ports.push(port);
            }
        }
        if word == "port" {
            if let Some(port) = tokens.get(i + 1).and_then(|n| n.parse::<u16>().ok()) {
                if !intent.ports.contains(&port) {
                    intent.ports.push(port);
                }
            }
        }
        if let Some(gb) = word.strip_suffix("gb").and_then(|n| n.parse::<u64>().ok()) {
            intent.volume_gb = Some(gb);
        } else if matches!(word, "gb" | "gib") {
            if let Some(gb) = prev(1).and_then(|n| n.parse::<u64>().ok()) {
                intent.volume_gb = Some(gb);
            }
        }

        match word {
            "unencrypted" | "plaintext" => intent.refuses_encryption = true,
            "encrypted" | "encryption" | "encrypt" | "kms" => {
                if matches!(prev(1), Some("no" | "without" | "disable" | "disabled" | "not")) {
                    intent.refuses_encryption = true;
                } else {
                    intent.wants_encryption = true;
                }
            }
            "multi_az" => intent.multi_az = true,
            "postgres" | "postgresql" => intent.engine = Some("postgres"),
            "mysql" => intent.engine = Some("mysql"),
            "mariadb" => intent.engine = Some("mariadb"),
            _ => {}
        }

        let Some(kind) = NodeType::parse(word) else {
            continue;
        };

        let count = count_before(tokens, i).unwrap_or(1);
        if kind == NodeType::Subnet {
            match qualifier_before(tokens, i) {
                Some("public") => intent.public_subnets = intent.public_subnets.max(count),
                Some("private") => intent.private_subnets = intent.private_subnets.max(count),
                _ => intent.plain_subnets = intent.plain_subnets.max(count),
            }
        }
        intent.note(kind, count);
    }
    intent
}

/// A count up to three words before the keyword, not crossing another component.
fn count_before(tokens: &[String], at: usize) -> Option<u64> {
    for back in 1..=3 {
        let j = at.checked_sub(back)?;
        let word = tokens[j].as_str();
        if NodeType::parse(word).is_some() {
            return None;
        }
        if let Some(n) = catalog::number_word(word) {
            return Some(n);
        }
    }
    None
}

fn qualifier_before(tokens: &[String], at: usize) -> Option<&str> {
    (1..=2)
        .filter_map(|back| at.checked_sub(back))
        .map(|j| tokens[j].as_str())
        .find(|w| matches!(*w, "public" | "private"))
}

fn build(intent: &Intent) -> ResourceGraph {
    let encrypted = !intent.refuses_encryption;
    let region = intent
        .region
        .clone()
        .unwrap_or_else(|| DEFAULT_REGION.to_owned());

    let wants_instances = intent.mentioned(NodeType::Instance);
    let wants_lb = intent.mentioned(NodeType::LoadBalancer);
    let wants_db = intent.mentioned(NodeType::Database);
    let needs_network = intent.counts.keys().any(|k| k.needs_network());

    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let mut link = |from: &str, to: &str, relation: &str| {
        edges.push(Edge {
            from: from.to_owned(),
            to: to.to_owned(),
            relation: Some(relation.to_owned()),
        });
    };

    let has_vpc = intent.mentioned(NodeType::Vpc) || needs_network;
    if has_vpc {
        nodes.push(Node::new("main", NodeType::Vpc.as_str()).with("cidr_block", VPC_CIDR));
    }

    // Subnets
    let (mut public, mut private) = (intent.public_subnets, intent.private_subnets);
    if public == 0 && private == 0 {
        public = intent.plain_subnets;
    } else {
        public = public.max(intent.plain_subnets.saturating_sub(private));
    }
    if (wants_instances || wants_lb) && public == 0 && private == 0 {
        public = 1;
    }
    if wants_lb {
        public = public.max(2);
    }
    if wants_db {
        private = private.max(2);
    }
    if intent.mentioned(NodeType::InternetGateway) && public == 0 {
        public = 1;
    }

    let mut third_octet = 0u64;
    let mut subnet = |visibility: &str, n: u64, nodes: &mut Vec<Node>| -> String {
        third_octet += 1;
        let id = format!("{visibility}_{n}");
        nodes.push(
            Node::new(&id, NodeType::Subnet.as_str())
                .with("cidr_block", format!("10.0.{third_octet}.0/24"))
                .with("public", visibility == "public")
                .with("az_index", n - 1),
        );
        id
    };
    let public_ids: Vec<String> = (1..=public).map(|n| subnet("public", n, &mut nodes)).collect();
    let private_ids: Vec<String> = (1..=private)
        .map(|n| subnet("private", n, &mut nodes))
        .collect();
    for id in public_ids.iter().chain(&private_ids) {
        link(id, "main", "in");
    }

    if has_vpc && !public_ids.is_empty() {
        nodes.push(Node::new("igw", NodeType::InternetGateway.as_str()));
        link("igw", "main", "attached");
        for id in &public_ids {
            link(id, "igw", "routes");
        }
    }

    // Security groups
    let needs_web_sg =
        wants_instances || wants_lb || intent.mentioned(NodeType::SecurityGroup);
    if needs_web_sg && has_vpc {
        let mut ports = intent.ports.clone();
        if ports.is_empty() {
            ports = if wants_lb { vec![80, 443] } else { vec![443] };
        }
        nodes.push(Node::new("web_sg", NodeType::SecurityGroup.as_str()).with("ports", json!(ports)));
        link("web_sg", "main", "in");
    }

    if wants_instances {
        let count = intent.count(NodeType::Instance).max(1);
        let instance_type = intent
            .instance_types
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_owned());
        nodes.push(
            Node::new("web", NodeType::Instance.as_str())
                .with("count", count)
                .with("instance_type", instance_type)
                .with("encrypted", encrypted),
        );
        if let Some(home) = public_ids.first().or(private_ids.first()) {
            link("web", home, "in");
        }
        if needs_web_sg && has_vpc {
            link("web", "web_sg", "protected_by");
        }
    }

    if wants_lb {
        nodes.push(Node::new("app", NodeType::LoadBalancer.as_str()));
        for id in &public_ids {
            link("app", id, "in");
        }
        link("app", "web_sg", "protected_by");
        if wants_instances {
            link("app", "web", "targets");
        }
    }

    if wants_db {
        let engine = intent.engine.unwrap_or("postgres");
        let port = if engine == "postgres" { 5432 } else { 3306 };
        nodes.push(
            Node::new("db_sg", NodeType::SecurityGroup.as_str())
                .with("ports", json!([port]))
                .with("internal", true),
        );
        link("db_sg", "main", "in");
        nodes.push(
            Node::new("db", NodeType::Database.as_str())
                .with("engine", engine)
                .with("multi_az", intent.multi_az)
                .with("encrypted", encrypted),
        );
        for id in &private_ids {
            link("db", id, "in");
        }
        link("db", "db_sg", "protected_by");
    }

    let buckets = intent.count(NodeType::Bucket);
    for n in 1..=buckets {
        let id = if buckets == 1 {
            "assets".to_owned()
        } else {
            format!("assets_{n}")
        };
        nodes.push(Node::new(id, NodeType::Bucket.as_str()).with("encrypted", encrypted));
    }

    for n in 1..=intent.count(NodeType::Function) {
        nodes.push(Node::new(
            if n == 1 { "handler".to_owned() } else { format!("handler_{n}") },
            NodeType::Function.as_str(),
        ));
    }

    for n in 1..=intent.count(NodeType::Volume) {
        let id = if n == 1 { "data".to_owned() } else { format!("data_{n}") };
        nodes.push(
            Node::new(&id, NodeType::Volume.as_str())
                .with("size", intent.volume_gb.unwrap_or(20))
                .with("encrypted", encrypted),
        );
        if wants_instances {
            link(&id, "web", "attached");
        }
    }

    ResourceGraph {
        region: Some(region),
        nodes,
        edges,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn count(g: &ResourceGraph, kind: NodeType) -> usize {
        g.of_kind(kind).count()
    }

    #[test]
    fn three_tier_description() {
        let g = interpret(
            "A VPC with 2 public subnets and two private subnets, 3 t3.small web servers \
             behind a load balancer allowing HTTPS, and a multi-AZ PostgreSQL database in eu-west-1",
        )
        .unwrap();
        g.validate().unwrap();

        assert_eq!(g.region.as_deref(), Some("eu-west-1"));
        assert_eq!(count(&g, NodeType::Vpc), 1);
        assert_eq!(count(&g, NodeType::Subnet), 4);
        assert_eq!(count(&g, NodeType::InternetGateway), 1);
        assert_eq!(count(&g, NodeType::LoadBalancer), 1);

        let web = g.node("web").unwrap();
        assert_eq!(web.u64_attr("count"), Some(3));
        assert_eq!(web.str_attr("instance_type"), Some("t3.small"));
        assert_eq!(g.node("web_sg").unwrap().ports_attr(), vec![443]);

        let db = g.node("db").unwrap();
        assert_eq!(db.bool_attr("multi_az"), Some(true));
        assert_eq!(db.str_attr("engine"), Some("postgres"));
    }

    #[test]
    fn bucket_only_needs_no_network() {
        let g = interpret("an encrypted s3 bucket for logs").unwrap();
        assert_eq!(count(&g, NodeType::Vpc), 0);
        assert_eq!(count(&g, NodeType::Bucket), 1);
        assert_eq!(g.region.as_deref(), Some(DEFAULT_REGION));
    }

    #[test]
    fn instance_implies_network_defaults() {
        let g = interpret("one ec2 instance with ssh").unwrap();
        assert_eq!(count(&g, NodeType::Vpc), 1);
        assert_eq!(count(&g, NodeType::Subnet), 1);
        assert_eq!(g.node("web_sg").unwrap().ports_attr(), vec![22]);
        assert_eq!(
            g.node("web").unwrap().str_attr("instance_type"),
            Some(DEFAULT_INSTANCE_TYPE)
        );
    }

    #[test]
    fn unencrypted_request_is_honoured() {
        let g = interpret("a 100 GB ebs volume without encryption").unwrap();
        let vol = g.node("data").unwrap();
        assert_eq!(vol.bool_attr("encrypted"), Some(false));
        assert_eq!(vol.u64_attr("size"), Some(100));
    }

    #[test]
    fn rejects_empty_and_unrecognized() {
        assert!(matches!(interpret("   "), Err(GenerateError::EmptyDescription)));
        assert!(matches!(
            interpret("make it fast and cheap please"),
            Err(GenerateError::NothingRecognized { .. })
        ));
    }

    #[test]
    fn rejects_contradictions() {
        assert!(matches!(
            interpret("an encrypted bucket that is unencrypted"),
            Err(GenerateError::Contradiction { .. })
        ));
        assert!(matches!(
            interpret("a single t3.micro instance running as m5.large"),
            Err(GenerateError::Contradiction { .. })
        ));
    }
}
