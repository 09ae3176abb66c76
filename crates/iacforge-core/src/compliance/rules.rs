//! Rule registry.
//!
//! Each rule is a pure predicate over one parsed resource plus read-only
//! access to the whole document. A check returns `None` when the resource
//! cannot be judged (values computed at apply time); such resources produce
//! no finding.

use serde::Serialize;
use serde_json::Value;

use crate::hcl::{Block, Body, Expr, Resource};

use super::Severity;

/// Report grouping for findings and per-category scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Category {
    #[serde(rename = "Security Groups")]
    SecurityGroups,
    #[serde(rename = "Network Security")]
    NetworkSecurity,
    #[serde(rename = "Encryption")]
    Encryption,
    #[serde(rename = "IAM Policies")]
    IamPolicies,
    #[serde(rename = "Resource Tagging")]
    ResourceTagging,
    #[serde(rename = "Instance Types")]
    InstanceTypes,
    #[serde(rename = "Logging")]
    Logging,
    #[serde(rename = "Reliability")]
    Reliability,
}

impl Category {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SecurityGroups => "Security Groups",
            Self::NetworkSecurity => "Network Security",
            Self::Encryption => "Encryption",
            Self::IamPolicies => "IAM Policies",
            Self::ResourceTagging => "Resource Tagging",
            Self::InstanceTypes => "Instance Types",
            Self::Logging => "Logging",
            Self::Reliability => "Reliability",
        }
    }
}

/// Result of one rule against one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub severity: Severity,
    pub message: String,
}

fn pass(message: impl Into<String>) -> Option<Outcome> {
    Some(Outcome {
        severity: Severity::Pass,
        message: message.into(),
    })
}

fn warn(message: impl Into<String>) -> Option<Outcome> {
    Some(Outcome {
        severity: Severity::Warning,
        message: message.into(),
    })
}

fn fail(message: impl Into<String>) -> Option<Outcome> {
    Some(Outcome {
        severity: Severity::Fail,
        message: message.into(),
    })
}

/// Read-only view of the whole document.
pub struct Context<'a> {
    resources: Vec<Resource<'a>>,
    default_tags: bool,
}

impl<'a> Context<'a> {
    #[must_use]
    pub fn new(doc: &'a Body) -> Self {
        let default_tags = doc.blocks("provider").any(|p| {
            p.body
                .blocks("default_tags")
                .any(|d| d.body.attr("tags").is_some_and(non_empty_object))
        });
        Self {
            resources: doc.resources().collect(),
            default_tags,
        }
    }

    /// Resources in source order.
    #[must_use]
    pub fn resources(&self) -> &[Resource<'a>] {
        &self.resources
    }

    /// Other resources of `resource_type` that reference `address`.
    fn referencing(&self, resource_type: &str, address: &str) -> impl Iterator<Item = &Resource<'a>> + '_ {
        let resource_type = resource_type.to_owned();
        let address = address.to_owned();
        self.resources
            .iter()
            .filter(move |r| r.resource_type == resource_type && r.body.mentions(&address))
    }
}

type Check = fn(&Context<'_>, &Resource<'_>) -> Option<Outcome>;

/// A registered rule.
pub struct Rule {
    pub id: &'static str,
    pub title: &'static str,
    pub category: Category,
    /// Resource types the rule inspects. Empty means every taggable type.
    pub applies_to: &'static [&'static str],
    pub recommendation: &'static str,
    check: Check,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

impl Rule {
    #[must_use]
    pub fn applies(&self, resource_type: &str) -> bool {
        let types = if self.applies_to.is_empty() {
            TAGGABLE
        } else {
            self.applies_to
        };
        types.contains(&resource_type)
    }

    /// Evaluate against one resource.
    #[must_use]
    pub fn evaluate(&self, ctx: &Context<'_>, resource: &Resource<'_>) -> Option<Outcome> {
        (self.check)(ctx, resource)
    }
}

const TAGGABLE: &[&str] = &[
    "aws_vpc",
    "aws_subnet",
    "aws_internet_gateway",
    "aws_nat_gateway",
    "aws_route_table",
    "aws_security_group",
    "aws_instance",
    "aws_launch_template",
    "aws_ebs_volume",
    "aws_s3_bucket",
    "aws_db_instance",
    "aws_rds_cluster",
    "aws_lb",
    "aws_alb",
    "aws_lambda_function",
    "aws_iam_role",
    "aws_eip",
];

/// All rules, in registration order.
pub static RULES: &[Rule] = &[
    Rule {
        id: "ENC-001",
        title: "EBS volumes are encrypted",
        category: Category::Encryption,
        applies_to: &["aws_ebs_volume"],
        recommendation: "Set encrypted = true on EBS volumes (optionally with a customer-managed kms_key_id).",
        check: ebs_encrypted,
    },
    Rule {
        id: "ENC-002",
        title: "S3 buckets use server-side encryption",
        category: Category::Encryption,
        applies_to: &["aws_s3_bucket"],
        recommendation: "Add an aws_s3_bucket_server_side_encryption_configuration using aws:kms.",
        check: s3_encrypted,
    },
    Rule {
        id: "ENC-003",
        title: "RDS storage is encrypted",
        category: Category::Encryption,
        applies_to: &["aws_db_instance", "aws_rds_cluster"],
        recommendation: "Set storage_encrypted = true on RDS instances and clusters.",
        check: rds_encrypted,
    },
    Rule {
        id: "ENC-004",
        title: "Instance root volumes are encrypted",
        category: Category::Encryption,
        applies_to: &["aws_instance"],
        recommendation: "Add root_block_device { encrypted = true } to EC2 instances.",
        check: root_volume_encrypted,
    },
    Rule {
        id: "ENC-005",
        title: "Load balancer listeners use TLS",
        category: Category::Encryption,
        applies_to: &["aws_lb_listener", "aws_alb_listener"],
        recommendation: "Serve HTTPS listeners and redirect plain HTTP to HTTPS.",
        check: listener_tls,
    },
    Rule {
        id: "NET-001",
        title: "No administrative ports open to the internet",
        category: Category::SecurityGroups,
        applies_to: &[
            "aws_security_group",
            "aws_security_group_rule",
            "aws_vpc_security_group_ingress_rule",
        ],
        recommendation: "Restrict SSH/RDP ingress to known CIDR ranges or use SSM Session Manager.",
        check: open_ingress,
    },
    Rule {
        id: "NET-002",
        title: "Egress is restricted",
        category: Category::SecurityGroups,
        applies_to: &["aws_security_group"],
        recommendation: "Limit security group egress to the destinations and ports the workload needs.",
        check: open_egress,
    },
    Rule {
        id: "NET-003",
        title: "No automatic public IP addresses",
        category: Category::NetworkSecurity,
        applies_to: &["aws_subnet", "aws_instance"],
        recommendation: "Avoid public IPs on launch; place workloads behind a load balancer or NAT.",
        check: public_ip,
    },
    Rule {
        id: "NET-004",
        title: "VPC flow logs are enabled",
        category: Category::NetworkSecurity,
        applies_to: &["aws_vpc"],
        recommendation: "Add an aws_flow_log for every VPC.",
        check: flow_logs,
    },
    Rule {
        id: "NET-005",
        title: "Databases are not publicly accessible",
        category: Category::NetworkSecurity,
        applies_to: &["aws_db_instance"],
        recommendation: "Set publicly_accessible = false and reach databases through private subnets.",
        check: rds_private,
    },
    Rule {
        id: "TAG-001",
        title: "Resources are tagged",
        category: Category::ResourceTagging,
        applies_to: &[],
        recommendation: "Tag resources (or set provider default_tags) with at least Name, owner and environment.",
        check: tagged,
    },
    Rule {
        id: "IAM-001",
        title: "IAM policies avoid wildcard permissions",
        category: Category::IamPolicies,
        applies_to: &[
            "aws_iam_policy",
            "aws_iam_role_policy",
            "aws_iam_user_policy",
            "aws_iam_group_policy",
        ],
        recommendation: "Grant specific actions on specific resources instead of \"*\".",
        check: iam_wildcards,
    },
    Rule {
        id: "INS-001",
        title: "Current-generation instance types",
        category: Category::InstanceTypes,
        applies_to: &["aws_instance", "aws_launch_template"],
        recommendation: "Move previous-generation instance families (t2, m4, c4, r4, ...) to current ones.",
        check: current_generation,
    },
    Rule {
        id: "INS-002",
        title: "Instance metadata requires IMDSv2",
        category: Category::InstanceTypes,
        applies_to: &["aws_instance", "aws_launch_template"],
        recommendation: "Set metadata_options { http_tokens = \"required\" }.",
        check: imdsv2,
    },
    Rule {
        id: "S3-001",
        title: "S3 buckets are not public",
        category: Category::NetworkSecurity,
        applies_to: &["aws_s3_bucket", "aws_s3_bucket_acl"],
        recommendation: "Remove public canned ACLs and add an aws_s3_bucket_public_access_block.",
        check: s3_private,
    },
    Rule {
        id: "LOG-001",
        title: "S3 access logging is enabled",
        category: Category::Logging,
        applies_to: &["aws_s3_bucket"],
        recommendation: "Add an aws_s3_bucket_logging pointing at a dedicated log bucket.",
        check: s3_logging,
    },
    Rule {
        id: "LOG-002",
        title: "Load balancer access logs are enabled",
        category: Category::Logging,
        applies_to: &["aws_lb", "aws_alb"],
        recommendation: "Enable access_logs on load balancers.",
        check: lb_logging,
    },
    Rule {
        id: "BAK-001",
        title: "Database backups are retained for at least 7 days",
        category: Category::Reliability,
        applies_to: &["aws_db_instance", "aws_rds_cluster"],
        recommendation: "Set backup_retention_period to 7 days or more.",
        check: backups,
    },
    Rule {
        id: "REL-001",
        title: "Databases are deployed Multi-AZ",
        category: Category::Reliability,
        applies_to: &["aws_db_instance"],
        recommendation: "Set multi_az = true for production databases.",
        check: multi_az,
    },
    Rule {
        id: "REL-002",
        title: "S3 versioning is enabled",
        category: Category::Reliability,
        applies_to: &["aws_s3_bucket"],
        recommendation: "Add an aws_s3_bucket_versioning with status = \"Enabled\".",
        check: s3_versioning,
    },
];

/// Look up a rule by id.
#[must_use]
pub fn rule(id: &str) -> Option<&'static Rule> {
    RULES.iter().find(|r| r.id == id)
}

// ── Helpers ──────────────────────────────────────────────────────────

fn flag(body: &Body, key: &str) -> Option<bool> {
    body.attr(key).and_then(Expr::as_bool)
}

fn non_empty_object(expr: &Expr) -> bool {
    match expr {
        Expr::Object(entries) => !entries.is_empty(),
        Expr::Traversal { .. } | Expr::Call { .. } => true,
        _ => false,
    }
}

fn first_block<'b>(body: &'b Body, kind: &'b str) -> Option<&'b Block> {
    body.blocks(kind).next()
}

fn strings(expr: &Expr) -> Vec<&str> {
    match expr {
        Expr::Tuple(items) => items.iter().filter_map(Expr::as_str).collect(),
        other => other.as_str().into_iter().collect(),
    }
}

fn is_world(cidr: &str) -> bool {
    cidr == "0.0.0.0/0" || cidr == "::/0"
}

/// An ingress permission reduced to what the rules need.
struct Ingress {
    from: u32,
    to: u32,
    world: bool,
}

impl Ingress {
    fn covers(&self, port: u32) -> bool {
        self.from <= port && port <= self.to
    }

    fn web_only(&self) -> bool {
        (self.from == 80 && self.to == 80) || (self.from == 443 && self.to == 443)
    }
}

fn port(body: &Body, key: &str) -> Option<u32> {
    body.attr(key)
        .and_then(Expr::as_f64)
        .filter(|p| (0.0..=65535.0).contains(p))
        .map(|p| p as u32)
}

fn ingress_from(body: &Body, cidr_keys: &[&str], protocol_key: &str) -> Option<Ingress> {
    let world = cidr_keys
        .iter()
        .filter_map(|k| body.attr(k))
        .any(|e| strings(e).into_iter().any(is_world));
    let all = body
        .attr(protocol_key)
        .and_then(Expr::as_str)
        .is_some_and(|p| p == "-1" || p.eq_ignore_ascii_case("all"));
    if all {
        return Some(Ingress {
            from: 0,
            to: 65535,
            world,
        });
    }
    let from = port(body, "from_port")?;
    let to = port(body, "to_port").unwrap_or(from);
    Some(Ingress { from, to, world })
}

fn ingress_rules(resource: &Resource<'_>) -> Vec<Ingress> {
    let body = resource.body;
    match resource.resource_type {
        "aws_security_group" => body
            .blocks("ingress")
            .filter_map(|b| ingress_from(&b.body, &["cidr_blocks", "ipv6_cidr_blocks"], "protocol"))
            .collect(),
        "aws_security_group_rule" => {
            if body.attr("type").and_then(Expr::as_str) == Some("ingress") {
                ingress_from(body, &["cidr_blocks", "ipv6_cidr_blocks"], "protocol")
                    .into_iter()
                    .collect()
            } else {
                Vec::new()
            }
        }
        _ => ingress_from(body, &["cidr_ipv4", "cidr_ipv6"], "ip_protocol")
            .into_iter()
            .collect(),
    }
}

/// Literal value of an expression as JSON; `None` if it depends on references.
fn literal_json(expr: &Expr) -> Option<Value> {
    Some(match expr {
        Expr::Null => Value::Null,
        Expr::Bool(b) => Value::Bool(*b),
        Expr::Number(n) => n.parse::<f64>().ok().map(Value::from)?,
        Expr::String(s) => Value::String(s.clone()),
        Expr::Tuple(items) => Value::Array(items.iter().map(literal_json).collect::<Option<_>>()?),
        Expr::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| literal_json(v).map(|v| (k.clone(), v)))
                .collect::<Option<_>>()?,
        ),
        _ => return None,
    })
}

fn policy_document(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Call { name, args } if name == "jsonencode" => args.first().and_then(literal_json),
        Expr::String(text) => serde_json::from_str(text).ok(),
        _ => None,
    }
}

fn value_strings(v: Option<&Value>) -> Vec<&str> {
    match v {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

// ── Checks ───────────────────────────────────────────────────────────

fn ebs_encrypted(ctx: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    if flag(r.body, "encrypted") == Some(true) {
        return pass("EBS volume is encrypted");
    }
    let by_default = ctx.resources().iter().any(|o| {
        o.resource_type == "aws_ebs_encryption_by_default" && flag(o.body, "enabled") != Some(false)
    });
    if by_default && flag(r.body, "encrypted").is_none() {
        return pass("EBS volume is encrypted by the account default");
    }
    fail("EBS volume is not encrypted")
}

fn s3_encrypted(ctx: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    if r.body.has_block("server_side_encryption_configuration")
        || ctx
            .referencing("aws_s3_bucket_server_side_encryption_configuration", &r.address())
            .next()
            .is_some()
    {
        return pass("bucket has a server-side encryption configuration");
    }
    fail("bucket has no server-side encryption configuration")
}

fn rds_encrypted(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    match flag(r.body, "storage_encrypted") {
        Some(true) => pass("database storage is encrypted"),
        Some(false) => fail("database storage encryption is disabled"),
        None => fail("storage_encrypted is not set; database storage is unencrypted"),
    }
}

fn root_volume_encrypted(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    let encrypted = first_block(r.body, "root_block_device").and_then(|b| flag(&b.body, "encrypted"));
    if encrypted == Some(true) {
        pass("root volume is encrypted")
    } else {
        warn("root volume is not explicitly encrypted")
    }
}

fn listener_tls(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    let protocol = r.body.attr("protocol").and_then(Expr::as_str).unwrap_or("HTTP");
    if matches!(protocol.to_ascii_uppercase().as_str(), "HTTPS" | "TLS") {
        return pass(format!("listener uses {protocol}"));
    }
    let redirects = r.body.blocks("default_action").any(|a| {
        a.body.attr("type").and_then(Expr::as_str) == Some("redirect")
            && first_block(&a.body, "redirect")
                .and_then(|b| b.body.attr("protocol"))
                .and_then(Expr::as_str)
                .is_some_and(|p| p.eq_ignore_ascii_case("HTTPS"))
    });
    if redirects {
        pass("plain listener redirects to HTTPS")
    } else {
        warn(format!("listener serves unencrypted {protocol}"))
    }
}

fn open_ingress(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    let rules = ingress_rules(r);
    if rules.is_empty() {
        return if r.resource_type == "aws_security_group" {
            pass("no inline ingress rules")
        } else {
            None
        };
    }
    for (port, name) in [(22, "SSH"), (3389, "RDP")] {
        if rules.iter().any(|i| i.world && i.covers(port)) {
            return fail(format!("{name} (port {port}) is open to the internet"));
        }
    }
    if let Some(open) = rules.iter().find(|i| i.world && !i.web_only()) {
        let range = if open.from == open.to {
            format!("port {}", open.from)
        } else {
            format!("ports {}-{}", open.from, open.to)
        };
        return warn(format!("{range} open to the internet"));
    }
    pass("ingress limited to web ports or private ranges")
}

fn open_egress(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    let unrestricted = r.body.blocks("egress").any(|b| {
        let all = b
            .body
            .attr("protocol")
            .and_then(Expr::as_str)
            .is_some_and(|p| p == "-1" || p.eq_ignore_ascii_case("all"));
        let world = b
            .body
            .attr("cidr_blocks")
            .is_some_and(|e| strings(e).into_iter().any(is_world));
        all && world
    });
    if unrestricted {
        warn("all outbound traffic is allowed to 0.0.0.0/0")
    } else {
        pass("egress is restricted")
    }
}

fn public_ip(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    let key = if r.resource_type == "aws_subnet" {
        "map_public_ip_on_launch"
    } else {
        "associate_public_ip_address"
    };
    if flag(r.body, key) == Some(true) {
        warn(format!("{key} is enabled"))
    } else {
        pass("no public IP assigned on launch")
    }
}

fn flow_logs(ctx: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    if ctx.referencing("aws_flow_log", &r.address()).next().is_some() {
        pass("VPC flow logs are enabled")
    } else {
        warn("VPC has no flow log")
    }
}

fn rds_private(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    if flag(r.body, "publicly_accessible") == Some(true) {
        fail("database is publicly accessible")
    } else {
        pass("database is not publicly accessible")
    }
}

fn tagged(ctx: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    if r.body.attr("tags").is_some_and(non_empty_object) {
        pass("resource is tagged")
    } else if ctx.default_tags {
        pass("resource is tagged through provider default_tags")
    } else {
        warn("resource has no tags")
    }
}

fn iam_wildcards(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    let doc = r.body.attr("policy").and_then(policy_document)?;
    let statements = match doc.get("Statement")? {
        Value::Array(items) => items.clone(),
        single @ Value::Object(_) => vec![single.clone()],
        _ => return None,
    };
    let mut broad = false;
    for st in statements.iter().filter(|s| s.get("Effect").and_then(Value::as_str) == Some("Allow")) {
        let actions = value_strings(st.get("Action"));
        let resources = value_strings(st.get("Resource"));
        if actions.contains(&"*") {
            return fail("policy allows every action (\"Action\": \"*\")");
        }
        if resources.contains(&"*") && actions.iter().any(|a| a.ends_with(":*")) {
            broad = true;
        }
    }
    if broad {
        warn("policy allows service-wide actions on every resource")
    } else {
        pass("policy grants scoped permissions")
    }
}

const PREVIOUS_GENERATION: &[&str] = &[
    "t1", "t2", "m1", "m2", "m3", "m4", "c1", "c3", "c4", "r3", "r4", "i2", "d2", "g2", "p2", "x1",
];

fn current_generation(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    let instance_type = r.body.attr("instance_type").and_then(Expr::as_str)?;
    let family = instance_type.split('.').next().unwrap_or_default();
    if PREVIOUS_GENERATION.contains(&family) {
        warn(format!("{instance_type} is a previous-generation instance type"))
    } else {
        pass(format!("{instance_type} is a current-generation instance type"))
    }
}

fn imdsv2(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    let tokens = first_block(r.body, "metadata_options")
        .and_then(|b| b.body.attr("http_tokens"))
        .and_then(Expr::as_str);
    if tokens == Some("required") {
        pass("IMDSv2 is required")
    } else {
        warn("instance metadata service allows IMDSv1")
    }
}

fn s3_private(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    match r.body.attr("acl").and_then(Expr::as_str) {
        Some(acl @ ("public-read" | "public-read-write" | "authenticated-read")) => {
            fail(format!("bucket ACL '{acl}' grants public access"))
        }
        Some(_) => pass("bucket ACL is private"),
        None if r.resource_type == "aws_s3_bucket_acl" => None,
        None => pass("bucket has no public ACL"),
    }
}

fn s3_logging(ctx: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    if r.body.has_block("logging")
        || ctx.referencing("aws_s3_bucket_logging", &r.address()).next().is_some()
    {
        pass("access logging is enabled")
    } else {
        warn("bucket has no access logging")
    }
}

fn lb_logging(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    let enabled = first_block(r.body, "access_logs")
        .is_some_and(|b| flag(&b.body, "enabled") != Some(false));
    if enabled {
        pass("access logs are enabled")
    } else {
        warn("load balancer access logs are disabled")
    }
}

fn backups(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    match r.body.attr("backup_retention_period").and_then(Expr::as_f64) {
        Some(days) if days >= 7.0 => pass(format!("backups retained for {days} days")),
        Some(days) => warn(format!("backups retained for only {days} days")),
        None => warn("backup_retention_period is not set"),
    }
}

fn multi_az(_: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    if flag(r.body, "multi_az") == Some(true) {
        pass("database is Multi-AZ")
    } else {
        warn("database runs in a single availability zone")
    }
}

fn s3_versioning(ctx: &Context<'_>, r: &Resource<'_>) -> Option<Outcome> {
    let inline = first_block(r.body, "versioning").is_some_and(|b| flag(&b.body, "enabled") == Some(true));
    let separate = ctx
        .referencing("aws_s3_bucket_versioning", &r.address())
        .any(|v| {
            first_block(v.body, "versioning_configuration")
                .and_then(|b| b.body.attr("status"))
                .and_then(Expr::as_str)
                == Some("Enabled")
        });
    if inline || separate {
        pass("versioning is enabled")
    } else {
        warn("bucket versioning is not enabled")
    }
}
