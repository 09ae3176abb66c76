//! Resource graph to Terraform document.
//!
//! Nodes are emitted containers first; edges become references such as
//! `vpc_id = aws_vpc.main.id`. Storage is encrypted and instances require
//! IMDSv2 unless the graph says otherwise. Nodes whose type is not in the
//! catalog become `TODO` comment placeholders rather than being dropped.

use serde_json::{Map, Value};

use crate::hcl::{Block, Body, Expr, Item, Step};

use super::catalog::NodeType;
use super::description::{DEFAULT_INSTANCE_TYPE, DEFAULT_REGION, VPC_CIDR};
use super::graph::{Node, ResourceGraph};

const AWS_PROVIDER_VERSION: &str = "~> 5.0";
const AMI_DATA: &str = "data.aws_ami.amazon_linux.id";

/// Build the Terraform document for a graph.
#[must_use]
pub fn build(graph: &ResourceGraph) -> Body {
    let region = graph.region.as_deref().unwrap_or(DEFAULT_REGION);
    let mut doc = Body::default();

    doc.push_block(terraform_block());
    doc.push_block(provider_block(region));
    if graph.of_kind(NodeType::Instance).next().is_some() {
        doc.push_block(ami_data_block());
    }

    let mut ctx = Emitter {
        graph,
        region,
        doc,
    };
    for node in graph.ordered() {
        match node.kind() {
            Some(kind) => ctx.emit(kind, node),
            None => ctx.placeholder(node),
        }
    }
    ctx.doc
}

struct Emitter<'a> {
    graph: &'a ResourceGraph,
    region: &'a str,
    doc: Body,
}

fn resource(ty: &str, name: &str, body: Body) -> Block {
    Block::new("resource", &[ty, name], body)
}

fn block(kind: &str, body: Body) -> Block {
    Block::new(kind, &[], body)
}

fn tags(name: &str) -> Expr {
    Expr::Object(vec![("Name".to_owned(), Expr::str(name))])
}

fn id_ref(ty: &str, node: &Node) -> Expr {
    Expr::reference(&format!("{ty}.{}.id", node.resource_name()))
}

/// Reference to a possibly counted instance's id.
fn instance_id_ref(node: &Node) -> Expr {
    if node.u64_attr("count").unwrap_or(1) > 1 {
        Expr::Traversal {
            root: "aws_instance".to_owned(),
            steps: vec![
                Step::Attr(node.resource_name()),
                Step::Index(Box::new(Expr::reference("count.index"))),
                Step::Attr("id".to_owned()),
            ],
        }
    } else {
        id_ref("aws_instance", node)
    }
}

fn terraform_block() -> Block {
    let mut providers = Body::default();
    providers.push_attr(
        "aws",
        Expr::Object(vec![
            ("source".to_owned(), Expr::str("hashicorp/aws")),
            ("version".to_owned(), Expr::str(AWS_PROVIDER_VERSION)),
        ]),
    );
    let mut body = Body::default();
    body.push_attr("required_version", Expr::str(">= 1.5.0"));
    body.push_block(block("required_providers", providers));
    block("terraform", body)
}

fn provider_block(region: &str) -> Block {
    let mut default_tags = Body::default();
    default_tags.push_attr(
        "tags",
        Expr::Object(vec![("ManagedBy".to_owned(), Expr::str("iacforge"))]),
    );
    let mut body = Body::default();
    body.push_attr("region", Expr::str(region));
    body.push_block(block("default_tags", default_tags));
    Block::new("provider", &["aws"], body)
}

fn ami_data_block() -> Block {
    let mut filter = Body::default();
    filter.push_attr("name", Expr::str("name"));
    filter.push_attr("values", Expr::Tuple(vec![Expr::str("al2023-ami-*-x86_64")]));
    let mut body = Body::default();
    body.push_attr("most_recent", Expr::Bool(true));
    body.push_attr("owners", Expr::Tuple(vec![Expr::str("amazon")]));
    body.push_block(block("filter", filter));
    Block::new("data", &["aws_ami", "amazon_linux"], body)
}

impl Emitter<'_> {
    fn emit(&mut self, kind: NodeType, node: &Node) {
        match kind {
            NodeType::Vpc => self.vpc(node),
            NodeType::Subnet => self.subnet(node),
            NodeType::InternetGateway => self.internet_gateway(node),
            NodeType::SecurityGroup => self.security_group(node),
            NodeType::Instance => self.instance(node),
            NodeType::Database => self.database(node),
            NodeType::Bucket => self.bucket(node),
            NodeType::LoadBalancer => self.load_balancer(node),
            NodeType::Function => self.function(node),
            NodeType::Volume => self.volume(node),
        }
    }

    fn push(&mut self, block: Block) {
        self.doc.push_block(block);
    }

    fn first_neighbour<'g>(&'g self, node: &'g Node, kind: NodeType) -> Option<&'g Node> {
        self.graph.neighbours_of(&node.id, kind).next()
    }

    fn neighbour_ids(&self, node: &Node, kind: NodeType, ty: &str) -> Vec<Expr> {
        let mut seen = Vec::new();
        for n in self.graph.neighbours_of(&node.id, kind) {
            let r = id_ref(ty, n);
            if !seen.contains(&r) {
                seen.push(r);
            }
        }
        seen
    }

    fn vpc_of<'g>(&'g self, node: &'g Node) -> Option<&'g Node> {
        self.first_neighbour(node, NodeType::Vpc).or_else(|| {
            self.graph
                .neighbours(&node.id)
                .find_map(|n| self.first_neighbour(n, NodeType::Vpc))
        })
    }

    fn az(&self, index: u64) -> String {
        let letter = char::from(b'a' + u8::try_from(index % 3).unwrap_or(0));
        format!("{}{letter}", self.region)
    }

    fn display_name(node: &Node) -> String {
        node.label.clone().unwrap_or_else(|| node.id.clone())
    }

    fn vpc(&mut self, node: &Node) {
        let mut body = Body::default();
        body.push_attr(
            "cidr_block",
            Expr::str(node.str_attr("cidr_block").unwrap_or(VPC_CIDR)),
        );
        body.push_attr("enable_dns_support", Expr::Bool(true));
        body.push_attr("enable_dns_hostnames", Expr::Bool(true));
        body.push_attr("tags", tags(&Self::display_name(node)));
        self.push(resource("aws_vpc", &node.resource_name(), body));
    }

    fn subnet(&mut self, node: &Node) {
        let index = self
            .graph
            .of_kind(NodeType::Subnet)
            .position(|n| n.id == node.id)
            .and_then(|i| u64::try_from(i).ok())
            .unwrap_or(0);
        let public = node.bool_attr("public").unwrap_or(false);

        let mut body = Body::default();
        if let Some(vpc) = self.first_neighbour(node, NodeType::Vpc) {
            body.push_attr("vpc_id", id_ref("aws_vpc", vpc));
        }
        body.push_attr(
            "cidr_block",
            Expr::str(
                node.str_attr("cidr_block")
                    .map_or_else(|| format!("10.0.{}.0/24", index + 1), str::to_owned),
            ),
        );
        body.push_attr(
            "availability_zone",
            Expr::str(self.az(node.u64_attr("az_index").unwrap_or(index))),
        );
        if public {
            body.push_attr("map_public_ip_on_launch", Expr::Bool(true));
        }
        body.push_attr("tags", tags(&Self::display_name(node)));
        self.push(resource("aws_subnet", &node.resource_name(), body));
    }

    fn internet_gateway(&mut self, node: &Node) {
        let name = node.resource_name();
        let vpc = self.first_neighbour(node, NodeType::Vpc).cloned();

        let mut body = Body::default();
        if let Some(vpc) = &vpc {
            body.push_attr("vpc_id", id_ref("aws_vpc", vpc));
        }
        body.push_attr("tags", tags(&Self::display_name(node)));
        self.push(resource("aws_internet_gateway", &name, body));

        let Some(vpc) = vpc else { return };
        let table = format!("{name}_public");
        let mut route = Body::default();
        route.push_attr("cidr_block", Expr::str("0.0.0.0/0"));
        route.push_attr("gateway_id", id_ref("aws_internet_gateway", node));
        let mut rt = Body::default();
        rt.push_attr("vpc_id", id_ref("aws_vpc", &vpc));
        rt.push_block(block("route", route));
        rt.push_attr("tags", tags(&format!("{} public", Self::display_name(node))));
        self.push(resource("aws_route_table", &table, rt));

        let public_subnets: Vec<Node> = self
            .graph
            .neighbours_of(&node.id, NodeType::Subnet)
            .cloned()
            .collect();
        for subnet in public_subnets {
            let mut assoc = Body::default();
            assoc.push_attr("subnet_id", id_ref("aws_subnet", &subnet));
            assoc.push_attr(
                "route_table_id",
                Expr::reference(&format!("aws_route_table.{table}.id")),
            );
            self.push(resource(
                "aws_route_table_association",
                &subnet.resource_name(),
                assoc,
            ));
        }
    }

    fn security_group(&mut self, node: &Node) {
        let vpc = self.vpc_of(node).cloned();
        let internal = node.bool_attr("internal").unwrap_or(false);
        let vpc_cidr = vpc
            .as_ref()
            .and_then(|v| v.str_attr("cidr_block"))
            .unwrap_or(VPC_CIDR)
            .to_owned();

        let mut body = Body::default();
        body.push_attr("name", Expr::str(node.resource_name().replace('_', "-")));
        body.push_attr(
            "description",
            Expr::str(format!("{} managed by iacforge", Self::display_name(node))),
        );
        if let Some(vpc) = &vpc {
            body.push_attr("vpc_id", id_ref("aws_vpc", vpc));
        }

        let mut ports = node.ports_attr();
        if ports.is_empty() {
            ports.push(443);
        }
        for port in ports {
            // Administrative ports and internal groups stay inside the VPC.
            let cidr = if internal || matches!(port, 22 | 3389) {
                vpc_cidr.clone()
            } else {
                "0.0.0.0/0".to_owned()
            };
            let mut rule = Body::default();
            rule.push_attr("description", Expr::str(port_description(port)));
            rule.push_attr("from_port", Expr::int(i64::from(port)));
            rule.push_attr("to_port", Expr::int(i64::from(port)));
            rule.push_attr("protocol", Expr::str("tcp"));
            rule.push_attr("cidr_blocks", Expr::Tuple(vec![Expr::str(cidr)]));
            body.push_block(block("ingress", rule));
        }

        let mut egress = Body::default();
        egress.push_attr("from_port", Expr::int(0));
        egress.push_attr("to_port", Expr::int(0));
        egress.push_attr("protocol", Expr::str("-1"));
        egress.push_attr(
            "cidr_blocks",
            Expr::Tuple(vec![Expr::str(if internal { vpc_cidr.as_str() } else { "0.0.0.0/0" })]),
        );
        body.push_block(block("egress", egress));
        body.push_attr("tags", tags(&Self::display_name(node)));
        self.push(resource("aws_security_group", &node.resource_name(), body));
    }

    fn instance(&mut self, node: &Node) {
        let count = node.u64_attr("count").unwrap_or(1);
        let encrypted = node.bool_attr("encrypted").unwrap_or(true);
        let name = Self::display_name(node);

        let mut body = Body::default();
        if count > 1 {
            body.push_attr("count", Expr::int(i64::try_from(count).unwrap_or(1)));
        }
        body.push_attr("ami", Expr::reference(AMI_DATA));
        body.push_attr(
            "instance_type",
            Expr::str(node.str_attr("instance_type").unwrap_or(DEFAULT_INSTANCE_TYPE)),
        );
        if let Some(subnet) = self.first_neighbour(node, NodeType::Subnet) {
            body.push_attr("subnet_id", id_ref("aws_subnet", subnet));
        }
        let groups = self.neighbour_ids(node, NodeType::SecurityGroup, "aws_security_group");
        if !groups.is_empty() {
            body.push_attr("vpc_security_group_ids", Expr::Tuple(groups));
        }

        let mut metadata = Body::default();
        metadata.push_attr("http_endpoint", Expr::str("enabled"));
        metadata.push_attr("http_tokens", Expr::str("required"));
        body.push_block(block("metadata_options", metadata));

        let mut root = Body::default();
        root.push_attr("volume_type", Expr::str("gp3"));
        root.push_attr("encrypted", Expr::Bool(encrypted));
        body.push_block(block("root_block_device", root));

        let tag_name = if count > 1 {
            format!("{name}-${{count.index}}")
        } else {
            name
        };
        body.push_attr("tags", tags(&tag_name));
        self.push(resource("aws_instance", &node.resource_name(), body));
    }

    fn database(&mut self, node: &Node) {
        let name = node.resource_name();
        let engine = node.str_attr("engine").unwrap_or("postgres");
        let subnets = self.neighbour_ids(node, NodeType::Subnet, "aws_subnet");

        if !subnets.is_empty() {
            let mut group = Body::default();
            group.push_attr("name", Expr::str(format!("{}-subnets", name.replace('_', "-"))));
            group.push_attr("subnet_ids", Expr::Tuple(subnets.clone()));
            group.push_attr("tags", tags(&Self::display_name(node)));
            self.push(resource("aws_db_subnet_group", &name, group));
        }

        let mut body = Body::default();
        body.push_attr("identifier", Expr::str(name.replace('_', "-")));
        body.push_attr("engine", Expr::str(engine));
        body.push_attr(
            "instance_class",
            Expr::str(node.str_attr("instance_class").unwrap_or("db.t3.micro")),
        );
        body.push_attr(
            "allocated_storage",
            Expr::int(i64::try_from(node.u64_attr("allocated_storage").unwrap_or(20)).unwrap_or(20)),
        );
        body.push_attr(
            "storage_encrypted",
            Expr::Bool(node.bool_attr("encrypted").unwrap_or(true)),
        );
        body.push_attr("username", Expr::str("dbadmin"));
        body.push_attr("manage_master_user_password", Expr::Bool(true));
        if !subnets.is_empty() {
            body.push_attr(
                "db_subnet_group_name",
                Expr::reference(&format!("aws_db_subnet_group.{name}.name")),
            );
        }
        let groups = self.neighbour_ids(node, NodeType::SecurityGroup, "aws_security_group");
        if !groups.is_empty() {
            body.push_attr("vpc_security_group_ids", Expr::Tuple(groups));
        }
        body.push_attr(
            "multi_az",
            Expr::Bool(node.bool_attr("multi_az").unwrap_or(false)),
        );
        body.push_attr("publicly_accessible", Expr::Bool(false));
        body.push_attr("backup_retention_period", Expr::int(7));
        body.push_attr("deletion_protection", Expr::Bool(true));
        body.push_attr(
            "final_snapshot_identifier",
            Expr::str(format!("{}-final", name.replace('_', "-"))),
        );
        body.push_attr("tags", tags(&Self::display_name(node)));
        self.push(resource("aws_db_instance", &name, body));
    }

    fn bucket(&mut self, node: &Node) {
        let name = node.resource_name();
        let bucket_ref = Expr::reference(&format!("aws_s3_bucket.{name}.id"));

        let mut body = Body::default();
        body.push_attr(
            "bucket_prefix",
            Expr::str(format!("{}-", name.replace('_', "-"))),
        );
        body.push_attr("tags", tags(&Self::display_name(node)));
        self.push(resource("aws_s3_bucket", &name, body));

        let mut versioning = Body::default();
        versioning.push_attr("status", Expr::str("Enabled"));
        let mut body = Body::default();
        body.push_attr("bucket", bucket_ref.clone());
        body.push_block(block("versioning_configuration", versioning));
        self.push(resource("aws_s3_bucket_versioning", &name, body));

        if node.bool_attr("encrypted").unwrap_or(true) {
            let mut default = Body::default();
            default.push_attr("sse_algorithm", Expr::str("aws:kms"));
            let mut rule = Body::default();
            rule.push_block(block("apply_server_side_encryption_by_default", default));
            let mut body = Body::default();
            body.push_attr("bucket", bucket_ref.clone());
            body.push_block(block("rule", rule));
            self.push(resource(
                "aws_s3_bucket_server_side_encryption_configuration",
                &name,
                body,
            ));
        }

        let mut body = Body::default();
        body.push_attr("bucket", bucket_ref);
        for flag in [
            "block_public_acls",
            "block_public_policy",
            "ignore_public_acls",
            "restrict_public_buckets",
        ] {
            body.push_attr(flag, Expr::Bool(true));
        }
        self.push(resource("aws_s3_bucket_public_access_block", &name, body));
    }

    fn load_balancer(&mut self, node: &Node) {
        let name = node.resource_name();
        let dashed = name.replace('_', "-");

        let mut body = Body::default();
        body.push_attr("name", Expr::str(&dashed));
        body.push_attr("internal", Expr::Bool(false));
        body.push_attr("load_balancer_type", Expr::str("application"));
        let groups = self.neighbour_ids(node, NodeType::SecurityGroup, "aws_security_group");
        if !groups.is_empty() {
            body.push_attr("security_groups", Expr::Tuple(groups));
        }
        let subnets = self.neighbour_ids(node, NodeType::Subnet, "aws_subnet");
        if !subnets.is_empty() {
            body.push_attr("subnets", Expr::Tuple(subnets));
        }
        body.push_attr("drop_invalid_header_fields", Expr::Bool(true));
        body.push_attr("tags", tags(&Self::display_name(node)));
        self.push(resource("aws_lb", &name, body));

        let mut target = Body::default();
        target.push_attr("name", Expr::str(format!("{dashed}-tg")));
        target.push_attr("port", Expr::int(80));
        target.push_attr("protocol", Expr::str("HTTP"));
        if let Some(vpc) = self.vpc_of(node) {
            target.push_attr("vpc_id", id_ref("aws_vpc", vpc));
        }
        self.push(resource("aws_lb_target_group", &name, target));

        let tg_arn = Expr::reference(&format!("aws_lb_target_group.{name}.arn"));
        let mut action = Body::default();
        action.push_attr("type", Expr::str("forward"));
        action.push_attr("target_group_arn", tg_arn.clone());
        let mut listener = Body::default();
        listener.push_attr(
            "load_balancer_arn",
            Expr::reference(&format!("aws_lb.{name}.arn")),
        );
        listener.push_attr("port", Expr::int(80));
        listener.push_attr("protocol", Expr::str("HTTP"));
        listener.push_block(block("default_action", action));
        self.push(resource("aws_lb_listener", &name, listener));

        let targets: Vec<Node> = self
            .graph
            .neighbours_of(&node.id, NodeType::Instance)
            .cloned()
            .collect();
        for instance in targets {
            let count = instance.u64_attr("count").unwrap_or(1);
            let mut attach = Body::default();
            if count > 1 {
                attach.push_attr("count", Expr::int(i64::try_from(count).unwrap_or(1)));
            }
            attach.push_attr("target_group_arn", tg_arn.clone());
            attach.push_attr("target_id", instance_id_ref(&instance));
            attach.push_attr("port", Expr::int(80));
            self.push(resource(
                "aws_lb_target_group_attachment",
                &format!("{name}_{}", instance.resource_name()),
                attach,
            ));
        }
    }

    fn function(&mut self, node: &Node) {
        let name = node.resource_name();
        let role = format!("{name}_exec");

        let statement = Expr::Object(vec![
            ("Action".to_owned(), Expr::str("sts:AssumeRole")),
            ("Effect".to_owned(), Expr::str("Allow")),
            (
                "Principal".to_owned(),
                Expr::Object(vec![(
                    "Service".to_owned(),
                    Expr::str("lambda.amazonaws.com"),
                )]),
            ),
        ]);
        let policy = Expr::Call {
            name: "jsonencode".to_owned(),
            args: vec![Expr::Object(vec![
                ("Version".to_owned(), Expr::str("2012-10-17")),
                ("Statement".to_owned(), Expr::Tuple(vec![statement])),
            ])],
        };
        let mut body = Body::default();
        body.push_attr("name", Expr::str(role.replace('_', "-")));
        body.push_attr("assume_role_policy", policy);
        self.push(resource("aws_iam_role", &role, body));

        let mut body = Body::default();
        body.push_attr("function_name", Expr::str(name.replace('_', "-")));
        body.push_attr("role", Expr::reference(&format!("aws_iam_role.{role}.arn")));
        body.push_attr(
            "runtime",
            Expr::str(node.str_attr("runtime").unwrap_or("python3.12")),
        );
        body.push_attr("handler", Expr::str("index.handler"));
        body.push_attr("filename", Expr::str("lambda.zip"));
        body.push_attr("tags", tags(&Self::display_name(node)));
        self.push(resource("aws_lambda_function", &name, body));
    }

    fn volume(&mut self, node: &Node) {
        let name = node.resource_name();
        let instance = self.first_neighbour(node, NodeType::Instance).cloned();
        let az_index = instance
            .as_ref()
            .and_then(|i| self.first_neighbour(i, NodeType::Subnet))
            .and_then(|s| s.u64_attr("az_index"))
            .unwrap_or(0);

        let mut body = Body::default();
        body.push_attr("availability_zone", Expr::str(self.az(az_index)));
        body.push_attr(
            "size",
            Expr::int(i64::try_from(node.u64_attr("size").unwrap_or(20)).unwrap_or(20)),
        );
        body.push_attr("type", Expr::str("gp3"));
        body.push_attr(
            "encrypted",
            Expr::Bool(node.bool_attr("encrypted").unwrap_or(true)),
        );
        body.push_attr("tags", tags(&Self::display_name(node)));
        self.push(resource("aws_ebs_volume", &name, body));

        if let Some(instance) = instance {
            let target = if instance.u64_attr("count").unwrap_or(1) > 1 {
                Expr::Traversal {
                    root: "aws_instance".to_owned(),
                    steps: vec![
                        Step::Attr(instance.resource_name()),
                        Step::Index(Box::new(Expr::int(0))),
                        Step::Attr("id".to_owned()),
                    ],
                }
            } else {
                id_ref("aws_instance", &instance)
            };
            let mut body = Body::default();
            body.push_attr("device_name", Expr::str("/dev/sdf"));
            body.push_attr("volume_id", id_ref("aws_ebs_volume", node));
            body.push_attr("instance_id", target);
            self.push(resource("aws_volume_attachment", &name, body));
        }
    }

    fn placeholder(&mut self, node: &Node) {
        self.doc.push_comment(format!(
            "TODO: \"{}\" (type \"{}\") has no known Terraform mapping; define it manually.",
            single_line(&Self::display_name(node)),
            single_line(&node.node_type)
        ));
        let linked: Vec<String> = self
            .graph
            .neighbours(&node.id)
            .map(|n| single_line(&n.id))
            .collect();
        if !linked.is_empty() {
            self.doc
                .push_comment(format!("TODO: it connects to: {}.", linked.join(", ")));
        }
    }
}

/// Collapse control characters and runs of whitespace so user text fits on
/// one comment line.
fn single_line(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn port_description(port: u16) -> String {
    match port {
        22 => "SSH from inside the VPC".to_owned(),
        80 => "HTTP".to_owned(),
        443 => "HTTPS".to_owned(),
        3306 => "MySQL".to_owned(),
        3389 => "RDP from inside the VPC".to_owned(),
        5432 => "PostgreSQL".to_owned(),
        other => format!("TCP {other}"),
    }
}

/// Convert a document to Terraform JSON syntax.
///
/// Blocks nest by kind and labels; nested blocks become arrays of objects;
/// references and calls become `${...}` templates; comments are collected
/// into `"//"` properties.
#[must_use]
pub fn to_json(doc: &Body) -> Value {
    body_to_json(doc, true)
}

fn body_to_json(body: &Body, top: bool) -> Value {
    let mut out = Map::new();
    let mut comments = Vec::new();

    for item in &body.items {
        match item {
            Item::Comment(text) => comments.push(text.clone()),
            Item::Attribute(a) => {
                out.insert(a.key.clone(), expr_to_json(&a.value));
            }
            Item::Block(b) => {
                let inner = body_to_json(&b.body, false);
                if top {
                    // kind -> label -> label -> body
                    let mut slot = out
                        .entry(b.kind.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    for label in &b.labels {
                        let Value::Object(map) = slot else { break };
                        slot = map
                            .entry(label.clone())
                            .or_insert_with(|| Value::Object(Map::new()));
                    }
                    *slot = inner;
                } else {
                    let entry = out
                        .entry(b.kind.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Value::Array(list) = entry {
                        list.push(inner);
                    }
                }
            }
        }
    }

    if !comments.is_empty() {
        out.insert("//".to_owned(), Value::String(comments.join("\n")));
    }
    Value::Object(out)
}

fn expr_to_json(expr: &Expr) -> Value {
    match expr {
        Expr::Null => Value::Null,
        Expr::Bool(b) => Value::Bool(*b),
        Expr::Number(n) => n
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| n.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::String(n.clone())),
        Expr::String(s) => Value::String(s.clone()),
        Expr::Tuple(items) => Value::Array(items.iter().map(expr_to_json).collect()),
        Expr::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), expr_to_json(v)))
                .collect(),
        ),
        other => Value::String(format!("${{{}}}", crate::hcl::render_expr(other))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::generate::graph::Edge;
    use crate::hcl::{parse, render};

    fn web_graph() -> ResourceGraph {
        ResourceGraph {
            region: Some("eu-west-1".to_owned()),
            nodes: vec![
                Node::new("web", "ec2").with("instance_type", "t3.small"),
                Node::new("main", "vpc"),
                Node::new("pub", "subnet").with("public", true),
                Node::new("queue", "kafka").with("partitions", 3),
            ],
            edges: vec![
                Edge {
                    from: "web".to_owned(),
                    to: "pub".to_owned(),
                    relation: None,
                },
                Edge {
                    from: "pub".to_owned(),
                    to: "main".to_owned(),
                    relation: None,
                },
                Edge {
                    from: "queue".to_owned(),
                    to: "web".to_owned(),
                    relation: None,
                },
            ],
        }
    }

    #[test]
    fn references_follow_edges() {
        let doc = build(&web_graph());
        assert!(render(&doc).contains("= aws_vpc.main.id"));

        let subnet = doc
            .resources()
            .find(|r| r.resource_type == "aws_subnet")
            .unwrap();
        assert_eq!(
            subnet.body.attr("vpc_id").unwrap().as_reference().unwrap(),
            "aws_vpc.main.id"
        );
        let instance = doc
            .resources()
            .find(|r| r.resource_type == "aws_instance")
            .unwrap();
        assert_eq!(
            instance.body.attr("subnet_id").unwrap().as_reference().unwrap(),
            "aws_subnet.pub.id"
        );
        assert_eq!(
            subnet.body.attr("availability_zone").unwrap().as_str(),
            Some("eu-west-1a")
        );
    }

    #[test]
    fn containers_precede_contents() {
        let doc = build(&web_graph());
        let order: Vec<String> = doc.resources().map(|r| r.address()).collect();
        let pos = |a: &str| order.iter().position(|x| x == a).unwrap();
        assert!(pos("aws_vpc.main") < pos("aws_subnet.pub"));
        assert!(pos("aws_subnet.pub") < pos("aws_instance.web"));
    }

    #[test]
    fn unknown_nodes_become_todo_comments() {
        let doc = build(&web_graph());
        let comments: Vec<&str> = doc
            .items
            .iter()
            .filter_map(|i| match i {
                Item::Comment(c) => Some(c.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(comments.len(), 2);
        assert!(comments[0].starts_with("TODO: \"queue\" (type \"kafka\")"));
        assert!(comments[1].contains("web"));

        let json = to_json(&doc);
        assert!(json["//"].as_str().unwrap().contains("kafka"));
    }

    #[test]
    fn placeholder_text_stays_on_one_line() {
        let graph = ResourceGraph {
            region: None,
            nodes: vec![
                Node::new("main", "vpc"),
                Node {
                    label: Some("line one\nline two".to_owned()),
                    ..Node::new("q", "kafka\r\ncluster")
                },
            ],
            edges: Vec::new(),
        };
        let doc = build(&graph);
        let text = render(&doc);
        assert!(
            text.contains("# TODO: \"line one line two\" (type \"kafka cluster\")"),
            "{text}"
        );
        assert_eq!(parse(&text).unwrap(), doc);
    }

    #[test]
    fn hcl_output_round_trips() {
        let doc = build(&web_graph());
        assert_eq!(parse(&render(&doc)).unwrap(), doc);
    }

    #[test]
    fn json_output_uses_terraform_json_layout() {
        let json = to_json(&build(&web_graph()));
        assert_eq!(json["provider"]["aws"]["region"], "eu-west-1");
        assert_eq!(
            json["resource"]["aws_subnet"]["pub"]["vpc_id"],
            "${aws_vpc.main.id}"
        );
        assert_eq!(
            json["resource"]["aws_instance"]["web"]["metadata_options"][0]["http_tokens"],
            "required"
        );
        assert_eq!(
            json["terraform"]["required_providers"][0]["aws"]["source"],
            "hashicorp/aws"
        );
    }
}
