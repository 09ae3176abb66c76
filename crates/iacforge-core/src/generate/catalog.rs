//! Known infrastructure components and the words that name them.

/// A component the generator knows how to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeType {
    Vpc,
    Subnet,
    InternetGateway,
    SecurityGroup,
    Instance,
    Database,
    Bucket,
    LoadBalancer,
    Function,
    Volume,
}

/// Aliases accepted in graph `type` fields and description text.
const ALIASES: &[(&str, NodeType)] = &[
    ("vpc", NodeType::Vpc),
    ("network", NodeType::Vpc),
    ("aws_vpc", NodeType::Vpc),
    ("subnet", NodeType::Subnet),
    ("aws_subnet", NodeType::Subnet),
    ("internet_gateway", NodeType::InternetGateway),
    ("igw", NodeType::InternetGateway),
    ("gateway", NodeType::InternetGateway),
    ("aws_internet_gateway", NodeType::InternetGateway),
    ("security_group", NodeType::SecurityGroup),
    ("sg", NodeType::SecurityGroup),
    ("firewall", NodeType::SecurityGroup),
    ("aws_security_group", NodeType::SecurityGroup),
    ("instance", NodeType::Instance),
    ("ec2", NodeType::Instance),
    ("server", NodeType::Instance),
    ("vm", NodeType::Instance),
    ("host", NodeType::Instance),
    ("aws_instance", NodeType::Instance),
    ("database", NodeType::Database),
    ("db", NodeType::Database),
    ("rds", NodeType::Database),
    ("postgres", NodeType::Database),
    ("postgresql", NodeType::Database),
    ("mysql", NodeType::Database),
    ("mariadb", NodeType::Database),
    ("aws_db_instance", NodeType::Database),
    ("bucket", NodeType::Bucket),
    ("s3", NodeType::Bucket),
    ("aws_s3_bucket", NodeType::Bucket),
    ("load_balancer", NodeType::LoadBalancer),
    ("loadbalancer", NodeType::LoadBalancer),
    ("lb", NodeType::LoadBalancer),
    ("alb", NodeType::LoadBalancer),
    ("elb", NodeType::LoadBalancer),
    ("aws_lb", NodeType::LoadBalancer),
    ("lambda", NodeType::Function),
    ("function", NodeType::Function),
    ("serverless", NodeType::Function),
    ("aws_lambda_function", NodeType::Function),
    ("volume", NodeType::Volume),
    ("ebs", NodeType::Volume),
    ("disk", NodeType::Volume),
    ("aws_ebs_volume", NodeType::Volume),
];

impl NodeType {
    /// Look up a type name or alias, case-insensitively. Spaces, hyphens and
    /// a trailing plural `s` are tolerated.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let norm: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        lookup(&norm).or_else(|| norm.strip_suffix('s').and_then(lookup))
    }

    /// Emission order: containers before the things placed in them.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Vpc | Self::Bucket => 0,
            Self::Subnet | Self::InternetGateway | Self::SecurityGroup => 1,
            Self::Instance | Self::Database | Self::LoadBalancer | Self::Function => 2,
            Self::Volume => 3,
        }
    }

    /// Canonical name used in generated graphs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::InternetGateway => "internet_gateway",
            Self::SecurityGroup => "security_group",
            Self::Instance => "instance",
            Self::Database => "database",
            Self::Bucket => "bucket",
            Self::LoadBalancer => "load_balancer",
            Self::Function => "function",
            Self::Volume => "volume",
        }
    }

    /// Whether the component lives inside a VPC.
    #[must_use]
    pub fn needs_network(self) -> bool {
        matches!(
            self,
            Self::Subnet
                | Self::InternetGateway
                | Self::SecurityGroup
                | Self::Instance
                | Self::Database
                | Self::LoadBalancer
        )
    }
}

fn lookup(name: &str) -> Option<NodeType> {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, t)| *t)
}

/// Multi-word phrases folded into single tokens before keyword matching.
pub(crate) const PHRASES: &[(&str, &str)] = &[
    ("load balancers", "load_balancer"),
    ("load balancer", "load_balancer"),
    ("internet gateways", "internet_gateway"),
    ("internet gateway", "internet_gateway"),
    ("security groups", "security_group"),
    ("security group", "security_group"),
    ("web servers", "server"),
    ("web server", "server"),
    ("ec2 instances", "instance"),
    ("ec2 instance", "instance"),
    ("s3 buckets", "bucket"),
    ("s3 bucket", "bucket"),
    ("rds instances", "database"),
    ("rds instance", "database"),
    ("ebs volumes", "volume"),
    ("ebs volume", "volume"),
    ("lambda functions", "function"),
    ("lambda function", "function"),
    ("multi az", "multi_az"),
    ("multi-az", "multi_az"),
    ("highly available", "multi_az"),
    ("high availability", "multi_az"),
];

/// Words accepted as counts.
pub(crate) fn number_word(word: &str) -> Option<u64> {
    let n = match word {
        "a" | "an" | "one" | "single" => 1,
        "two" | "pair" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        _ => return word.parse().ok().filter(|n| (1..=50).contains(n)),
    };
    Some(n)
}

/// Well-known ports named in descriptions.
pub(crate) fn named_port(word: &str) -> Option<u16> {
    match word {
        "http" | "web" => Some(80),
        "https" | "tls" | "ssl" => Some(443),
        "ssh" => Some(22),
        "rdp" => Some(3389),
        _ => None,
    }
}

/// Whether `word` looks like an EC2 instance type (`t3.micro`, `m5.2xlarge`).
pub(crate) fn is_instance_type(word: &str) -> bool {
    let Some((family, size)) = word.split_once('.') else {
        return false;
    };
    let mut fam = family.chars();
    let family_ok = fam.next().is_some_and(|c| c.is_ascii_lowercase())
        && fam.next().is_some_and(|c| c.is_ascii_digit())
        && fam.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let size_ok = matches!(
        size,
        "nano" | "micro" | "small" | "medium" | "large" | "xlarge" | "metal"
    ) || size
        .strip_suffix("xlarge")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
    family_ok && size_ok
}

/// Whether `word` is an AWS region name such as `eu-west-1`.
pub(crate) fn is_region(word: &str) -> bool {
    let parts: Vec<&str> = word.split('-').collect();
    match parts.as_slice() {
        [geo, area, num] | [geo, "gov", area, num] => {
            geo.len() == 2
                && geo.chars().all(|c| c.is_ascii_lowercase())
                && matches!(
                    *area,
                    "east" | "west" | "north" | "south" | "central" | "northeast" | "southeast"
                        | "northwest" | "southwest"
                )
                && num.len() == 1
                && num.chars().all(|c| c.is_ascii_digit())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_and_plurals() {
        assert_eq!(NodeType::parse("EC2"), Some(NodeType::Instance));
        assert_eq!(NodeType::parse("Load Balancer"), Some(NodeType::LoadBalancer));
        assert_eq!(NodeType::parse("buckets"), Some(NodeType::Bucket));
        assert_eq!(NodeType::parse("aws_db_instance"), Some(NodeType::Database));
        assert_eq!(NodeType::parse("kafka"), None);
    }

    #[test]
    fn instance_types() {
        assert!(is_instance_type("t3.micro"));
        assert!(is_instance_type("m5.2xlarge"));
        assert!(is_instance_type("c6gn.large"));
        assert!(!is_instance_type("10.0.0.0"));
        assert!(!is_instance_type("example.com"));
    }

    #[test]
    fn regions() {
        assert!(is_region("us-east-1"));
        assert!(is_region("ap-southeast-2"));
        assert!(!is_region("us-east"));
        assert!(!is_region("multi-az"));
    }

    #[test]
    fn counts() {
        assert_eq!(number_word("three"), Some(3));
        assert_eq!(number_word("12"), Some(12));
        assert_eq!(number_word("500"), None);
        assert_eq!(number_word("web"), None);
    }
}
