//! Terraform native syntax: document model, parser and renderer.
//!
//! Covers the subset Terraform configurations use in practice: blocks with
//! labels, attributes, string templates, heredocs, numbers, bools, null,
//! tuples, objects, traversals with index steps, function calls, unary and
//! binary operators and conditionals. `for` expressions are not supported.
//!
//! Comments on their own line are kept as [`Item::Comment`] so generated
//! placeholders survive a parse/render round trip. Trailing comments after an
//! attribute are dropped.
//!
//! ```
//! use iacforge_core::hcl;
//!
//! let doc = hcl::parse("resource \"aws_vpc\" \"main\" {\n  cidr_block = \"10.0.0.0/16\"\n}\n").unwrap();
//! let vpc = doc.resources().next().unwrap();
//! assert_eq!(vpc.address(), "aws_vpc.main");
//! assert_eq!(hcl::parse(&hcl::render(&doc)).unwrap(), doc);
//! ```

mod lexer;
mod parser;
mod render;

pub use parser::parse;
pub use render::render;
pub(crate) use render::render_expr;

/// A sequence of attributes, blocks and comments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Body {
    pub items: Vec<Item>,
}

/// One entry in a [`Body`].
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Attribute(Attribute),
    Block(Block),
    /// Text of a `#` or `//` line comment, without the marker.
    Comment(String),
}

/// `key = value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub key: String,
    pub value: Expr,
}

/// `kind "label" "label" { ... }`.
///
/// Equality ignores [`line`](Self::line).
#[derive(Debug, Clone)]
pub struct Block {
    pub kind: String,
    pub labels: Vec<String>,
    pub body: Body,
    /// 1-based line of the block keyword in the source, 0 when built in code.
    pub line: usize,
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.labels == other.labels && self.body == other.body
    }
}

/// One step of a traversal after the root name.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// `.name`
    Attr(String),
    /// `[expr]`
    Index(Box<Expr>),
    /// `[*]` or `.*`
    Splat,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    /// Numeric literal kept in its source spelling.
    Number(String),
    /// A string template. Literal text is unescaped; `${...}` sequences are
    /// kept verbatim.
    String(String),
    Tuple(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Traversal { root: String, steps: Vec<Step> },
    Call { name: String, args: Vec<Expr> },
    Unary { op: String, operand: Box<Expr> },
    Binary { op: String, lhs: Box<Expr>, rhs: Box<Expr> },
    Conditional { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Paren(Box<Expr>),
}

impl Expr {
    /// A string literal.
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// An integer literal.
    #[must_use]
    pub fn int(n: i64) -> Self {
        Self::Number(n.to_string())
    }

    /// A dotted reference such as `aws_vpc.main.id`.
    #[must_use]
    pub fn reference(path: &str) -> Self {
        let mut parts = path.split('.');
        let root = parts.next().unwrap_or_default().to_owned();
        Self::Traversal {
            root,
            steps: parts.map(|p| Step::Attr(p.to_owned())).collect(),
        }
    }

    /// Literal bool, also accepting the strings `"true"`/`"false"`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Self::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    /// Literal string without interpolation.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) if !s.contains("${") => Some(s),
            _ => None,
        }
    }

    /// Literal number, also accepting numeric strings.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.parse().ok(),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Elements of a tuple literal.
    #[must_use]
    pub fn as_tuple(&self) -> Option<&[Expr]> {
        match self {
            Self::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Value of `key` in an object literal.
    #[must_use]
    pub fn object_get(&self, key: &str) -> Option<&Expr> {
        match self {
            Self::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Dotted form of a traversal with only attribute steps.
    #[must_use]
    pub fn as_reference(&self) -> Option<String> {
        let Self::Traversal { root, steps } = self else {
            return None;
        };
        let mut out = root.clone();
        for step in steps {
            match step {
                Step::Attr(name) => {
                    out.push('.');
                    out.push_str(name);
                }
                Step::Index(_) | Step::Splat => return None,
            }
        }
        Some(out)
    }

    /// Whether any traversal inside this expression mentions `address`
    /// (`type.name`), including inside string interpolations.
    #[must_use]
    pub fn mentions(&self, address: &str) -> bool {
        match self {
            Self::Traversal { root, steps } => {
                let mut path = root.clone();
                if let Some(Step::Attr(first)) = steps.first() {
                    path.push('.');
                    path.push_str(first);
                }
                path == address
            }
            Self::String(s) => s.contains(&format!("{address}.")),
            Self::Tuple(items) => items.iter().any(|e| e.mentions(address)),
            Self::Object(entries) => entries.iter().any(|(_, e)| e.mentions(address)),
            Self::Call { args, .. } => args.iter().any(|e| e.mentions(address)),
            Self::Unary { operand, .. } | Self::Paren(operand) => operand.mentions(address),
            Self::Binary { lhs, rhs, .. } => lhs.mentions(address) || rhs.mentions(address),
            Self::Conditional {
                cond,
                then,
                otherwise,
            } => cond.mentions(address) || then.mentions(address) || otherwise.mentions(address),
            Self::Null | Self::Bool(_) | Self::Number(_) => false,
        }
    }
}

impl Body {
    /// The value of attribute `key`, if present.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&Expr> {
        self.items.iter().find_map(|item| match item {
            Item::Attribute(a) if a.key == key => Some(&a.value),
            _ => None,
        })
    }

    /// Nested blocks of the given kind, in source order.
    pub fn blocks<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.items.iter().filter_map(move |item| match item {
            Item::Block(b) if b.kind == kind => Some(b),
            _ => None,
        })
    }

    /// Whether a nested block of the given kind exists.
    #[must_use]
    pub fn has_block(&self, kind: &str) -> bool {
        self.blocks(kind).next().is_some()
    }

    /// All attribute values, in source order.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.items.iter().filter_map(|item| match item {
            Item::Attribute(a) => Some(a),
            _ => None,
        })
    }

    /// Append an attribute.
    pub fn push_attr(&mut self, key: impl Into<String>, value: Expr) {
        self.items.push(Item::Attribute(Attribute {
            key: key.into(),
            value,
        }));
    }

    /// Append a block.
    pub fn push_block(&mut self, block: Block) {
        self.items.push(Item::Block(block));
    }

    /// Append a comment line.
    pub fn push_comment(&mut self, text: impl Into<String>) {
        self.items.push(Item::Comment(text.into()));
    }

    /// Whether anything in this body references `address`.
    #[must_use]
    pub fn mentions(&self, address: &str) -> bool {
        self.items.iter().any(|item| match item {
            Item::Attribute(a) => a.value.mentions(address),
            Item::Block(b) => b.body.mentions(address),
            Item::Comment(_) => false,
        })
    }
}

impl Block {
    /// A block built in code.
    #[must_use]
    pub fn new(kind: impl Into<String>, labels: &[&str], body: Body) -> Self {
        Self {
            kind: kind.into(),
            labels: labels.iter().map(|l| (*l).to_owned()).collect(),
            body,
            line: 0,
        }
    }
}

/// A `resource "type" "name"` block viewed as a resource.
#[derive(Debug, Clone, Copy)]
pub struct Resource<'a> {
    pub resource_type: &'a str,
    pub name: &'a str,
    pub body: &'a Body,
    pub line: usize,
}

impl Resource<'_> {
    /// `type.name`, the address used in references and findings.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}", self.resource_type, self.name)
    }
}

impl Body {
    /// Top-level `resource` blocks with exactly two labels, in source order.
    pub fn resources(&self) -> impl Iterator<Item = Resource<'_>> {
        self.blocks("resource").filter_map(|b| match b.labels.as_slice() {
            [ty, name] => Some(Resource {
                resource_type: ty,
                name,
                body: &b.body,
                line: b.line,
            }),
            _ => None,
        })
    }
}

/// Whether `s` is a valid identifier (and can be written unquoted).
#[must_use]
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn reference_helpers() {
        let e = Expr::reference("aws_vpc.main.id");
        assert_eq!(e.as_reference().unwrap(), "aws_vpc.main.id");
        assert!(e.mentions("aws_vpc.main"));
        assert!(!e.mentions("aws_vpc.other"));
        assert!(Expr::str("${aws_s3_bucket.logs.id}").mentions("aws_s3_bucket.logs"));
    }

    #[test]
    fn literal_coercions() {
        assert_eq!(Expr::str("true").as_bool(), Some(true));
        assert_eq!(Expr::Number("7".to_owned()).as_f64(), Some(7.0));
        assert_eq!(Expr::str("${var.x}").as_str(), None);
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("cidr_block"));
        assert!(is_identifier("Name-2"));
        assert!(!is_identifier("2fa"));
        assert!(!is_identifier("kubernetes.io/role"));
    }
}
