//! Generation engine: description or diagram to Terraform.
//!
//! Both paths meet at a [`ResourceGraph`]. [`description::interpret`] and a
//! [`DiagramReader`] produce the graph; [`codegen`] turns it into a
//! document which is rendered in the requested [`Target`] syntax and
//! validated before it is returned.

pub mod catalog;
pub mod codegen;
pub mod description;
pub mod diagram;
pub mod graph;

use std::sync::Arc;

use tracing::debug;

use crate::error::{EngineError, GenerateError};
use crate::hcl::{self, Body, Item};
use crate::job::Target;

pub use diagram::{DiagramReader, EmbeddedGraphReader, HttpDiagramReader};
pub use graph::{Edge, Node, ResourceGraph};

/// Rendered, validated output.
#[derive(Debug, Clone)]
pub struct Generated {
    pub target: Target,
    pub text: String,
    /// Number of `TODO` placeholders for unrecognized components.
    pub placeholders: usize,
}

/// Entry point for both generation paths.
#[derive(Clone)]
pub struct Generator {
    reader: Arc<dyn DiagramReader>,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator").finish_non_exhaustive()
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new(Arc::new(EmbeddedGraphReader))
    }
}

impl Generator {
    #[must_use]
    pub fn new(reader: Arc<dyn DiagramReader>) -> Self {
        Self { reader }
    }

    /// Generate code from a natural-language description.
    ///
    /// # Errors
    ///
    /// Returns [`GenerateError`] for unusable descriptions or output that
    /// fails validation.
    pub fn generate(&self, description: &str, target: Target) -> Result<Generated, GenerateError> {
        let graph = description::interpret(description)?;
        emit(&graph, target)
    }

    /// Convert an uploaded diagram.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] carrying the diagram reader's or the code
    /// generator's failure.
    pub async fn convert(
        &self,
        bytes: &[u8],
        content_type: &str,
        target: Target,
    ) -> Result<Generated, EngineError> {
        let graph = self.reader.read(bytes, content_type).await?;
        debug!(nodes = graph.nodes.len(), edges = graph.edges.len(), "diagram read");
        Ok(emit(&graph, target)?)
    }
}

/// Render a graph in the target syntax and validate the result.
///
/// # Errors
///
/// - [`GenerateError::InvalidGraph`] if the graph fails validation.
/// - [`GenerateError::InvalidOutput`] if the rendered text does not parse.
pub fn emit(graph: &ResourceGraph, target: Target) -> Result<Generated, GenerateError> {
    graph.validate()?;
    let doc = codegen::build(graph);
    let placeholders = count_placeholders(&doc);

    let text = match target {
        Target::Hcl => {
            let text = hcl::render(&doc);
            let reparsed = hcl::parse(&text).map_err(|e| invalid_output(target, &e.to_string()))?;
            if reparsed != doc {
                return Err(invalid_output(target, "rendered document does not round-trip"));
            }
            text
        }
        Target::Json => {
            let mut text = serde_json::to_string_pretty(&codegen::to_json(&doc))
                .map_err(|e| invalid_output(target, &e.to_string()))?;
            text.push('\n');
            serde_json::from_str::<serde_json::Value>(&text)
                .map_err(|e| invalid_output(target, &e.to_string()))?;
            text
        }
    };

    Ok(Generated {
        target,
        text,
        placeholders,
    })
}

fn count_placeholders(doc: &Body) -> usize {
    doc.items
        .iter()
        .filter(|i| matches!(i, Item::Comment(c) if c.starts_with("TODO: \"")))
        .count()
}

fn invalid_output(target: Target, reason: &str) -> GenerateError {
    GenerateError::InvalidOutput {
        target: target.to_string(),
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hcl::parse;

    const DESCRIPTIONS: &[&str] = &[
        "a vpc with two public subnets and 3 t3.small web servers behind a load balancer",
        "an encrypted s3 bucket for logs",
        "a multi-az postgres database in eu-west-1 with private subnets",
        "a lambda function and a 100 GB ebs volume attached to an ec2 instance with ssh",
        "3 m5.large instances serving https",
    ];

    #[test]
    fn every_description_produces_parseable_hcl() {
        let g = Generator::default();
        for d in DESCRIPTIONS {
            let out = g.generate(d, Target::Hcl).unwrap();
            let doc = parse(&out.text).unwrap();
            assert!(doc.resources().count() > 0, "{d}");
            assert_eq!(out.placeholders, 0);
        }
    }

    #[test]
    fn every_description_produces_valid_json() {
        let g = Generator::default();
        for d in DESCRIPTIONS {
            let out = g.generate(d, Target::Json).unwrap();
            let v: serde_json::Value = serde_json::from_str(&out.text).unwrap();
            assert!(v["resource"].is_object(), "{d}");
        }
    }

    #[test]
    fn counted_instances_tag_with_index() {
        let out = Generator::default()
            .generate("3 t3.small web servers", Target::Hcl)
            .unwrap();
        assert!(out.text.lines().any(|l| {
            let mut parts = l.split('=').map(str::trim);
            parts.next() == Some("count") && parts.next() == Some("3")
        }));
        assert!(out.text.contains("${count.index}"));
    }

    #[tokio::test]
    async fn diagram_with_unknown_node_keeps_placeholder() {
        let json = br#"{"region":"us-west-2","nodes":[
            {"id":"main","type":"vpc"},
            {"id":"cache","type":"elasticache"}],
            "edges":[{"from":"cache","to":"main"}]}"#;
        let g = Generator::default();

        let hcl_out = g.convert(json, "application/json", Target::Hcl).await.unwrap();
        assert_eq!(hcl_out.placeholders, 1);
        assert!(hcl_out.text.contains("# TODO: \"cache\" (type \"elasticache\")"));
        assert!(hcl_out.text.contains("region = \"us-west-2\""));

        let json_out = g.convert(json, "application/json", Target::Json).await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&json_out.text).unwrap();
        assert!(v["//"].as_str().unwrap().contains("elasticache"));
    }

    #[tokio::test]
    async fn unreadable_diagram_is_input_error() {
        let err = Generator::default()
            .convert(b"GIF89a", "image/gif", Target::Hcl)
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Input);
    }
}
