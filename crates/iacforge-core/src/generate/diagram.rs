//! Diagram readers: uploaded diagram bytes to a resource graph.
//!
//! The built-in reader understands graph JSON exports and PNG images that
//! carry the graph JSON in a `tEXt`/`iTXt` chunk with the keyword
//! [`GRAPH_CHUNK_KEYWORD`]. The HTTP reader forwards anything else to an
//! external vision service that answers with the same graph JSON.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::DiagramError;
use crate::retry::RetryPolicy;

use super::graph::ResourceGraph;

/// PNG text chunk keyword holding the embedded graph.
pub const GRAPH_CHUNK_KEYWORD: &str = "iacforge-graph";

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Turns diagram bytes into a resource graph.
#[async_trait]
pub trait DiagramReader: Send + Sync {
    /// Read a diagram.
    ///
    /// # Errors
    ///
    /// - [`DiagramError::Unreadable`] if the format is not understood.
    /// - [`DiagramError::Malformed`] if the embedded graph is invalid.
    /// - [`DiagramError::Upstream`]/[`DiagramError::Timeout`] from a remote service.
    async fn read(&self, bytes: &[u8], content_type: &str) -> Result<ResourceGraph, DiagramError>;
}

/// Reads graphs embedded in the upload itself. No network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedGraphReader;

impl EmbeddedGraphReader {
    /// Synchronous form of [`DiagramReader::read`].
    ///
    /// # Errors
    ///
    /// See [`DiagramReader::read`].
    pub fn read_embedded(bytes: &[u8], content_type: &str) -> Result<ResourceGraph, DiagramError> {
        if bytes.is_empty() {
            return Err(unreadable("diagram is empty"));
        }
        if bytes.starts_with(PNG_SIGNATURE) {
            let payload = png_graph_chunk(bytes)?;
            return parse_graph(&payload);
        }
        let mime = content_type.split(';').next().unwrap_or("").trim();
        let looks_json = bytes
            .iter()
            .find(|b| !b.is_ascii_whitespace())
            .is_some_and(|b| *b == b'{');
        if mime == "application/json" || looks_json {
            return parse_graph(bytes);
        }
        Err(unreadable(&format!(
            "no embedded resource graph in {} content",
            if mime.is_empty() { "untyped" } else { mime }
        )))
    }
}

#[async_trait]
impl DiagramReader for EmbeddedGraphReader {
    async fn read(&self, bytes: &[u8], content_type: &str) -> Result<ResourceGraph, DiagramError> {
        Self::read_embedded(bytes, content_type)
    }
}

fn unreadable(reason: &str) -> DiagramError {
    DiagramError::Unreadable {
        reason: reason.to_owned(),
    }
}

fn parse_graph(bytes: &[u8]) -> Result<ResourceGraph, DiagramError> {
    ResourceGraph::from_json(bytes).map_err(|e| DiagramError::Malformed {
        reason: e.to_string(),
    })
}

/// Walk PNG chunks looking for the graph text chunk. CRCs are not checked.
fn png_graph_chunk(bytes: &[u8]) -> Result<Vec<u8>, DiagramError> {
    let mut rest = &bytes[PNG_SIGNATURE.len()..];
    while rest.len() >= 8 {
        let len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let kind = &rest[4..8];
        let Some(data) = rest.get(8..8 + len) else {
            return Err(unreadable("truncated PNG chunk"));
        };
        match kind {
            b"tEXt" => {
                if let Some((key, text)) = split_nul(data) {
                    if key == GRAPH_CHUNK_KEYWORD.as_bytes() {
                        return Ok(text.to_vec());
                    }
                }
            }
            b"iTXt" => {
                if let Some((key, tail)) = split_nul(data) {
                    if key == GRAPH_CHUNK_KEYWORD.as_bytes() {
                        return itxt_text(tail);
                    }
                }
            }
            b"IEND" => break,
            _ => {}
        }
        // length + type + data + crc
        rest = rest.get(12 + len..).unwrap_or_default();
    }
    Err(unreadable(&format!(
        "PNG carries no '{GRAPH_CHUNK_KEYWORD}' text chunk"
    )))
}

fn split_nul(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let at = data.iter().position(|b| *b == 0)?;
    Some((&data[..at], &data[at + 1..]))
}

/// `iTXt` after the keyword: compression flag, method, language\0, translated keyword\0, text.
fn itxt_text(tail: &[u8]) -> Result<Vec<u8>, DiagramError> {
    let malformed = |reason: &str| DiagramError::Malformed {
        reason: reason.to_owned(),
    };
    let [flag, _method, rest @ ..] = tail else {
        return Err(malformed("short iTXt chunk"));
    };
    if *flag != 0 {
        return Err(malformed("compressed iTXt graph chunks are not supported"));
    }
    let (_language, rest) = split_nul(rest).ok_or_else(|| malformed("bad iTXt language"))?;
    let (_translated, text) = split_nul(rest).ok_or_else(|| malformed("bad iTXt keyword"))?;
    Ok(text.to_vec())
}

/// Forwards diagrams without an embedded graph to an external service.
#[derive(Debug, Clone)]
pub struct HttpDiagramReader {
    http: reqwest::Client,
    url: String,
    retry: RetryPolicy,
}

impl HttpDiagramReader {
    #[must_use]
    pub fn new(url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            retry,
        }
    }

    async fn call_service(
        &self,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<ResourceGraph, DiagramError> {
        let resp = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| DiagramError::Upstream {
                reason: e.to_string(),
                retryable: true,
            })?;

        let status = resp.status();
        if status.is_success() {
            let body = resp.bytes().await.map_err(|e| DiagramError::Upstream {
                reason: e.to_string(),
                retryable: true,
            })?;
            return parse_graph(&body);
        }

        let body = resp.text().await.unwrap_or_default();
        if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(unreadable(&format!("diagram service rejected the image ({status}): {body}")));
        }
        Err(DiagramError::Upstream {
            reason: format!("diagram service returned {status}"),
            retryable: true,
        })
    }
}

#[async_trait]
impl DiagramReader for HttpDiagramReader {
    async fn read(&self, bytes: &[u8], content_type: &str) -> Result<ResourceGraph, DiagramError> {
        match EmbeddedGraphReader::read_embedded(bytes, content_type) {
            Err(DiagramError::Unreadable { reason }) => {
                debug!(reason = %reason, "no embedded graph, calling diagram service");
            }
            other => return other,
        }
        let started = std::time::Instant::now();
        let graph = self
            .retry
            .run("diagram extraction", || self.call_service(bytes, content_type))
            .await?;
        info!(
            nodes = graph.nodes.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "diagram service extracted graph"
        );
        Ok(graph)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    const GRAPH: &str = r#"{"nodes":[{"id":"main","type":"vpc"},{"id":"q","type":"sqs"}]}"#;

    fn chunk(kind: &[u8], data: &[u8]) -> Vec<u8> {
        let mut out = u32::try_from(data.len()).unwrap().to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(data);
        out.extend_from_slice(&[0; 4]);
        out
    }

    /// A PNG with an IHDR, one text chunk and IEND.
    fn png_with(kind: &[u8], text: &[u8]) -> Vec<u8> {
        let mut png = PNG_SIGNATURE.to_vec();
        png.extend(chunk(b"IHDR", &[0, 0, 0, 1, 0, 0, 0, 1, 8, 2, 0, 0, 0]));
        png.extend(chunk(kind, text));
        png.extend(chunk(b"IEND", &[]));
        png
    }

    fn text_chunk(json: &str) -> Vec<u8> {
        let mut data = GRAPH_CHUNK_KEYWORD.as_bytes().to_vec();
        data.push(0);
        data.extend_from_slice(json.as_bytes());
        data
    }

    #[test]
    fn reads_json_export() {
        let g = EmbeddedGraphReader::read_embedded(GRAPH.as_bytes(), "application/json").unwrap();
        assert_eq!(g.nodes.len(), 2);
    }

    #[test]
    fn reads_png_text_chunk() {
        let png = png_with(b"tEXt", &text_chunk(GRAPH));
        let g = EmbeddedGraphReader::read_embedded(&png, "image/png").unwrap();
        assert_eq!(g.nodes[1].node_type, "sqs");
    }

    #[test]
    fn reads_png_itxt_chunk() {
        let mut data = GRAPH_CHUNK_KEYWORD.as_bytes().to_vec();
        data.extend_from_slice(&[0, 0, 0, 0, 0]);
        data.extend_from_slice(GRAPH.as_bytes());
        let png = png_with(b"iTXt", &data);
        let g = EmbeddedGraphReader::read_embedded(&png, "image/png").unwrap();
        assert_eq!(g.nodes[0].id, "main");
    }

    #[test]
    fn png_without_graph_is_unreadable() {
        let mut data = b"Software".to_vec();
        data.push(0);
        data.extend_from_slice(b"drawio");
        let png = png_with(b"tEXt", &data);
        let err = EmbeddedGraphReader::read_embedded(&png, "image/png").unwrap_err();
        assert!(matches!(err, DiagramError::Unreadable { .. }));

        let err = EmbeddedGraphReader::read_embedded(b"\xff\xd8\xff\xe0", "image/jpeg").unwrap_err();
        assert!(matches!(err, DiagramError::Unreadable { .. }));
    }

    #[test]
    fn bad_embedded_graph_is_malformed() {
        let png = png_with(b"tEXt", &text_chunk(r#"{"nodes":[]}"#));
        let err = EmbeddedGraphReader::read_embedded(&png, "image/png").unwrap_err();
        assert!(matches!(err, DiagramError::Malformed { .. }));
    }

    #[tokio::test]
    async fn unreachable_service_is_retried_then_upstream() {
        let retry = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            call_timeout: Duration::from_secs(2),
        };
        let reader = HttpDiagramReader::new("http://127.0.0.1:9/extract", retry);
        let err = reader.read(b"\xff\xd8\xff\xe0", "image/jpeg").await.unwrap_err();
        assert!(matches!(err, DiagramError::Upstream { .. } | DiagramError::Timeout { .. }));

        // Embedded graphs never reach the service.
        let g = reader.read(GRAPH.as_bytes(), "application/json").await.unwrap();
        assert_eq!(g.nodes.len(), 2);
    }
}
