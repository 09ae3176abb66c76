//! Canonical renderer in `terraform fmt` style.
//!
//! Two-space indentation, `=` aligned across runs of consecutive single-line
//! attributes, and a blank line between blocks. Output parses back to an
//! equal [`Body`].

use std::fmt::Write as _;

use super::{Block, Body, Expr, Item, Step, is_identifier};

/// Render a document.
#[must_use]
pub fn render(body: &Body) -> String {
    let mut out = String::new();
    write_body(&mut out, body, 0);
    out
}

/// Render a single expression at top-level indentation.
#[must_use]
pub(crate) fn render_expr(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr, 0);
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_body(out: &mut String, body: &Body, depth: usize) {
    let mut prev: Option<&Item> = None;
    let mut i = 0;
    while i < body.items.len() {
        let item = &body.items[i];

        let needs_gap = match (prev, item) {
            (None, _) => false,
            (Some(Item::Block(_)), _) => true,
            (Some(Item::Attribute(_)), Item::Block(_) | Item::Comment(_)) => true,
            _ => false,
        };
        if needs_gap {
            out.push('\n');
        }

        match item {
            Item::Comment(text) => {
                indent(out, depth);
                if text.is_empty() {
                    out.push_str("#\n");
                } else {
                    let _ = writeln!(out, "# {}", text.replace(['\n', '\r'], " "));
                }
                i += 1;
            }
            Item::Block(block) => {
                write_block(out, block, depth);
                i += 1;
            }
            Item::Attribute(_) => {
                // A run of consecutive attributes shares one alignment column.
                let run_end = body.items[i..]
                    .iter()
                    .position(|it| !matches!(it, Item::Attribute(_)))
                    .map_or(body.items.len(), |n| i + n);
                let width = body.items[i..run_end]
                    .iter()
                    .filter_map(|it| match it {
                        Item::Attribute(a) if is_single_line(&a.value) => Some(key_text(&a.key).len()),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(0);
                for it in &body.items[i..run_end] {
                    if let Item::Attribute(a) = it {
                        indent(out, depth);
                        let key = key_text(&a.key);
                        out.push_str(&key);
                        if is_single_line(&a.value) {
                            for _ in key.len()..width {
                                out.push(' ');
                            }
                        }
                        out.push_str(" = ");
                        write_expr(out, &a.value, depth);
                        out.push('\n');
                    }
                }
                i = run_end;
            }
        }
        prev = body.items.get(i.saturating_sub(1));
    }
}

fn write_block(out: &mut String, block: &Block, depth: usize) {
    indent(out, depth);
    out.push_str(&block.kind);
    for label in &block.labels {
        out.push(' ');
        write_string(out, label);
    }
    if block.body.items.is_empty() {
        out.push_str(" {}\n");
        return;
    }
    out.push_str(" {\n");
    write_body(out, &block.body, depth + 1);
    indent(out, depth);
    out.push_str("}\n");
}

fn key_text(key: &str) -> String {
    if is_identifier(key) {
        key.to_owned()
    } else {
        let mut s = String::new();
        write_string(&mut s, key);
        s
    }
}

fn is_single_line(expr: &Expr) -> bool {
    match expr {
        Expr::Object(entries) => entries.is_empty(),
        Expr::Tuple(items) => items.iter().all(is_scalar),
        Expr::Call { args, .. } => args.iter().all(is_single_line),
        Expr::Unary { operand, .. } | Expr::Paren(operand) => is_single_line(operand),
        Expr::Binary { lhs, rhs, .. } => is_single_line(lhs) && is_single_line(rhs),
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => is_single_line(cond) && is_single_line(then) && is_single_line(otherwise),
        Expr::Null | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) | Expr::Traversal { .. } => {
            true
        }
    }
}

fn is_scalar(expr: &Expr) -> bool {
    !matches!(expr, Expr::Object(_) | Expr::Tuple(_)) && is_single_line(expr)
}

fn write_expr(out: &mut String, expr: &Expr, depth: usize) {
    match expr {
        Expr::Null => out.push_str("null"),
        Expr::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Expr::Number(n) => out.push_str(n),
        Expr::String(s) => write_string(out, s),
        Expr::Tuple(items) if items.iter().all(is_scalar) => {
            out.push('[');
            for (n, item) in items.iter().enumerate() {
                if n > 0 {
                    out.push_str(", ");
                }
                write_expr(out, item, depth);
            }
            out.push(']');
        }
        Expr::Tuple(items) => {
            out.push_str("[\n");
            for item in items {
                indent(out, depth + 1);
                write_expr(out, item, depth + 1);
                out.push_str(",\n");
            }
            indent(out, depth);
            out.push(']');
        }
        Expr::Object(entries) if entries.is_empty() => out.push_str("{}"),
        Expr::Object(entries) => {
            out.push_str("{\n");
            let width = entries
                .iter()
                .filter(|(_, v)| is_single_line(v))
                .map(|(k, _)| key_text(k).len())
                .max()
                .unwrap_or(0);
            for (key, value) in entries {
                indent(out, depth + 1);
                let key = key_text(key);
                out.push_str(&key);
                if is_single_line(value) {
                    for _ in key.len()..width {
                        out.push(' ');
                    }
                }
                out.push_str(" = ");
                write_expr(out, value, depth + 1);
                out.push('\n');
            }
            indent(out, depth);
            out.push('}');
        }
        Expr::Traversal { root, steps } => {
            out.push_str(root);
            for step in steps {
                match step {
                    Step::Attr(name) => {
                        out.push('.');
                        out.push_str(name);
                    }
                    Step::Index(index) => {
                        out.push('[');
                        write_expr(out, index, depth);
                        out.push(']');
                    }
                    Step::Splat => out.push_str("[*]"),
                }
            }
        }
        Expr::Call { name, args } => {
            out.push_str(name);
            out.push('(');
            for (n, arg) in args.iter().enumerate() {
                if n > 0 {
                    out.push_str(", ");
                }
                write_expr(out, arg, depth);
            }
            out.push(')');
        }
        Expr::Unary { op, operand } => {
            out.push_str(op);
            write_expr(out, operand, depth);
        }
        Expr::Binary { op, lhs, rhs } => {
            write_expr(out, lhs, depth);
            let _ = write!(out, " {op} ");
            write_expr(out, rhs, depth);
        }
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            write_expr(out, cond, depth);
            out.push_str(" ? ");
            write_expr(out, then, depth);
            out.push_str(" : ");
            write_expr(out, otherwise, depth);
        }
        Expr::Paren(inner) => {
            out.push('(');
            write_expr(out, inner, depth);
            out.push(')');
        }
    }
}

/// Quote a template, escaping literal text but not `${...}` sequences.
fn write_string(out: &mut String, s: &str) {
    out.push('"');
    let mut rest = s;
    while !rest.is_empty() {
        if let Some(len) = interpolation_len(rest) {
            out.push_str(&rest[..len]);
            rest = &rest[len..];
            continue;
        }
        let mut chars = rest.chars();
        let Some(c) = chars.next() else { break };
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
        rest = chars.as_str();
    }
    out.push('"');
}

/// Length of a complete `${...}`/`%{...}` (or escaped `$${`) at the start of `s`.
fn interpolation_len(s: &str) -> Option<usize> {
    if s.starts_with("$${") || s.starts_with("%%{") {
        return Some(3);
    }
    if !(s.starts_with("${") || s.starts_with("%{")) {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            '\n' => return None,
            _ => {}
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hcl::parse;

    #[test]
    fn aligns_and_spaces_like_terraform_fmt() {
        let mut vpc = Body::default();
        vpc.push_attr("cidr_block", Expr::str("10.0.0.0/16"));
        vpc.push_attr("enable_dns_hostnames", Expr::Bool(true));
        vpc.push_attr(
            "tags",
            Expr::Object(vec![("Name".to_owned(), Expr::str("main"))]),
        );

        let mut doc = Body::default();
        doc.push_comment("TODO: review");
        doc.push_block(Block::new("resource", &["aws_vpc", "main"], vpc));
        doc.push_block(Block::new("resource", &["aws_ebs_volume", "data"], Body::default()));

        let text = render(&doc);
        assert_eq!(
            text,
            "# TODO: review\n\
             resource \"aws_vpc\" \"main\" {\n  \
             cidr_block           = \"10.0.0.0/16\"\n  \
             enable_dns_hostnames = true\n  \
             tags = {\n    \
             Name = \"main\"\n  \
             }\n\
             }\n\
             \n\
             resource \"aws_ebs_volume\" \"data\" {}\n"
        );
        assert_eq!(parse(&text).unwrap(), doc);
    }

    #[test]
    fn strings_escape_literals_but_not_interpolations() {
        let mut out = String::new();
        write_string(&mut out, "say \"hi\"\n${lookup(var.m, \"k\")}");
        assert_eq!(out, r#""say \"hi\"\n${lookup(var.m, "k")}""#);
    }

    #[test]
    fn parse_render_is_stable() {
        let src = r#"resource "aws_iam_policy" "p" {
  name = "p-${var.env}"
  policy = jsonencode({
    Statement = [
      {
        Action = ["s3:GetObject"]
        Effect = "Allow"
      },
    ]
  })
  count = var.on ? 1 : 0
  ids   = aws_instance.web[*].id
}
"#;
        let first = parse(src).unwrap();
        let rendered = render(&first);
        let second = parse(&rendered).unwrap();
        assert_eq!(first, second);
        assert_eq!(render(&second), rendered);
    }
}
