//! Tokenizer for Terraform native syntax.

use crate::error::HclError;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Tok {
    Ident(String),
    Number(String),
    /// Decoded template text.
    Str(String),
    Heredoc(String),
    Punct(&'static str),
    Comment(String),
    Newline,
    Eof,
}

#[derive(Debug, Clone)]
pub(super) struct Token {
    pub tok: Tok,
    pub line: usize,
    pub column: usize,
}

const PUNCTS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "=>", "...", "{", "}", "[", "]", "(", ")", "=", ",",
    ".", ":", "?", "!", "*", "+", "-", "/", "%", "<", ">",
];

struct Lexer<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

pub(super) fn tokenize(text: &str) -> Result<Vec<Token>, HclError> {
    let mut lx = Lexer {
        src: text.as_bytes(),
        text,
        pos: 0,
        line: 1,
        column: 1,
    };
    let mut out = Vec::new();
    loop {
        let token = lx.next_token()?;
        let done = token.tok == Tok::Eof;
        out.push(token);
        if done {
            return Ok(out);
        }
    }
}

impl Lexer<'_> {
    fn err(&self, message: impl Into<String>) -> HclError {
        HclError {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.text[self.pos..].starts_with(s)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.text[self.pos..].chars().next()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn next_token(&mut self) -> Result<Token, HclError> {
        self.skip_space()?;
        let (line, column) = (self.line, self.column);
        let tok = match self.peek() {
            None => Tok::Eof,
            Some(b'\n') => {
                self.bump();
                Tok::Newline
            }
            Some(b'#') => {
                self.bump();
                Tok::Comment(self.rest_of_line())
            }
            Some(b'/') if self.peek_at(1) == Some(b'/') => {
                self.bump_n(2);
                Tok::Comment(self.rest_of_line())
            }
            Some(b'"') => {
                self.bump();
                Tok::Str(self.string_body()?)
            }
            Some(b'<') if self.starts_with("<<") && self.heredoc_ahead() => self.heredoc()?,
            Some(c) if c.is_ascii_digit() => Tok::Number(self.number()),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => Tok::Ident(self.ident()),
            Some(_) => {
                let Some(p) = PUNCTS.iter().find(|p| self.starts_with(p)) else {
                    return Err(self.err(format!(
                        "unexpected character '{}'",
                        self.text[self.pos..].chars().next().unwrap_or('?')
                    )));
                };
                self.bump_n(p.len());
                Tok::Punct(p)
            }
        };
        Ok(Token { tok, line, column })
    }

    fn skip_space(&mut self) -> Result<(), HclError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r') => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.bump_n(2);
                    loop {
                        if self.starts_with("*/") {
                            self.bump_n(2);
                            break;
                        }
                        if self.bump().is_none() {
                            return Err(self.err("unterminated block comment"));
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn rest_of_line(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'\n' {
                break;
            }
            self.bump();
        }
        let raw = self.text[start..self.pos].trim_end_matches('\r');
        raw.strip_prefix(' ').unwrap_or(raw).to_owned()
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'-' {
                self.bump();
            } else {
                break;
            }
        }
        self.text[start..self.pos].to_owned()
    }

    fn number(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some(b'+' | b'-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                self.bump_n(1 + sign);
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        self.text[start..self.pos].to_owned()
    }

    /// Body of a quoted template after the opening quote.
    fn string_body(&mut self) -> Result<String, HclError> {
        let mut out = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') => return Err(self.err("unterminated string")),
                Some(b'"') => {
                    self.bump();
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.bump();
                    let c = self.bump().ok_or_else(|| self.err("unterminated escape"))?;
                    match c {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        'u' => out.push(self.unicode_escape()?),
                        other => return Err(self.err(format!("invalid escape '\\{other}'"))),
                    }
                }
                Some(b'$' | b'%') if self.starts_with("$${") || self.starts_with("%%{") => {
                    out.push_str(&self.text[self.pos..self.pos + 3]);
                    self.bump_n(3);
                }
                Some(b'$' | b'%') if self.peek_at(1) == Some(b'{') => {
                    out.push_str(&self.interpolation()?);
                }
                Some(_) => {
                    if let Some(c) = self.bump() {
                        out.push(c);
                    }
                }
            }
        }
    }

    fn unicode_escape(&mut self) -> Result<char, HclError> {
        let end = self.pos + 4;
        let hex = self
            .text
            .get(self.pos..end)
            .ok_or_else(|| self.err("truncated unicode escape"))?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.err("invalid unicode escape"))?;
        self.bump_n(4);
        char::from_u32(code).ok_or_else(|| self.err("invalid unicode code point"))
    }

    /// Raw `${ ... }` text, honouring nested braces and quoted strings.
    fn interpolation(&mut self) -> Result<String, HclError> {
        let start = self.pos;
        self.bump_n(2);
        let mut depth = 1usize;
        let mut in_string = false;
        while depth > 0 {
            let c = self
                .bump()
                .ok_or_else(|| self.err("unterminated interpolation"))?;
            match c {
                '\\' if in_string => {
                    self.bump();
                }
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => depth -= 1,
                '\n' => return Err(self.err("newline in interpolation")),
                _ => {}
            }
        }
        Ok(self.text[start..self.pos].to_owned())
    }

    fn heredoc_ahead(&self) -> bool {
        let rest = &self.text[self.pos + 2..];
        let rest = rest.strip_prefix('-').unwrap_or(rest);
        rest.chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
    }

    fn heredoc(&mut self) -> Result<Tok, HclError> {
        self.bump_n(2);
        let indented = self.peek() == Some(b'-');
        if indented {
            self.bump();
        }
        let marker = self.ident();
        self.rest_of_line();
        if self.bump() != Some('\n') {
            return Err(self.err("expected newline after heredoc marker"));
        }

        let mut lines = Vec::new();
        loop {
            if self.peek().is_none() {
                return Err(self.err(format!("unterminated heredoc, expected {marker}")));
            }
            let line = self.rest_of_line_raw();
            if line.trim() == marker {
                break;
            }
            lines.push(line);
            self.bump();
        }

        if indented {
            let strip = lines
                .iter()
                .filter(|l| !l.trim().is_empty())
                .map(|l| l.len() - l.trim_start().len())
                .min()
                .unwrap_or(0);
            for line in &mut lines {
                *line = line.get(strip..).unwrap_or_default().to_owned();
            }
        }

        let mut content = lines.join("\n");
        if !lines.is_empty() {
            content.push('\n');
        }
        Ok(Tok::Heredoc(content))
    }

    fn rest_of_line_raw(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'\n' {
                break;
            }
            self.bump();
        }
        self.text[start..self.pos].trim_end_matches('\r').to_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<Tok> {
        tokenize(s).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn attribute_line() {
        assert_eq!(
            toks("count = 3 # three\n"),
            vec![
                Tok::Ident("count".to_owned()),
                Tok::Punct("="),
                Tok::Number("3".to_owned()),
                Tok::Comment("three".to_owned()),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn interpolation_keeps_nested_quotes() {
        assert_eq!(
            toks(r#""${lookup(var.tags, "Name")}-web""#),
            vec![
                Tok::Str(r#"${lookup(var.tags, "Name")}-web"#.to_owned()),
                Tok::Eof
            ]
        );
    }

    #[test]
    fn escapes_are_decoded() {
        assert_eq!(
            toks(r#""a\"b\n""#),
            vec![Tok::Str("a\"b\n".to_owned()), Tok::Eof]
        );
    }

    #[test]
    fn indented_heredoc() {
        let src = "policy = <<-EOT\n    {\n      \"a\": 1\n    }\n  EOT\n";
        let t = toks(src);
        assert_eq!(t[2], Tok::Heredoc("{\n  \"a\": 1\n}\n".to_owned()));
    }

    #[test]
    fn errors_carry_position() {
        let err = tokenize("a = \"open\n").unwrap_err();
        assert_eq!(err.line, 1);
        let err = tokenize("a = 1\nb = @").unwrap_err();
        assert_eq!((err.line, err.column), (2, 5));
    }
}
