//! Lenient HTML tree builder
//!
//! Handles what authored templates contain: elements, attributes (quoted,
//! unquoted, valueless), void elements, raw-text elements, comments and
//! doctypes. Mismatched end tags close up to the nearest open match and
//! stray end tags are dropped; elements still open at EOF are closed.

use std::fmt;

use super::dom::{is_void, Document, Element, NodeId, NodeKind, RAW_TEXT_ELEMENTS};
use super::escape::unescape;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub position: usize,
    pub details: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.details, self.position)
    }
}

impl std::error::Error for ParseError {}

impl Document {
    /// Parse a document or fragment
    pub fn parse(input: &str) -> Result<Document, ParseError> {
        TreeBuilder::new(input).run()
    }
}

struct TreeBuilder<'a> {
    src: &'a str,
    pos: usize,
    doc: Document,
    open: Vec<NodeId>,
}

impl<'a> TreeBuilder<'a> {
    fn new(src: &'a str) -> Self {
        let doc = Document::new();
        let root = doc.root();
        Self {
            src,
            pos: 0,
            doc,
            open: vec![root],
        }
    }

    fn current(&self) -> NodeId {
        *self.open.last().unwrap_or(&0)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn error(&self, details: impl Into<String>) -> ParseError {
        ParseError {
            position: self.pos,
            details: details.into(),
        }
    }

    fn run(mut self) -> Result<Document, ParseError> {
        while self.pos < self.src.len() {
            let rest = self.rest();
            if rest.starts_with("<!--") {
                self.comment()?;
            } else if rest.starts_with("<!") {
                self.doctype()?;
            } else if rest.starts_with("</") {
                self.end_tag()?;
            } else if rest.starts_with('<')
                && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic())
            {
                self.start_tag()?;
            } else {
                self.text();
            }
        }
        Ok(self.doc)
    }

    fn text(&mut self) {
        let rest = self.rest();
        // A lone '<' that does not open a tag is text
        let skip = usize::from(rest.starts_with('<'));
        let len = rest[skip..].find('<').map(|i| i + skip).unwrap_or(rest.len());
        let text = &rest[..len];
        let parent = self.current();
        self.doc.append(parent, NodeKind::Text(text.to_string()));
        self.pos += len;
    }

    fn comment(&mut self) -> Result<(), ParseError> {
        let body_start = self.pos + 4;
        let end = self.src[body_start..]
            .find("-->")
            .ok_or_else(|| self.error("unterminated comment"))?;
        let body = &self.src[body_start..body_start + end];
        let parent = self.current();
        self.doc.append(parent, NodeKind::Comment(body.to_string()));
        self.pos = body_start + end + 3;
        Ok(())
    }

    fn doctype(&mut self) -> Result<(), ParseError> {
        let end = self
            .rest()
            .find('>')
            .ok_or_else(|| self.error("unterminated declaration"))?;
        let body = &self.rest()[2..end];
        let parent = self.current();
        self.doc.append(parent, NodeKind::Doctype(body.to_string()));
        self.pos += end + 1;
        Ok(())
    }

    fn end_tag(&mut self) -> Result<(), ParseError> {
        let end = self
            .rest()
            .find('>')
            .ok_or_else(|| self.error("unterminated end tag"))?;
        let name = self.rest()[2..end].trim().to_ascii_lowercase();
        self.pos += end + 1;
        if let Some(depth) = self
            .open
            .iter()
            .rposition(|id| self.doc.tag(*id) == Some(name.as_str()))
        {
            self.open.truncate(depth);
        }
        Ok(())
    }

    fn start_tag(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;
        let name = self.take_while(|c| !c.is_whitespace() && c != '>' && c != '/');
        let mut element = Element::new(name.to_ascii_lowercase());
        let mut self_closing = false;

        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                self.pos = start;
                return Err(self.error(format!("unterminated <{}> tag", element.name)));
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                self_closing = true;
                break;
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break;
            }
            if rest.starts_with('/') {
                self.pos += 1;
                continue;
            }
            let (k, v) = self.attribute();
            if !k.is_empty() && element.attr(&k).is_none() {
                element.attrs.push((k, v));
            }
        }

        let name = element.name.clone();
        let parent = self.current();
        let id = self.doc.append(parent, NodeKind::Element(element));
        if self_closing || is_void(&name) {
            return Ok(());
        }
        if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            return self.raw_text(id, &name);
        }
        self.open.push(id);
        Ok(())
    }

    fn raw_text(&mut self, id: NodeId, name: &str) -> Result<(), ParseError> {
        let close = format!("</{}", name);
        let rest = self.rest();
        let lower = rest.to_ascii_lowercase();
        let end = lower
            .find(&close)
            .ok_or_else(|| self.error(format!("unclosed <{}> element", name)))?;
        if end > 0 {
            self.doc.append(id, NodeKind::Text(rest[..end].to_string()));
        }
        self.pos += end;
        let gt = self
            .rest()
            .find('>')
            .ok_or_else(|| self.error("unterminated end tag"))?;
        self.pos += gt + 1;
        Ok(())
    }

    fn attribute(&mut self) -> (String, String) {
        let name = self
            .take_while(|c| !c.is_whitespace() && c != '=' && c != '>' && c != '/')
            .to_ascii_lowercase();
        if name.is_empty() {
            // Skip one unexpected character so the loop always advances
            if let Some(c) = self.rest().chars().next() {
                self.pos += c.len_utf8();
            }
            return (name, String::new());
        }
        self.skip_whitespace();
        if !self.rest().starts_with('=') {
            return (name, String::new());
        }
        self.pos += 1;
        self.skip_whitespace();
        let value = match self.rest().chars().next() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                let v = self.take_while(|c| c != q);
                if !self.rest().is_empty() {
                    self.pos += 1;
                }
                v
            }
            _ => self.take_while(|c| !c.is_whitespace() && c != '>'),
        };
        (name, unescape(value))
    }

    fn take_while<F>(&mut self, pred: F) -> &'a str
    where
        F: Fn(char) -> bool,
    {
        let rest = self.rest();
        let len = rest.find(|c: char| !pred(c)).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn skip_whitespace(&mut self) {
        self.take_while(char::is_whitespace);
    }
}
