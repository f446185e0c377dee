//! Minimal XML element support for command payloads
//!
//! Command bodies carry a single element tree of the form
//! `<Command Name="..." Status="..."><Response .../></Command>`: attributes,
//! nested elements and character data, nothing more. This module implements
//! exactly that grammar (plus declarations and comments on input) in the
//! same hand-written style as the wire codecs; a full XML library would be
//! far more machinery than the protocol uses.

use std::fmt;

/// One parsed XML element: name, attributes, children and character data
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    /// Element name
    pub name: String,
    /// Attributes in document order
    pub attributes: Vec<(String, String)>,
    /// Nested elements in document order
    pub children: Vec<XmlElement>,
    /// Concatenated character data, surrounding whitespace trimmed
    pub text: String,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        XmlElement {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Value of an attribute, if present
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set or replace an attribute
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.attributes.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.attributes.push((name, value));
        }
    }

    pub fn add_child(&mut self, child: XmlElement) {
        self.children.push(child);
    }

    /// Nested element by index
    pub fn child(&self, index: usize) -> Option<&XmlElement> {
        self.children.get(index)
    }
}

fn escape(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

impl fmt::Display for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for (name, value) in &self.attributes {
            let mut escaped = String::new();
            escape(value, &mut escaped);
            write!(f, " {name}=\"{escaped}\"")?;
        }
        if self.children.is_empty() && self.text.is_empty() {
            return write!(f, "/>");
        }
        write!(f, ">")?;
        if !self.text.is_empty() {
            let mut escaped = String::new();
            escape(&self.text, &mut escaped);
            write!(f, "{escaped}")?;
        }
        for child in &self.children {
            write!(f, "{child}")?;
        }
        write!(f, "</{}>", self.name)
    }
}

/// Parse a document holding one root element
///
/// Returns `None` when the text is not well-formed under the supported
/// grammar; callers treat that as "not XML", never as a fatal error.
pub fn parse(text: &str) -> Option<XmlElement> {
    let mut parser = Parser {
        input: text.as_bytes(),
        pos: 0,
    };
    parser.skip_misc();
    let root = parser.parse_element()?;
    parser.skip_misc();
    if parser.pos != parser.input.len() {
        return None; // trailing garbage
    }
    Some(root)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.input[self.pos..].starts_with(prefix.as_bytes())
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.pos += 1;
        }
    }

    /// Skip whitespace, `<?...?>` declarations and `<!--...-->` comments
    fn skip_misc(&mut self) {
        loop {
            self.skip_whitespace();
            if self.starts_with("<?") {
                match self.input[self.pos..]
                    .windows(2)
                    .position(|w| w == b"?>")
                {
                    Some(offset) => self.pos += offset + 2,
                    None => {
                        self.pos = self.input.len();
                        return;
                    }
                }
            } else if self.starts_with("<!--") {
                match self.input[self.pos..]
                    .windows(3)
                    .position(|w| w == b"-->")
                {
                    Some(offset) => self.pos += offset + 3,
                    None => {
                        self.pos = self.input.len();
                        return;
                    }
                }
            } else {
                return;
            }
        }
    }

    fn parse_name(&mut self) -> Option<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':' | b'.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return None;
        }
        Some(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
    }

    fn parse_quoted(&mut self) -> Option<String> {
        let quote = self.peek()?;
        if quote != b'"' && quote != b'\'' {
            return None;
        }
        self.pos += 1;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == quote {
                let raw = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
                self.pos += 1;
                return Some(unescape(&raw));
            }
            self.pos += 1;
        }
        None // unterminated
    }

    fn parse_element(&mut self) -> Option<XmlElement> {
        if self.peek()? != b'<' {
            return None;
        }
        self.pos += 1;
        let name = self.parse_name()?;
        let mut element = XmlElement::new(name);

        loop {
            self.skip_whitespace();
            match self.peek()? {
                b'/' => {
                    self.pos += 1;
                    if self.peek()? != b'>' {
                        return None;
                    }
                    self.pos += 1;
                    return Some(element);
                }
                b'>' => {
                    self.pos += 1;
                    return self.parse_content(element);
                }
                _ => {
                    let attr_name = self.parse_name()?;
                    self.skip_whitespace();
                    if self.peek()? != b'=' {
                        return None;
                    }
                    self.pos += 1;
                    self.skip_whitespace();
                    let value = self.parse_quoted()?;
                    element.attributes.push((attr_name, value));
                }
            }
        }
    }

    fn parse_content(&mut self, mut element: XmlElement) -> Option<XmlElement> {
        let mut text = String::new();
        loop {
            if self.starts_with("</") {
                self.pos += 2;
                let close = self.parse_name()?;
                if close != element.name {
                    return None; // mismatched close tag
                }
                self.skip_whitespace();
                if self.peek()? != b'>' {
                    return None;
                }
                self.pos += 1;
                element.text = text.trim().to_owned();
                return Some(element);
            } else if self.starts_with("<!--") {
                self.skip_misc();
            } else if self.peek()? == b'<' {
                element.children.push(self.parse_element()?);
            } else {
                let start = self.pos;
                while let Some(b) = self.peek() {
                    if b == b'<' {
                        break;
                    }
                    self.pos += 1;
                }
                if self.pos == self.input.len() {
                    return None; // unterminated element
                }
                text.push_str(&unescape(&String::from_utf8_lossy(
                    &self.input[start..self.pos],
                )));
            }
        }
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let replaced = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .iter()
        .find(|(entity, _)| rest.starts_with(entity));
        match replaced {
            Some((entity, ch)) => {
                out.push(*ch);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
