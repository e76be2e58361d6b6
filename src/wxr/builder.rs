//! Typed construction of XML documents and fragments.
//!
//! [`DocumentBuilder`] keeps a stack of open elements and refuses to finish
//! while anything is left open. Callers either pair [`open`](DocumentBuilder::open)
//! with [`close`](DocumentBuilder::close) or use the scoped
//! [`element`](DocumentBuilder::element) helper, which always closes what it opened.

use std::borrow::Cow;

use crate::error::{ConvertError, Result};

use super::writer::Writer;

/// How [`DocumentBuilder::text`] protects character data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    /// Replace `&`, `<` and `>` with entity references.
    Entities,
    /// Wrap in CDATA, splitting on any embedded `]]>`.
    Cdata,
}

#[derive(Debug)]
struct Frame {
    name: String,
    has_children: bool,
}

/// Open elements left over by [`DocumentBuilder::suspend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suspended {
    pub text: String,
    pub open: Vec<String>,
}

#[derive(Debug)]
pub struct DocumentBuilder {
    out: String,
    stack: Vec<Frame>,
    base_depth: usize,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop characters that XML 1.0 does not allow anywhere in a document.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    fn allowed(c: char) -> bool {
        match c {
            '\t' | '\n' | '\r' => true,
            c if (c as u32) < 0x20 => false,
            '\u{FFFE}' | '\u{FFFF}' => false,
            _ => true,
        }
    }
    if text.chars().all(allowed) {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(text.chars().filter(|c| allowed(*c)).collect())
    }
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in sanitize(text).chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

pub fn escape_attribute(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in sanitize(text).chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Render `text` as one or more adjacent CDATA sections.
///
/// Every `]]>` is split between two sections so the terminator never appears
/// inside one; a parser concatenating the sections yields the input back.
pub fn cdata_section(text: &str) -> String {
    let clean = sanitize(text);
    let mut out = String::with_capacity(clean.len() + 12);
    out.push_str("<![CDATA[");
    out.push_str(&clean.replace("]]>", "]]]]><![CDATA[>"));
    out.push_str("]]>");
    out
}

fn check_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.')
        || name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '<' | '>' | '&' | '"' | '\'' | '/' | '='));
    if bad {
        return Err(ConvertError::Structural(format!("invalid element name {name:?}")));
    }
    Ok(())
}

impl DocumentBuilder {
    /// Pretty-printed builder for a whole document.
    pub fn new() -> Self {
        Self::at_depth(0)
    }

    /// Pretty-printed builder whose output will be spliced in `depth` levels deep.
    pub fn at_depth(depth: usize) -> Self {
        Self {
            out: String::new(),
            stack: Vec::new(),
            base_depth: depth,
        }
    }

    /// Continue a document whose `open` elements were left by [`suspend`](Self::suspend).
    pub fn resume(open: Vec<String>) -> Self {
        let mut builder = Self::new();
        builder.stack = open
            .into_iter()
            .map(|name| Frame {
                name,
                has_children: true,
            })
            .collect();
        builder
    }

    pub fn depth(&self) -> usize {
        self.base_depth + self.stack.len()
    }

    fn break_line(&mut self, depth: usize) {
        if self.out.is_empty() && depth == 0 {
            return;
        }
        self.out.push('\n');
        for _ in 0..depth {
            self.out.push('\t');
        }
    }

    fn start_tag(&mut self, name: &str, attrs: &[(&str, &str)], empty: bool) -> Result<()> {
        check_name(name)?;
        for (key, _) in attrs {
            check_name(key)?;
        }
        if let Some(parent) = self.stack.last_mut() {
            parent.has_children = true;
        }
        let depth = self.depth();
        self.break_line(depth);
        self.out.push('<');
        self.out.push_str(name);
        for (key, value) in attrs {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            self.out.push_str(&escape_attribute(value));
            self.out.push('"');
        }
        self.out.push_str(if empty { "/>" } else { ">" });
        Ok(())
    }

    pub fn declaration(&mut self) -> Result<&mut Self> {
        if !self.out.is_empty() || !self.stack.is_empty() {
            return Err(ConvertError::Structural(
                "XML declaration must come first".into(),
            ));
        }
        self.out
            .push_str(r#"<?xml version="1.0" encoding="UTF-8" ?>"#);
        Ok(self)
    }

    pub fn open(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<&mut Self> {
        self.start_tag(name, attrs, false)?;
        self.stack.push(Frame {
            name: name.to_string(),
            has_children: false,
        });
        Ok(self)
    }

    /// Close the innermost open element and return its name.
    pub fn close(&mut self) -> Result<String> {
        let frame = self
            .stack
            .pop()
            .ok_or_else(|| ConvertError::Structural("close with no open element".into()))?;
        if frame.has_children {
            let depth = self.depth();
            self.break_line(depth);
        }
        self.out.push_str("</");
        self.out.push_str(&frame.name);
        self.out.push('>');
        Ok(frame.name)
    }

    /// Open `name`, run `body` inside it, then close it.
    pub fn element<F>(&mut self, name: &str, attrs: &[(&str, &str)], body: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.open(name, attrs)?;
        let level = self.stack.len();
        body(self)?;
        if self.stack.len() != level {
            return Err(ConvertError::Structural(format!(
                "<{name}> body left {} element(s) open",
                self.stack.len().saturating_sub(level)
            )));
        }
        self.close()?;
        Ok(self)
    }

    pub fn empty(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<&mut Self> {
        self.start_tag(name, attrs, true)?;
        Ok(self)
    }

    pub fn text(&mut self, value: &str, escape: Escape) -> Result<&mut Self> {
        if self.stack.is_empty() {
            return Err(ConvertError::Structural(
                "character data outside of an element".into(),
            ));
        }
        match escape {
            Escape::Entities => self.out.push_str(&escape_text(value)),
            Escape::Cdata => self.out.push_str(&cdata_section(value)),
        }
        Ok(self)
    }

    pub fn cdata(&mut self, value: &str) -> Result<&mut Self> {
        self.text(value, Escape::Cdata)
    }

    /// `<name>value</name>` with entity escaping.
    pub fn leaf(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        self.open(name, &[])?;
        self.text(value, Escape::Entities)?;
        self.close()?;
        Ok(self)
    }

    /// `<name><![CDATA[value]]></name>`.
    pub fn leaf_cdata(&mut self, name: &str, value: &str) -> Result<&mut Self> {
        self.open(name, &[])?;
        self.cdata(value)?;
        self.close()?;
        Ok(self)
    }

    /// Write everything built so far to `writer`, keeping open elements open.
    pub fn flush_to(&mut self, writer: &mut Writer) -> Result<()> {
        writer.write(&self.out)?;
        self.out.clear();
        Ok(())
    }

    /// Hand back the text and the names of elements still open.
    pub fn suspend(self) -> Suspended {
        Suspended {
            text: self.out,
            open: self.stack.into_iter().map(|f| f.name).collect(),
        }
    }

    /// Return the built text. Fails if any element is still open.
    pub fn finish(self) -> Result<String> {
        if !self.stack.is_empty() {
            let open: Vec<&str> = self.stack.iter().map(|f| f.name.as_str()).collect();
            return Err(ConvertError::Structural(format!(
                "finished with open elements: {}",
                open.join(" > ")
            )));
        }
        Ok(self.out)
    }
}
