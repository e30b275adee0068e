//! Format-preserving model of an env-style document.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

use crate::tokenizer::tokenize;

/// Quoting style of an entry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    None,
    Single,
    Double,
    Backtick,
}

/// A `KEY=VALUE` assignment together with the text around its value.
///
/// `prefix + literal + suffix` is the entry's raw text. The literal is the
/// value exactly as written after the separator, quotes and escapes included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub(crate) key: String,
    pub(crate) value: String,
    pub(crate) quote: Quote,
    pub(crate) exported: bool,
    pub(crate) prefix: String,
    pub(crate) literal: String,
    pub(crate) suffix: String,
}

impl Entry {
    /// Variable name.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Value with quotes removed and escapes applied.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Quoting style of the value.
    pub fn quote(&self) -> Quote {
        self.quote
    }

    /// Whether the line starts with `export`.
    pub fn is_exported(&self) -> bool {
        self.exported
    }

    /// Value text as written.
    pub fn literal(&self) -> &str {
        &self.literal
    }

    /// Text before the value: indentation, `export`, key and separator.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Text after the value: trailing blanks, comment and line break.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Raw text of the entry.
    pub fn raw(&self) -> String {
        self.render_with(&self.literal)
    }

    /// Raw text of the entry with its literal replaced.
    pub fn render_with(&self, literal: &str) -> String {
        let mut out = String::with_capacity(self.prefix.len() + literal.len() + self.suffix.len());
        out.push_str(&self.prefix);
        out.push_str(literal);
        out.push_str(&self.suffix);
        out
    }
}

/// One unit of a document. Every variant keeps its raw text, line break included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Comment(String),
    Blank(String),
    Entry(Entry),
    /// A line matching no known grammar, kept verbatim.
    Unrecognized(String),
}

impl Block {
    /// Raw text of the block.
    pub fn raw(&self) -> Cow<'_, str> {
        match self {
            Block::Comment(raw) | Block::Blank(raw) | Block::Unrecognized(raw) => {
                Cow::Borrowed(raw)
            }
            Block::Entry(entry) => Cow::Owned(entry.raw()),
        }
    }
}

/// Ordered blocks of an env-style document.
///
/// Concatenating the raw text of all blocks reproduces the parsed input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    blocks: Vec<Block>,
}

impl Document {
    /// Tokenize `text`. Never fails; unknown lines become `Unrecognized` blocks.
    pub fn parse(text: &str) -> Self {
        Self {
            blocks: tokenize(text),
        }
    }

    /// All blocks in document order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// All entries in document order, duplicates included.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.blocks.iter().filter_map(|block| match block {
            Block::Entry(entry) => Some(entry),
            _ => None,
        })
    }

    /// Look up a key; the last occurrence wins.
    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries().filter(|entry| entry.key == key).last()
    }

    /// Distinct keys in order of first appearance.
    pub fn keys(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.entries()
            .map(Entry::key)
            .filter(|key| seen.insert(*key))
            .collect()
    }

    /// Raw text of lines that matched no grammar.
    pub fn unrecognized(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|block| match block {
            Block::Unrecognized(raw) => Some(raw.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            f.write_str(&block.raw())?;
        }
        Ok(())
    }
}
