// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Binding paths.
//!
//! A path string is compiled once into a list of [`PathStep`]s and cached per
//! distinct string. Supported forms:
//!
//! - members: `A.B.C`
//! - attached members: `(Grid.Row)`, `(Type.Member)[0].(Type2.Member2)`
//! - indexers: `Children[0]`, `Map[key]`, `[0]` on the root itself
//! - whitespace around every token
//!
//! The empty path and `.` bind to the root object itself.

use std::fmt;
use std::rc::Rc;

use hashbrown::HashMap;
use thiserror::Error;

use crate::source::IndexKey;

/// One compiled step of a [`PropertyPath`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathStep {
    /// `Member`.
    Member(Rc<str>),
    /// `(Owner.Member)`; on elements this names a registered property.
    Attached {
        /// Owner type name.
        owner: Rc<str>,
        /// Member name.
        member: Rc<str>,
    },
    /// `[key]`.
    Index(IndexKey),
}

impl PathStep {
    /// Member name a source reports when this step's value changes.
    #[must_use]
    pub fn member_name(&self) -> &str {
        match self {
            Self::Member(name) | Self::Attached { member: name, .. } => name,
            Self::Index(_) => crate::source::INDEXER_MEMBER,
        }
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member(name) => f.write_str(name),
            Self::Attached { owner, member } => write!(f, "({owner}.{member})"),
            Self::Index(key) => write!(f, "[{key}]"),
        }
    }
}

/// A path did not parse.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid binding path `{path}` at {position}: {reason}")]
pub struct PathError {
    /// The path as written.
    pub path: String,
    /// Byte offset of the problem.
    pub position: usize,
    /// What was expected.
    pub reason: &'static str,
}

/// A compiled binding path.
///
/// ```rust
/// use trellis_ui::{PathStep, PropertyPath};
///
/// let path = PropertyPath::parse(" Owner . (Grid.Row) [ 2 ] ").unwrap();
/// assert_eq!(path.len(), 3);
/// assert_eq!(path.to_string(), "Owner.(Grid.Row)[2]");
/// assert!(matches!(path.steps()[1], PathStep::Attached { .. }));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PropertyPath {
    steps: Vec<PathStep>,
}

impl PropertyPath {
    /// Compiles `text`.
    pub fn parse(text: &str) -> Result<Self, PathError> {
        Parser {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        }
        .parse()
    }

    /// The steps, root first.
    #[must_use]
    #[inline]
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// Number of steps.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` for the path that binds to the root itself.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.steps.is_empty() {
            return f.write_str(".");
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 && !matches!(step, PathStep::Index(_)) {
                f.write_str(".")?;
            }
            fmt::Display::fmt(step, f)?;
        }
        Ok(())
    }
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &'static str) -> PathError {
        PathError {
            path: self.text.to_owned(),
            position: self.pos,
            reason,
        }
    }

    fn skip_ws(&mut self) {
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<Rc<str>, PathError> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_' || !b.is_ascii())
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error("expected a member name"));
        }
        Ok(Rc::from(&self.text[start..self.pos]))
    }

    fn indexer(&mut self) -> Result<PathStep, PathError> {
        let start = self.pos;
        let Some(len) = self.text[start..].find(']') else {
            return Err(self.error("unterminated indexer"));
        };
        let raw = self.text[start..start + len].trim();
        if raw.is_empty() {
            return Err(self.error("empty indexer"));
        }
        if raw.contains(',') {
            return Err(self.error("indexers take a single argument"));
        }
        self.pos = start + len + 1;
        let key = match raw.parse::<i64>() {
            Ok(i) => IndexKey::Int(i),
            Err(_) => IndexKey::Str(Rc::from(raw)),
        };
        Ok(PathStep::Index(key))
    }

    fn attached(&mut self) -> Result<PathStep, PathError> {
        let first = self.ident()?;
        let step = if self.eat(b'.') {
            let member = self.ident()?;
            PathStep::Attached {
                owner: first,
                member,
            }
        } else {
            PathStep::Member(first)
        };
        if !self.eat(b')') {
            return Err(self.error("expected `)`"));
        }
        Ok(step)
    }

    fn segment(&mut self, steps: &mut Vec<PathStep>) -> Result<(), PathError> {
        self.skip_ws();
        if self.eat(b'(') {
            steps.push(self.attached()?);
        } else {
            steps.push(PathStep::Member(self.ident()?));
        }
        while self.eat(b'[') {
            steps.push(self.indexer()?);
        }
        Ok(())
    }

    fn parse(mut self) -> Result<PropertyPath, PathError> {
        let mut steps = Vec::new();
        self.skip_ws();
        if self.peek().is_none() {
            return Ok(PropertyPath { steps });
        }
        if self.eat(b'.') {
            self.skip_ws();
            if self.peek().is_none() {
                return Ok(PropertyPath { steps });
            }
            return Err(self.error("unexpected `.`"));
        }
        if self.peek() == Some(b'[') {
            while self.eat(b'[') {
                steps.push(self.indexer()?);
            }
        } else {
            self.segment(&mut steps)?;
        }
        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(b'.') => {
                    self.pos += 1;
                    self.segment(&mut steps)?;
                }
                Some(_) => return Err(self.error("expected `.` or `[`")),
            }
        }
        Ok(PropertyPath { steps })
    }
}

/// Compiled paths keyed by their source text.
#[derive(Debug, Default)]
pub(crate) struct PathCache {
    paths: HashMap<Rc<str>, Rc<PropertyPath>>,
}

impl PathCache {
    pub(crate) fn get_or_parse(&mut self, text: &str) -> Result<Rc<PropertyPath>, PathError> {
        if let Some(path) = self.paths.get(text) {
            return Ok(path.clone());
        }
        let path = Rc::new(PropertyPath::parse(text)?);
        self.paths.insert(Rc::from(text), path.clone());
        Ok(path)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.paths.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str) -> PathStep {
        PathStep::Member(Rc::from(name))
    }

    #[test]
    fn nested_members() {
        let path = PropertyPath::parse("A.B.C").unwrap();
        assert_eq!(path.steps(), &[member("A"), member("B"), member("C")]);
    }

    #[test]
    fn empty_and_dot_bind_to_root() {
        assert!(PropertyPath::parse("").unwrap().is_empty());
        assert!(PropertyPath::parse("  .  ").unwrap().is_empty());
    }

    #[test]
    fn indexers_int_and_string() {
        let path = PropertyPath::parse("Children[0].Map[ key ]").unwrap();
        assert_eq!(
            path.steps(),
            &[
                member("Children"),
                PathStep::Index(IndexKey::Int(0)),
                member("Map"),
                PathStep::Index(IndexKey::Str(Rc::from("key"))),
            ]
        );
    }

    #[test]
    fn parenthesized_owner_chain() {
        let path = PropertyPath::parse("(Type.Member)[0].(Type2.Member2)").unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(
            path.steps()[2],
            PathStep::Attached {
                owner: Rc::from("Type2"),
                member: Rc::from("Member2"),
            }
        );
        assert_eq!(path.to_string(), "(Type.Member)[0].(Type2.Member2)");
    }

    #[test]
    fn whitespace_is_tolerated() {
        let path = PropertyPath::parse("  Node . Right [ 1 ]  ").unwrap();
        assert_eq!(path.to_string(), "Node.Right[1]");
    }

    #[test]
    fn leading_indexer() {
        let path = PropertyPath::parse("[2].Name").unwrap();
        assert_eq!(path.steps()[0], PathStep::Index(IndexKey::Int(2)));
    }

    #[test]
    fn malformed_paths_report_position() {
        let err = PropertyPath::parse("A..B").unwrap_err();
        assert_eq!(err.position, 2);
        assert!(PropertyPath::parse("A[0").is_err());
        assert!(PropertyPath::parse("(A.B").is_err());
        assert!(PropertyPath::parse("A B").is_err());
        assert!(PropertyPath::parse("A[1,2]").is_err());
    }

    #[test]
    fn indexer_needs_a_member_after_a_dot() {
        let err = PropertyPath::parse("A.[0]").unwrap_err();
        assert_eq!(err.position, 2);
        assert_eq!(err.reason, "expected a member name");
        assert!(PropertyPath::parse("A . [0]").is_err());
        assert!(PropertyPath::parse("A.B[0]").is_ok());
    }

    #[test]
    fn cache_shares_compiled_paths() {
        let mut cache = PathCache::default();
        let a = cache.get_or_parse("A.B").unwrap();
        let b = cache.get_or_parse("A.B").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }
}
