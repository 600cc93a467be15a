//! Namespaced names for message types.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An immutable `(namespace, path)` pair.
///
/// Identifiers are the only name for a message type that is stable across
/// connections. Short IDs are a per-connection alias negotiated on top of
/// them.
///
/// Built-in Identifiers are `const`, so the strings are borrowed
/// (`Cow::Borrowed`). Identifiers read off the wire own their strings.
/// Equality and hashing compare the text either way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    namespace: Cow<'static, str>,
    path: Cow<'static, str>,
}

impl Identifier {
    /// Creates an Identifier from owned or borrowed parts.
    pub fn new(
        namespace: impl Into<Cow<'static, str>>,
        path: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            path: path.into(),
        }
    }

    /// Creates an Identifier in a `const` context.
    pub const fn from_static(namespace: &'static str, path: &'static str) -> Self {
        Self {
            namespace: Cow::Borrowed(namespace),
            path: Cow::Borrowed(path),
        }
    }

    /// The namespace half, e.g. `chipper` in `chipper:goodbye`.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The path half, e.g. `goodbye` in `chipper:goodbye`.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

/// Error returned when parsing `namespace:path` text fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identifier {0:?} must look like namespace:path")]
pub struct ParseIdentifierError(String);

impl FromStr for Identifier {
    type Err = ParseIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((ns, path)) if !ns.is_empty() && !path.is_empty() => {
                Ok(Self::new(ns.to_owned(), path.to_owned()))
            }
            _ => Err(ParseIdentifierError(s.to_owned())),
        }
    }
}
