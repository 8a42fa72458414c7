//! Type-safe wrappers around git primitives.

use std::fmt;

use git2::Oid;

use crate::error::{Error, Result};

/// Identifier of a commit object.
///
/// The newtypes below make sure a blob id is never passed where a commit id
/// is expected. The inner `Oid` stays private to the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// Parse a commit id from its 40-character hex form.
    pub fn from_hex(hex: &str) -> Result<Self> {
        Ok(Self(Oid::from_str(hex)?))
    }

    /// Abbreviated hex form.
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a tree object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) Oid);

impl TreeId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// Parse a tree id from its 40-character hex form.
    pub fn from_hex(hex: &str) -> Result<Self> {
        Ok(Self(Oid::from_str(hex)?))
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author/committer identity used for every commit the library creates.
#[derive(Debug, Clone)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub(crate) fn to_git2(&self) -> Result<git2::Signature<'static>> {
        git2::Signature::now(&self.name, &self.email).map_err(Error::from)
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::new("packdb", "packdb@localhost")
    }
}
