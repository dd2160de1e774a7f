//! Reference naming.
//!
//! References live under `refs/heads/` (branches) and `refs/tags/` (tags).
//! Short names follow git-style rules:
//! - non-empty, no whitespace, `~`, `^`, `:`, `?`, `*`, `[`, `\`
//! - no `..` and no `@{`
//! - no leading or trailing `.` or `/`, no `.lock` suffix
//! - `/`-separated components are non-empty and do not start with `.`

use std::fmt;

use crate::error::{RefError, Result};

/// Prefix of branch references.
pub const BRANCH_PREFIX: &str = "refs/heads/";
/// Prefix of tag references.
pub const TAG_PREFIX: &str = "refs/tags/";

const FORBIDDEN_CHARS: &[char] = &[' ', '\t', '\n', '\r', '~', '^', ':', '?', '*', '[', '\\'];

/// Branch or tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefKind {
    Branch,
    Tag,
}

impl RefKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Branch => BRANCH_PREFIX,
            Self::Tag => TAG_PREFIX,
        }
    }
}

/// A validated, fully qualified reference name such as `refs/heads/main`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefName(String);

impl RefName {
    /// `refs/heads/<name>`.
    pub fn branch(name: &str) -> Result<Self> {
        Self::of(RefKind::Branch, name)
    }

    /// `refs/tags/<name>`.
    pub fn tag(name: &str) -> Result<Self> {
        Self::of(RefKind::Tag, name)
    }

    fn of(kind: RefKind, short: &str) -> Result<Self> {
        validate_short_name(short)?;
        Ok(Self(format!("{}{short}", kind.prefix())))
    }

    /// Parse a fully qualified name; a bare name is taken as a branch.
    pub fn parse(name: &str) -> Result<Self> {
        if let Some(short) = name.strip_prefix(BRANCH_PREFIX) {
            Self::branch(short)
        } else if let Some(short) = name.strip_prefix(TAG_PREFIX) {
            Self::tag(short)
        } else if name.starts_with("refs/") {
            Err(RefError::InvalidName {
                name: name.to_string(),
                reason: "unknown reference namespace".into(),
            })
        } else {
            Self::branch(name)
        }
    }

    pub fn kind(&self) -> RefKind {
        if self.0.starts_with(TAG_PREFIX) {
            RefKind::Tag
        } else {
            RefKind::Branch
        }
    }

    /// Name without the `refs/...` prefix.
    pub fn short_name(&self) -> &str {
        &self.0[self.kind().prefix().len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First naming rule `name` breaks, if any.
fn violation(name: &str) -> Option<String> {
    if name.is_empty() {
        return Some("name must not be empty".into());
    }
    if let Some(ch) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Some(format!("contains forbidden character: {ch:?}"));
    }
    for (pattern, reason) in [
        ("..", "must not contain '..'"),
        ("@{", "must not contain '@{'"),
        ("//", "must not contain '//'"),
    ] {
        if name.contains(pattern) {
            return Some(reason.into());
        }
    }
    if name.starts_with(['.', '/']) || name.ends_with(['.', '/']) {
        return Some("must not start or end with '.' or '/'".into());
    }
    if name.ends_with(".lock") {
        return Some("must not end with '.lock'".into());
    }
    name.split('/')
        .find(|component| component.starts_with('.'))
        .map(|component| format!("component must not start with '.': {component:?}"))
}

/// Validate a branch or tag short name.
pub fn validate_short_name(name: &str) -> Result<()> {
    match violation(name) {
        Some(reason) => Err(RefError::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
