use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing or combining object paths.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path must start with '/'")]
    NotAbsolute,
    #[error("empty path symbol")]
    EmptySymbol,
    #[error("invalid character in path symbol {0:?}")]
    BadSymbol(String),
}

/// Stable identifier of a graph object.
///
/// A path is `/` or a `/`-separated sequence of symbols, each matching
/// `[A-Za-z_][A-Za-z0-9_]*`. Paths order lexically, which keeps every
/// object's descendants contiguous after it in a sorted store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path(String);

impl Path {
    /// The root patch path, `/`.
    pub fn root() -> Self {
        Path("/".to_string())
    }

    pub fn new(s: impl Into<String>) -> Result<Self, PathError> {
        let s = s.into();
        if !s.starts_with('/') {
            return Err(PathError::NotAbsolute);
        }
        if s == "/" {
            return Ok(Path(s));
        }
        for symbol in s[1..].split('/') {
            check_symbol(symbol)?;
        }
        Ok(Path(s))
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final symbol of the path; empty for the root.
    pub fn symbol(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => "",
        }
    }

    /// Parent path; `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Path::root()),
            Some(idx) => Some(Path(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Child path under `self` with the given symbol.
    pub fn child(&self, symbol: &str) -> Result<Path, PathError> {
        check_symbol(symbol)?;
        if self.is_root() {
            Ok(Path(format!("/{symbol}")))
        } else {
            Ok(Path(format!("{}/{symbol}", self.0)))
        }
    }

    /// True if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        if self == other {
            return false;
        }
        if self.is_root() {
            return true;
        }
        other.0.starts_with(&self.0) && other.0.as_bytes().get(self.0.len()) == Some(&b'/')
    }

    pub fn is_parent_of(&self, other: &Path) -> bool {
        other.parent().as_ref() == Some(self)
    }

    /// Rewrites `self` by replacing the `old` prefix with `new`.
    ///
    /// Used when a subtree is renamed; `self` must equal `old` or descend
    /// from it.
    pub fn replace_prefix(&self, old: &Path, new: &Path) -> Path {
        if self == old {
            return new.clone();
        }
        debug_assert!(old.is_ancestor_of(self));
        let rest = if old.is_root() {
            &self.0[..]
        } else {
            &self.0[old.0.len()..]
        };
        if new.is_root() {
            Path(rest.to_string())
        } else {
            Path(format!("{}{}", new.0, rest))
        }
    }
}

fn check_symbol(symbol: &str) -> Result<(), PathError> {
    let mut chars = symbol.chars();
    match chars.next() {
        None => return Err(PathError::EmptySymbol),
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        Some(_) => return Err(PathError::BadSymbol(symbol.to_string())),
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(PathError::BadSymbol(symbol.to_string()))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::new(s)
    }
}

impl TryFrom<String> for Path {
    type Error = PathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Path::new(s)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> String {
        path.0
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_and_rejects() {
        assert!(Path::new("/").expect("root").is_root());
        let p = Path::new("/osc/out").expect("valid");
        assert_eq!(p.symbol(), "out");
        assert_eq!(p.parent(), Some(Path::new("/osc").expect("parent")));
        assert_eq!(Path::new("/osc").expect("p").parent(), Some(Path::root()));

        assert_eq!(Path::new("osc"), Err(PathError::NotAbsolute));
        assert!(Path::new("/9osc").is_err());
        assert!(Path::new("/a b").is_err());
        assert!(Path::new("/a//b").is_err());
        assert!(Path::new("/a/").is_err());
    }

    #[test]
    fn ancestry() {
        let root = Path::root();
        let a = Path::new("/a").expect("a");
        let ab = Path::new("/a/b").expect("ab");
        let abc = Path::new("/a/bc").expect("abc");
        assert!(root.is_ancestor_of(&a));
        assert!(a.is_ancestor_of(&ab));
        assert!(a.is_ancestor_of(&abc));
        assert!(!ab.is_ancestor_of(&a));
        assert!(!a.is_ancestor_of(&a));
        assert!(a.is_parent_of(&ab));
        assert!(!root.is_parent_of(&ab));
    }

    #[test]
    fn no_false_prefix_ancestry() {
        let a = Path::new("/a").expect("a");
        let ab = Path::new("/ab").expect("ab");
        assert!(!a.is_ancestor_of(&ab));
    }

    #[test]
    fn prefix_rewrite() {
        let old = Path::new("/p/a").expect("old");
        let new = Path::new("/p/b").expect("new");
        let port = Path::new("/p/a/out").expect("port");
        assert_eq!(port.replace_prefix(&old, &new).as_str(), "/p/b/out");
        assert_eq!(old.replace_prefix(&old, &new), new);
    }

    proptest! {
        #[test]
        fn child_then_parent_round_trips(sym in "[A-Za-z_][A-Za-z0-9_]{0,12}") {
            let base = Path::new("/p").expect("base");
            let child = base.child(&sym).expect("child");
            prop_assert_eq!(child.parent(), Some(base.clone()));
            prop_assert_eq!(child.symbol(), sym.as_str());
            prop_assert!(base.is_ancestor_of(&child));
        }
    }
}
