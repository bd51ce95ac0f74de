//! Structural paths into a state tree.
//!
//! A path is written `/a/b/c`. A segment spelled `-name-` is a parameter: a
//! placeholder standing for "any identifier at this position". Name segments
//! are percent-decoded when parsed and percent-encoded when rendered, so
//! identifiers containing `/` or a leading `-` survive a round trip.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PathError, Result};
use crate::identifier::Identifier;

/// One step of a [`Path`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// A field name or a concrete entry identifier.
    Name(String),
    /// A placeholder matching any identifier at this position.
    Parameter(String),
}

impl Segment {
    /// Create a name segment.
    pub fn name(name: impl Into<String>) -> Self {
        Segment::Name(name.into())
    }

    /// Create a parameter segment. `name` excludes the surrounding dashes.
    pub fn parameter(name: impl Into<String>) -> Self {
        Segment::Parameter(name.into())
    }

    /// Returns `true` for parameter segments.
    pub fn is_parameter(&self) -> bool {
        matches!(self, Segment::Parameter(_))
    }

    /// The name, if this is a name segment.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Segment::Name(n) => Some(n),
            Segment::Parameter(_) => None,
        }
    }

    fn encoded(&self) -> String {
        match self {
            Segment::Name(n) => encode_segment(n),
            Segment::Parameter(p) => format!("-{p}-"),
        }
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::Name(s.to_owned())
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::Name(s)
    }
}

impl From<&Identifier> for Segment {
    fn from(id: &Identifier) -> Self {
        Segment::Name(id.as_str().to_owned())
    }
}

impl From<Identifier> for Segment {
    fn from(id: Identifier) -> Self {
        Segment::Name(id.into())
    }
}

/// An immutable ordered sequence of [`Segment`]s.
///
/// Two paths are equal iff their segment sequences are equal. The empty path
/// addresses the root.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Path(Vec<Segment>);

impl Path {
    /// The root path `/`.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    /// Build a path of name segments.
    pub fn of<S: AsRef<str>>(names: &[S]) -> Self {
        Self(names.iter().map(|n| Segment::name(n.as_ref())).collect())
    }

    /// Parse a path string such as `/targets/-target-/name`.
    pub fn parse(text: &str) -> Result<Self> {
        let body = text.strip_prefix('/').ok_or_else(|| PathError::InvalidSyntax {
            path: text.to_owned(),
            reason: "path must start with '/'".into(),
        })?;
        if body.is_empty() {
            return Ok(Self::root());
        }
        let body = body.strip_suffix('/').unwrap_or(body);
        let mut segments = Vec::new();
        for raw in body.split('/') {
            if raw.is_empty() {
                return Err(PathError::InvalidSyntax {
                    path: text.to_owned(),
                    reason: "empty segment".into(),
                });
            }
            if raw.len() >= 3 && raw.starts_with('-') && raw.ends_with('-') {
                let name = &raw[1..raw.len() - 1];
                if name.contains('-') {
                    return Err(PathError::InvalidSyntax {
                        path: text.to_owned(),
                        reason: format!("parameter name {name:?} may not contain '-'"),
                    });
                }
                segments.push(Segment::Parameter(name.to_owned()));
            } else if raw.starts_with('-') {
                return Err(PathError::InvalidSyntax {
                    path: text.to_owned(),
                    reason: format!("malformed parameter {raw:?}"),
                });
            } else {
                let decoded = decode_segment(raw).ok_or_else(|| PathError::InvalidSyntax {
                    path: text.to_owned(),
                    reason: format!("bad percent-encoding in {raw:?}"),
                })?;
                segments.push(Segment::Name(decoded));
            }
        }
        Ok(Self(segments))
    }

    /// All segments, root first.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` for the root path.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The final segment, if any.
    pub fn last_segment(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// Append a single segment.
    pub fn then(&self, segment: impl Into<Segment>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Append every segment of `suffix`.
    pub fn then_path(&self, suffix: &Path) -> Self {
        let mut segments = self.0.clone();
        segments.extend(suffix.0.iter().cloned());
        Self(segments)
    }

    /// The enclosing path, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Drop the final `count` segments.
    pub fn truncated_by(&self, count: usize) -> Result<Self> {
        if count > self.0.len() {
            return Err(PathError::TruncateBeyondRoot {
                path: self.to_string(),
                count,
            });
        }
        Ok(Self(self.0[..self.0.len() - count].to_vec()))
    }

    /// Keep only the first `len` segments.
    pub fn truncated_to(&self, len: usize) -> Self {
        Self(self.0[..len.min(self.0.len())].to_vec())
    }

    /// Returns `true` if any segment is a parameter.
    pub fn is_parameterized(&self) -> bool {
        self.0.iter().any(Segment::is_parameter)
    }

    /// Number of parameter segments.
    pub fn parameter_count(&self) -> usize {
        self.0.iter().filter(|s| s.is_parameter()).count()
    }

    /// Names of the parameters, in order.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter_map(|s| match s {
                Segment::Parameter(p) => Some(p.as_str()),
                Segment::Name(_) => None,
            })
            .collect()
    }

    /// Replace parameters left-to-right with the given identifiers.
    ///
    /// The number of identifiers must equal the number of parameters.
    pub fn bound_to(&self, ids: &[Identifier]) -> Result<Self> {
        let expected = self.parameter_count();
        if ids.len() != expected {
            return Err(PathError::ParameterCount {
                path: self.to_string(),
                expected,
                actual: ids.len(),
            });
        }
        let mut values = ids.iter();
        let segments = self
            .0
            .iter()
            .map(|s| match s {
                Segment::Parameter(_) => values
                    .next()
                    .map(Segment::from)
                    .unwrap_or_else(|| s.clone()),
                Segment::Name(_) => s.clone(),
            })
            .collect();
        Ok(Self(segments))
    }

    /// Returns `true` if this path has the same length as `pattern` and each
    /// segment is equal to the pattern's, or the pattern has a parameter there.
    pub fn matches(&self, pattern: &Path) -> bool {
        self.0.len() == pattern.0.len()
            && self
                .0
                .iter()
                .zip(&pattern.0)
                .all(|(mine, theirs)| theirs.is_parameter() || mine == theirs)
    }

    /// The identifiers this path supplies for each of `pattern`'s parameters.
    ///
    /// Returns `None` if the path does not match the pattern, or supplies a
    /// parameter where the pattern expects one.
    pub fn parameter_values(&self, pattern: &Path) -> Option<Vec<Identifier>> {
        if !self.matches(pattern) {
            return None;
        }
        let mut values = Vec::new();
        for (mine, theirs) in self.0.iter().zip(&pattern.0) {
            if theirs.is_parameter() {
                let name = mine.as_name()?;
                values.push(Identifier::new(name).ok()?);
            }
        }
        Some(values)
    }

    /// Returns `true` if this path is a (non-strict) prefix of `other`.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }

    /// Render as a percent-encoded path string.
    pub fn url_encoded(&self) -> String {
        if self.0.is_empty() {
            return "/".into();
        }
        let mut out = String::new();
        for seg in &self.0 {
            out.push('/');
            out.push_str(&seg.encoded());
        }
        out
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url_encoded())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({})", self.url_encoded())
    }
}

impl TryFrom<String> for Path {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self> {
        Path::parse(&value)
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.url_encoded()
    }
}

impl std::str::FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self> {
        Path::parse(s)
    }
}

fn encode_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || matches!(byte, b'.' | b'_' | b'~')
            || (byte == b'-' && i != 0 && i + 1 != name.len());
        if keep {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_segment(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = raw.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_root() {
        assert_eq!(Path::parse("/").unwrap(), Path::root());
        assert!(Path::root().is_root());
        assert_eq!(Path::root().to_string(), "/");
    }

    #[test]
    fn parse_names_and_parameters() {
        let path = Path::parse("/targets/-target-/name").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::name("targets"),
                Segment::parameter("target"),
                Segment::name("name"),
            ]
        );
        assert!(path.is_parameterized());
        assert_eq!(path.parameter_names(), vec!["target"]);
    }

    #[test]
    fn parse_rejects_bad_syntax() {
        assert!(Path::parse("targets").is_err());
        assert!(Path::parse("/a//b").is_err());
        assert!(Path::parse("/-bad").is_err());
        assert!(Path::parse("/a/%zz").is_err());
    }

    #[test]
    fn identifiers_with_slashes_round_trip() {
        let path = Path::root().then("targets").then(Identifier::from("a/b"));
        let text = path.to_string();
        assert_eq!(text, "/targets/a%2Fb");
        assert_eq!(Path::parse(&text).unwrap(), path);
    }

    #[test]
    fn leading_dash_identifier_is_not_a_parameter() {
        let path = Path::root().then("-x-");
        let reparsed = Path::parse(&path.to_string()).unwrap();
        assert_eq!(reparsed, path);
        assert!(!reparsed.is_parameterized());
    }

    #[test]
    fn bound_to_replaces_parameters_in_order() {
        let pattern = Path::parse("/a/-x-/b/-y-").unwrap();
        let bound = pattern
            .bound_to(&[Identifier::from("one"), Identifier::from("two")])
            .unwrap();
        assert_eq!(bound, Path::parse("/a/one/b/two").unwrap());
        assert!(matches!(
            pattern.bound_to(&[Identifier::from("one")]),
            Err(PathError::ParameterCount { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn matches_and_parameter_values() {
        let pattern = Path::parse("/targets/-target-").unwrap();
        let concrete = Path::parse("/targets/world").unwrap();
        assert!(concrete.matches(&pattern));
        assert_eq!(
            concrete.parameter_values(&pattern),
            Some(vec![Identifier::from("world")])
        );
        assert!(!Path::parse("/other/world").unwrap().matches(&pattern));
        assert!(!Path::parse("/targets").unwrap().matches(&pattern));
    }

    #[test]
    fn truncation() {
        let path = Path::parse("/a/b/c").unwrap();
        assert_eq!(path.truncated_by(1).unwrap(), Path::parse("/a/b").unwrap());
        assert_eq!(path.truncated_by(3).unwrap(), Path::root());
        assert!(path.truncated_by(4).is_err());
        assert_eq!(path.truncated_to(1), Path::parse("/a").unwrap());
        assert_eq!(path.parent().unwrap(), Path::parse("/a/b").unwrap());
        assert!(Path::root().parent().is_none());
    }

    #[test]
    fn prefix_relation() {
        let a = Path::parse("/a").unwrap();
        let abc = Path::parse("/a/b/c").unwrap();
        assert!(a.is_prefix_of(&abc));
        assert!(abc.is_prefix_of(&abc));
        assert!(!abc.is_prefix_of(&a));
        assert!(Path::root().is_prefix_of(&a));
    }

    #[test]
    fn serde_uses_string_form() {
        let path = Path::parse("/targets/-target-").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/targets/-target-\"");
        assert_eq!(serde_json::from_str::<Path>(&json).unwrap(), path);
    }

    proptest! {
        #[test]
        fn name_paths_round_trip_through_text(names in prop::collection::vec("[^\\x00]{1,12}", 0..6)) {
            let path = Path::of(&names);
            let reparsed = Path::parse(&path.url_encoded()).unwrap();
            prop_assert_eq!(reparsed, path);
        }
    }
}
