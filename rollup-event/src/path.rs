// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt, str::FromStr};

/// A parsed path to a (possibly nested) field of an [`Event`](crate::Event).
///
/// Paths use a JSON-pointer-like syntax: segments are separated by `/` and a
/// leading `/` is optional, so `"/http/status"` and `"http/status"` address the
/// same field. Inside a segment, `~1` stands for a literal `/` and `~0` for a
/// literal `~`.
///
/// Segments may only contain ASCII letters, digits and `.`, `-`, `_`, `@`, `[`,
/// `]`. Anything else is rejected when the path is parsed, so a malformed path
/// is always caught at configuration time rather than when an event is read.
///
/// ```
/// use rollup_event::FieldPath;
///
/// let path: FieldPath = "/a/b~1c".parse().unwrap();
/// assert_eq!(path.segments().collect::<Vec<_>>(), ["a", "b/c"]);
/// assert_eq!(path.to_string(), "/a/b~1c");
///
/// assert!("a//b".parse::<FieldPath>().is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Box<[String]>,
}

impl FieldPath {
    /// Parse a field path, see the type-level docs for the syntax.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        if trimmed.is_empty() {
            return Err(PathError::new(path, PathErrorKind::Empty));
        }

        let segments = trimmed
            .split('/')
            .map(|segment| parse_segment(path, segment))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            segments: segments.into_boxed_slice(),
        })
    }

    /// The decoded segments of this path, outermost first.
    pub fn segments(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.segments.iter().map(String::as_str)
    }

    /// The innermost segment, i.e. the name of the field itself.
    pub fn leaf(&self) -> &str {
        // parse() never produces an empty path
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    pub(crate) fn split_leaf(&self) -> Option<(&String, &[String])> {
        self.segments.split_last()
    }
}

fn parse_segment(path: &str, segment: &str) -> Result<String, PathError> {
    if segment.is_empty() {
        return Err(PathError::new(path, PathErrorKind::EmptySegment));
    }

    let mut decoded = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        match c {
            '~' => match chars.next() {
                Some('0') => decoded.push('~'),
                Some('1') => decoded.push('/'),
                _ => return Err(PathError::new(path, PathErrorKind::InvalidEscape)),
            },
            c if is_allowed(c) => decoded.push(c),
            c => return Err(PathError::new(path, PathErrorKind::InvalidCharacter(c))),
        }
    }
    Ok(decoded)
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@' | '[' | ']')
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for FieldPath {
    type Error = PathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in self.segments.iter() {
            f.write_str("/")?;
            for c in segment.chars() {
                match c {
                    '~' => f.write_str("~0")?,
                    '/' => f.write_str("~1")?,
                    c => fmt::Write::write_char(f, c)?,
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({self})")
    }
}

/// The reason a [`FieldPath`] could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PathErrorKind {
    /// The path has no segments at all (`""` or `"/"`).
    Empty,
    /// Two separators with nothing between them, or a trailing separator.
    EmptySegment,
    /// A `~` that is not followed by `0` or `1`.
    InvalidEscape,
    /// A character that is not allowed in a segment.
    InvalidCharacter(char),
}

/// Error returned when a [`FieldPath`] is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathError {
    path: String,
    kind: PathErrorKind,
}

impl PathError {
    fn new(path: &str, kind: PathErrorKind) -> Self {
        Self {
            path: path.to_owned(),
            kind,
        }
    }

    /// The path text that failed to parse.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Why the path failed to parse.
    pub fn kind(&self) -> PathErrorKind {
        self.kind
    }
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid field path `{}`: ", self.path)?;
        match self.kind {
            PathErrorKind::Empty => f.write_str("path is empty"),
            PathErrorKind::EmptySegment => f.write_str("path contains an empty segment"),
            PathErrorKind::InvalidEscape => f.write_str("`~` must be followed by `0` or `1`"),
            PathErrorKind::InvalidCharacter(c) => write!(f, "character {c:?} is not allowed"),
        }
    }
}

impl std::error::Error for PathError {}

#[cfg(test)]
mod tests {
    use assert2::check;
    use rstest::rstest;

    use super::{FieldPath, PathErrorKind};

    #[rstest]
    #[case("status", &["status"])]
    #[case("/status", &["status"])]
    #[case("/http/response/status", &["http", "response", "status"])]
    #[case("aggr._count", &["aggr._count"])]
    #[case("tags[0]/@timestamp", &["tags[0]", "@timestamp"])]
    #[case("/a~1b/c~0d", &["a/b", "c~d"])]
    fn parses_valid_paths(#[case] input: &str, #[case] expected: &[&str]) {
        let path = FieldPath::parse(input).unwrap();
        check!(path.segments().collect::<Vec<_>>() == expected);
    }

    #[rstest]
    #[case("", PathErrorKind::Empty)]
    #[case("/", PathErrorKind::Empty)]
    #[case("a//b", PathErrorKind::EmptySegment)]
    #[case("a/b/", PathErrorKind::EmptySegment)]
    #[case("a~2", PathErrorKind::InvalidEscape)]
    #[case("a~", PathErrorKind::InvalidEscape)]
    #[case("with space", PathErrorKind::InvalidCharacter(' '))]
    #[case("a/b*", PathErrorKind::InvalidCharacter('*'))]
    fn rejects_malformed_paths(#[case] input: &str, #[case] kind: PathErrorKind) {
        let err = FieldPath::parse(input).unwrap_err();
        check!(err.kind() == kind);
        check!(err.path() == input);
    }

    #[test]
    fn leading_slash_is_optional() {
        check!(FieldPath::parse("/a/b").unwrap() == FieldPath::parse("a/b").unwrap());
    }

    #[test]
    fn display_round_trips_escapes() {
        let path = FieldPath::parse("x~1y/z").unwrap();
        check!(path.to_string() == "/x~1y/z");
        check!(path.to_string().parse::<FieldPath>().unwrap() == path);
        check!(path.leaf() == "z");
    }

    #[test]
    fn error_message_names_the_path() {
        let err = FieldPath::parse("a b").unwrap_err();
        check!(err.to_string() == "invalid field path `a b`: character ' ' is not allowed");
    }
}
