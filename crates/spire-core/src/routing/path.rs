//! Path templates and typed path parameters.
//!
//! A pattern is a `/`-separated template whose segments are either literal
//! text or a parameter in braces:
//!
//! ```text
//! /users/{id:int}/posts/{slug}
//! /files/{rest:path}
//! ```
//!
//! Supported parameter types are `str` (the default), `int`, `float`, `uuid`
//! and `path`. A `path` parameter swallows the remainder of the request path and
//! must be the final segment.
//!
//! Trailing slashes are ignored and request segments are percent-decoded before
//! they are compared or coerced.

use std::fmt;

use percent_encoding::percent_decode_str;
use uuid::Uuid;

use crate::error::{RoutingError, RoutingResult, ValidationError};

/// Declared type of a path parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    /// Any single segment.
    Str,
    /// Signed 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// RFC 4122 UUID.
    Uuid,
    /// The rest of the path, one or more segments.
    Path,
}

impl ParamKind {
    /// Returns the type name used in patterns.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Uuid => "uuid",
            Self::Path => "path",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "str" => Some(Self::Str),
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "uuid" => Some(Self::Uuid),
            "path" => Some(Self::Path),
            _ => None,
        }
    }

    /// Coerces a decoded raw value into a typed [`ParamValue`].
    pub fn coerce(&self, name: &str, raw: &str) -> Result<ParamValue, ValidationError> {
        let invalid = || ValidationError::new(name, raw, self.as_str());
        match self {
            Self::Str => Ok(ParamValue::Str(raw.to_string())),
            Self::Path => Ok(ParamValue::Path(raw.to_string())),
            Self::Int => raw.parse().map(ParamValue::Int).map_err(|_| invalid()),
            Self::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(ParamValue::Float)
                .ok_or_else(invalid),
            Self::Uuid => Uuid::parse_str(raw).map(ParamValue::Uuid).map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single segment of a [`PathPattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text.
    Static(String),
    /// A named, typed parameter.
    Param {
        /// Parameter name.
        name: String,
        /// Declared type.
        kind: ParamKind,
    },
}

impl Segment {
    fn is_catch_all(&self) -> bool {
        matches!(
            self,
            Self::Param {
                kind: ParamKind::Path,
                ..
            }
        )
    }
}

/// A parsed, immutable path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parses a pattern such as `/users/{id:int}`.
    pub fn parse(pattern: &str) -> RoutingResult<Self> {
        if !pattern.starts_with('/') {
            return Err(RoutingError::invalid(pattern, "pattern must start with '/'"));
        }

        let mut segments = Vec::new();
        let mut names: Vec<&str> = Vec::new();
        let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();

        for (index, part) in parts.iter().enumerate() {
            let segment = if let Some(inner) = part.strip_prefix('{') {
                let inner = inner
                    .strip_suffix('}')
                    .ok_or_else(|| RoutingError::invalid(pattern, "unterminated parameter"))?;
                let (name, kind) = match inner.split_once(':') {
                    Some((name, kind)) => {
                        let kind = ParamKind::from_name(kind.trim()).ok_or_else(|| {
                            RoutingError::invalid(pattern, format!("unknown parameter type '{kind}'"))
                        })?;
                        (name.trim(), kind)
                    }
                    None => (inner.trim(), ParamKind::Str),
                };

                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(RoutingError::invalid(
                        pattern,
                        format!("invalid parameter name '{name}'"),
                    ));
                }
                if names.contains(&name) {
                    return Err(RoutingError::invalid(
                        pattern,
                        format!("parameter '{name}' declared twice"),
                    ));
                }
                if kind == ParamKind::Path && index + 1 != parts.len() {
                    return Err(RoutingError::invalid(
                        pattern,
                        "a 'path' parameter must be the last segment",
                    ));
                }
                names.push(name);

                Segment::Param {
                    name: name.to_string(),
                    kind,
                }
            } else {
                if part.contains(['{', '}']) {
                    return Err(RoutingError::invalid(
                        pattern,
                        format!("stray brace in segment '{part}'"),
                    ));
                }
                Segment::Static((*part).to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// The pattern as written at registration.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the pattern ends with a `path` parameter.
    pub fn has_catch_all(&self) -> bool {
        self.segments.last().is_some_and(Segment::is_catch_all)
    }

    /// Parameter declarations in order of appearance.
    pub fn params(&self) -> impl Iterator<Item = (&str, ParamKind)> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param { name, kind } => Some((name.as_str(), *kind)),
            Segment::Static(_) => None,
        })
    }

    /// Two patterns are equivalent when they match exactly the same paths
    /// and coerce parameters the same way; parameter names do not count.
    pub fn is_equivalent(&self, other: &PathPattern) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(a, b)| match (a, b) {
                    (Segment::Static(a), Segment::Static(b)) => a == b,
                    (Segment::Param { kind: a, .. }, Segment::Param { kind: b, .. }) => a == b,
                    _ => false,
                })
    }

    /// Coerces captured raw values (one per parameter, in order) into typed params.
    pub fn bind(&self, captures: &[String]) -> Result<PathParams, ValidationError> {
        let mut params = PathParams::default();
        for ((name, kind), raw) in self.params().zip(captures) {
            params.entries.push((name.to_string(), kind.coerce(name, raw)?));
        }
        Ok(params)
    }

    /// Renders a concrete path from parameter values. Returns `None` if a
    /// parameter is missing.
    pub fn render(&self, values: &[(&str, &str)]) -> Option<String> {
        if self.segments.is_empty() {
            return Some("/".to_string());
        }

        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            match segment {
                Segment::Static(text) => out.push_str(text),
                Segment::Param { name, .. } => {
                    let (_, value) = values.iter().find(|(n, _)| *n == name.as_str())?;
                    out.push_str(value.trim_matches('/'));
                }
            }
        }
        Some(out)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Splits a request path into percent-decoded segments, ignoring empty ones.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
        .collect()
}

// =============================================================================
// Parameter values
// =============================================================================

/// A coerced path parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// A `str` parameter.
    Str(String),
    /// An `int` parameter.
    Int(i64),
    /// A `float` parameter.
    Float(f64),
    /// A `uuid` parameter.
    Uuid(Uuid),
    /// A `path` parameter (segments joined by `/`).
    Path(String),
}

impl ParamValue {
    /// Returns the string form for `str` and `path` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::Path(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer for `int` values.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the float for `float` values.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the UUID for `uuid` values.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) | Self::Path(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Uuid(v) => write!(f, "{v}"),
        }
    }
}

/// Typed path parameters bound for a matched route, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathParams {
    entries: Vec<(String, ParamValue)>,
}

impl PathParams {
    /// Looks up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Number of bound parameters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no parameters were bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_segments() {
        let pattern = PathPattern::parse("/users/{id:int}/posts/{slug}/").unwrap();
        assert_eq!(pattern.segments().len(), 4);
        assert_eq!(
            pattern.params().collect::<Vec<_>>(),
            vec![("id", ParamKind::Int), ("slug", ParamKind::Str)]
        );
        assert!(!pattern.has_catch_all());
    }

    #[test]
    fn test_parse_rejects_bad_patterns() {
        tokio_test::assert_err!(PathPattern::parse("users"));
        tokio_test::assert_err!(PathPattern::parse("/users/{id"));
        tokio_test::assert_err!(PathPattern::parse("/users/{id:bool}"));
        tokio_test::assert_err!(PathPattern::parse("/a/{x}/{x}"));
        tokio_test::assert_err!(PathPattern::parse("/files/{rest:path}/tail"));
        tokio_test::assert_err!(PathPattern::parse("/a{b}"));
    }

    #[test]
    fn test_equivalence_ignores_names() {
        let a = PathPattern::parse("/users/{id:int}").unwrap();
        let b = PathPattern::parse("/users/{user_id:int}").unwrap();
        let c = PathPattern::parse("/users/{id}").unwrap();
        assert!(a.is_equivalent(&b));
        assert!(!a.is_equivalent(&c));
    }

    #[test]
    fn test_bind_coerces_types() {
        let pattern = PathPattern::parse("/items/{id:int}/{ratio:float}").unwrap();
        let params = pattern
            .bind(&["42".to_string(), "0.5".to_string()])
            .unwrap();
        assert_eq!(params.get("id").and_then(ParamValue::as_int), Some(42));
        assert_eq!(params.get("ratio").and_then(ParamValue::as_float), Some(0.5));
    }

    #[test]
    fn test_bind_reports_validation_error() {
        let pattern = PathPattern::parse("/items/{id:int}").unwrap();
        let err = pattern.bind(&["abc".to_string()]).unwrap_err();
        assert_eq!(err.parameter, "id");
        assert_eq!(err.value, "abc");
        assert_eq!(err.expected, "int");
    }

    #[test]
    fn test_uuid_param() {
        let pattern = PathPattern::parse("/rooms/{room:uuid}").unwrap();
        let id = "67e55044-10b1-426f-9247-bb680e5fe0c8";
        let params = pattern.bind(&[id.to_string()]).unwrap();
        assert_eq!(
            params.get("room").and_then(ParamValue::as_uuid),
            Uuid::parse_str(id).ok()
        );
        assert!(pattern.bind(&["not-a-uuid".to_string()]).is_err());
    }

    #[test]
    fn test_split_path_decodes() {
        assert_eq!(split_path("/a%20b//c/"), vec!["a b", "c"]);
        assert!(split_path("/").is_empty());
    }

    #[test]
    fn test_render() {
        let pattern = PathPattern::parse("/users/{id:int}/files/{rest:path}").unwrap();
        assert_eq!(
            pattern.render(&[("id", "7"), ("rest", "a/b.txt")]).as_deref(),
            Some("/users/7/files/a/b.txt")
        );
        assert_eq!(pattern.render(&[("id", "7")]), None);
        assert_eq!(PathPattern::parse("/").unwrap().render(&[]).as_deref(), Some("/"));
    }
}
