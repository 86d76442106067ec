use std::collections::HashMap;

use thiserror::Error;

/// A request path didn't fit a template.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PathError {
    #[error("expected {expected} path segments, got {actual}")]
    SegmentCount { expected: usize, actual: usize },

    #[error("expected segment {expected:?}, got {actual:?}")]
    Literal { expected: String, actual: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Path pattern such as `/rooms/{room}/users/{user}`.
///
/// Segments are matched positionally, `{name}` segments capture whatever is in their place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        let raw = template.into();

        let segments = split_segments(&raw)
            .map(|segment| {
                match segment
                    .strip_prefix('{')
                    .and_then(|rest| rest.strip_suffix('}'))
                {
                    Some(name) => Segment::Param(name.to_string()),
                    None => Segment::Literal(segment.to_string()),
                }
            })
            .collect();

        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the template has no parameters, only matching one exact path.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// Match `path` against the template, capturing parameters.
    pub fn resolve(&self, path: &str) -> Result<PathParams, PathError> {
        let actual: Vec<&str> = split_segments(path).collect();

        if actual.len() != self.segments.len() {
            return Err(PathError::SegmentCount {
                expected: self.segments.len(),
                actual: actual.len(),
            });
        }

        let mut params = PathParams::default();
        for (segment, value) in self.segments.iter().zip(actual) {
            match segment {
                Segment::Literal(expected) if expected != value => {
                    return Err(PathError::Literal {
                        expected: expected.clone(),
                        actual: value.to_string(),
                    });
                }
                Segment::Literal(_) => {}
                Segment::Param(name) => {
                    params.values.insert(name.clone(), value.to_string());
                }
            }
        }

        Ok(params)
    }

    pub fn matches(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Parameters captured by a `PathTemplate`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    values: HashMap<String, String>,
}

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
