//! Variable paths into the render context
//!
//! Paths look like `@input.items[0]["display name"]`. The leading segment is a
//! context key; the rest walk objects and arrays. `?.` is accepted as an alias
//! of `.` since every lookup is already null-safe.

use crate::errors::ConfigurationError;
use crate::types::JsonValue;

/// Path segment type - either an integer index or a string key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl VarPath {
    /// Parse a path. Only the shape is checked; missing data is not an error.
    pub fn parse(raw: &str) -> Result<VarPath, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidPath {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        let chars: Vec<char> = trimmed.chars().collect();
        let mut segments = Vec::new();
        let mut pos = 0;

        let root = read_identifier(&chars, &mut pos);
        if root.is_empty() {
            return Err(invalid("missing root variable"));
        }
        segments.push(PathSegment::Key(root));

        while pos < chars.len() {
            match chars[pos] {
                '?' if chars.get(pos + 1) == Some(&'.') => {
                    pos += 1;
                }
                '.' => {
                    pos += 1;
                    let key = read_identifier(&chars, &mut pos);
                    if key.is_empty() {
                        return Err(invalid("empty property name"));
                    }
                    segments.push(PathSegment::Key(key));
                }
                '[' => {
                    pos += 1;
                    segments.push(read_bracket(&chars, &mut pos).map_err(invalid)?);
                }
                _ => return Err(invalid("unexpected character")),
            }
        }

        Ok(VarPath {
            raw: trimmed.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Root context key (e.g. `@input`)
    pub fn root(&self) -> &str {
        match self.segments.first() {
            Some(PathSegment::Key(key)) => key,
            _ => "",
        }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Walk the path; `None` when any segment is absent.
    pub fn lookup<'a>(&self, context: &'a JsonValue) -> Option<&'a JsonValue> {
        let mut current = context;
        for segment in &self.segments {
            current = match (segment, current) {
                (PathSegment::Key(key), JsonValue::Object(map)) => map.get(key)?,
                (PathSegment::Index(idx), JsonValue::Array(items)) => items.get(*idx)?,
                (PathSegment::Key(key), JsonValue::Array(items)) => {
                    items.get(key.parse::<usize>().ok()?)?
                }
                _ => return None,
            };
        }
        Some(current)
    }
}

fn read_identifier(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && !matches!(chars[*pos], '.' | '[' | ']' | '?') {
        *pos += 1;
    }
    chars[start..*pos].iter().collect::<String>().trim().to_string()
}

fn read_bracket(chars: &[char], pos: &mut usize) -> Result<PathSegment, &'static str> {
    let segment = match chars.get(*pos) {
        Some(&quote) if quote == '"' || quote == '\'' => {
            *pos += 1;
            let start = *pos;
            while *pos < chars.len() && chars[*pos] != quote {
                *pos += 1;
            }
            if *pos >= chars.len() {
                return Err("unterminated string in brackets");
            }
            let key: String = chars[start..*pos].iter().collect();
            *pos += 1;
            PathSegment::Key(key)
        }
        Some(_) => {
            let start = *pos;
            while *pos < chars.len() && chars[*pos] != ']' {
                *pos += 1;
            }
            let digits: String = chars[start..*pos].iter().collect();
            let index = digits
                .trim()
                .parse::<usize>()
                .map_err(|_| "bracket index must be a number or quoted string")?;
            PathSegment::Index(index)
        }
        None => return Err("unclosed bracket"),
    };

    if chars.get(*pos) != Some(&']') {
        return Err("unclosed bracket");
    }
    *pos += 1;
    Ok(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_dotted_and_bracket_segments() {
        let path = VarPath::parse(r#"@input.items[1]["display name"]"#).unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Key("@input".to_string()),
                PathSegment::Key("items".to_string()),
                PathSegment::Index(1),
                PathSegment::Key("display name".to_string()),
            ]
        );
        assert_eq!(path.root(), "@input");
    }

    #[test]
    fn test_optional_chaining_is_accepted() {
        let path = VarPath::parse("@input?.user?.name").unwrap();
        assert_eq!(path.segments().len(), 3);
    }

    #[test]
    fn test_malformed_paths_are_configuration_errors() {
        for raw in ["", "@input.", "@input[", "@input[abc]", "@input['x", "@a..b", "@a]"] {
            assert!(
                matches!(VarPath::parse(raw), Err(ConfigurationError::InvalidPath { .. })),
                "expected error for {raw:?}"
            );
        }
    }

    #[test]
    fn test_lookup_is_null_safe() {
        let ctx = json!({"@input": {"items": [{"name": "a"}, {"name": "b"}]}});

        let found = VarPath::parse("@input.items[1].name").unwrap();
        assert_eq!(found.lookup(&ctx), Some(&json!("b")));

        let missing = VarPath::parse("@input.items[5].name").unwrap();
        assert_eq!(missing.lookup(&ctx), None);

        let through_scalar = VarPath::parse("@input.items[0].name.first").unwrap();
        assert_eq!(through_scalar.lookup(&ctx), None);
    }
}
