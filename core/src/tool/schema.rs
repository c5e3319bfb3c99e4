//! Tool input schemas and validation
//!
//! Each tool declares its recognized parameters with type and constraint
//! information. Validation runs before every execution; failures are
//! permanent errors naming the offending parameter.

use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ClassifiedError;

use super::value::{ToolInput, ToolValue};

/// Parameter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    Path,
    Regex,
}

/// What a path parameter is expected to point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    File,
    Directory,
    Any,
}

/// Constraints for one recognized parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name
    pub name: String,
    /// Parameter type
    pub ty: ParamType,
    /// Whether the parameter must be present
    pub required: bool,
    /// Brief description, surfaced in tool schemas sent to the model
    pub description: String,
    /// Minimum string length
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Maximum string length
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Minimum integer value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    /// Maximum integer value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
    /// Closed set of allowed string values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    /// Regex the string value must match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Path-kind constraint for Path parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_kind: Option<PathKind>,
    /// Whether a Path parameter must already exist
    #[serde(default)]
    pub must_exist: bool,
}

impl ParamSpec {
    /// New parameter spec with no extra constraints
    pub fn new(
        name: impl Into<String>,
        ty: ParamType,
        required: bool,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            required,
            description: description.into(),
            min_length: None,
            max_length: None,
            min_value: None,
            max_value: None,
            allowed_values: None,
            pattern: None,
            path_kind: None,
            must_exist: false,
        }
    }

    /// Constrain string length
    pub fn with_length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    /// Constrain integer range
    pub fn with_range(mut self, min: i64, max: i64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    /// Restrict to an allowed-value set
    pub fn with_allowed(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_values = Some(values.into_iter().map(|v| v.into()).collect());
        self
    }

    /// Require the value to match a regex
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Set path-kind for Path parameters
    pub fn with_path_kind(mut self, kind: PathKind) -> Self {
        self.path_kind = Some(kind);
        self
    }

    /// Require a Path parameter to exist
    pub fn must_exist(mut self) -> Self {
        self.must_exist = true;
        self
    }
}

/// Complete input schema for a tool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputSchema {
    /// Recognized parameters, in declaration order
    pub params: Vec<ParamSpec>,
}

impl InputSchema {
    /// New empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter spec
    pub fn with_param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Look up a parameter by name
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Validate an input map against this schema
    ///
    /// Path parameters are tilde-expanded and cleaned in place, so the
    /// tool body always sees absolute-friendly, `..`-free paths.
    pub fn validate(&self, input: &mut ToolInput) -> Result<(), ClassifiedError> {
        for spec in &self.params {
            let value = match input.get(&spec.name) {
                Some(v) => v.clone(),
                None if spec.required => {
                    return Err(ClassifiedError::permanent(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )));
                }
                None => continue,
            };

            match spec.ty {
                ParamType::String | ParamType::Regex | ParamType::Path => {
                    let s = value.as_str().ok_or_else(|| {
                        ClassifiedError::permanent(format!(
                            "parameter '{}' must be a string, got {}",
                            spec.name,
                            value.type_name()
                        ))
                    })?;
                    self.validate_string(spec, s)?;

                    if spec.ty == ParamType::Regex {
                        Regex::new(s).map_err(|e| {
                            ClassifiedError::permanent(format!(
                                "parameter '{}' is not a valid regex: {}",
                                spec.name, e
                            ))
                        })?;
                    }

                    if spec.ty == ParamType::Path {
                        let expanded = expand_path(s).map_err(|e| {
                            ClassifiedError::permanent(format!(
                                "parameter '{}': {}",
                                spec.name, e
                            ))
                        })?;
                        self.validate_path(spec, &expanded)?;
                        input.insert(
                            spec.name.clone(),
                            ToolValue::String(expanded.to_string_lossy().into_owned()),
                        );
                    }
                }
                ParamType::Integer => {
                    let i = value.as_i64().ok_or_else(|| {
                        ClassifiedError::permanent(format!(
                            "parameter '{}' must be an integer, got {}",
                            spec.name,
                            value.type_name()
                        ))
                    })?;
                    if let Some(min) = spec.min_value {
                        if i < min {
                            return Err(ClassifiedError::permanent(format!(
                                "parameter '{}' below minimum {} (got {})",
                                spec.name, min, i
                            )));
                        }
                    }
                    if let Some(max) = spec.max_value {
                        if i > max {
                            return Err(ClassifiedError::permanent(format!(
                                "parameter '{}' above maximum {} (got {})",
                                spec.name, max, i
                            )));
                        }
                    }
                }
                ParamType::Boolean => {
                    if value.as_bool().is_none() {
                        return Err(ClassifiedError::permanent(format!(
                            "parameter '{}' must be a boolean, got {}",
                            spec.name,
                            value.type_name()
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    fn validate_string(&self, spec: &ParamSpec, s: &str) -> Result<(), ClassifiedError> {
        if let Some(min) = spec.min_length {
            if s.len() < min {
                return Err(ClassifiedError::permanent(format!(
                    "parameter '{}' shorter than {} characters",
                    spec.name, min
                )));
            }
        }
        if let Some(max) = spec.max_length {
            if s.len() > max {
                return Err(ClassifiedError::permanent(format!(
                    "parameter '{}' longer than {} characters",
                    spec.name, max
                )));
            }
        }
        if let Some(allowed) = &spec.allowed_values {
            if !allowed.iter().any(|a| a == s) {
                return Err(ClassifiedError::permanent(format!(
                    "parameter '{}' must be one of [{}], got '{}'",
                    spec.name,
                    allowed.join(", "),
                    s
                )));
            }
        }
        if let Some(pattern) = &spec.pattern {
            let re = Regex::new(pattern).map_err(|e| {
                ClassifiedError::permanent(format!(
                    "schema pattern for '{}' is invalid: {}",
                    spec.name, e
                ))
            })?;
            if !re.is_match(s) {
                return Err(ClassifiedError::permanent(format!(
                    "parameter '{}' does not match pattern '{}'",
                    spec.name, pattern
                )));
            }
        }
        Ok(())
    }

    fn validate_path(&self, spec: &ParamSpec, path: &Path) -> Result<(), ClassifiedError> {
        if spec.must_exist && !path.exists() {
            return Err(ClassifiedError::permanent(format!(
                "parameter '{}': path does not exist: {}",
                spec.name,
                path.display()
            )));
        }
        if path.exists() {
            match spec.path_kind {
                Some(PathKind::File) if !path.is_file() => {
                    return Err(ClassifiedError::permanent(format!(
                        "parameter '{}': not a file: {}",
                        spec.name,
                        path.display()
                    )));
                }
                Some(PathKind::Directory) if !path.is_dir() => {
                    return Err(ClassifiedError::permanent(format!(
                        "parameter '{}': not a directory: {}",
                        spec.name,
                        path.display()
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Expand a leading tilde and lexically clean the path
///
/// `~`, `~/` and `~/.` all yield the home directory. Any other `~x`
/// prefix is a malformed path. Expansion is idempotent:
/// `expand(expand(p)) == expand(p)`.
pub fn expand_path(raw: &str) -> Result<PathBuf, ClassifiedError> {
    let expanded = if let Some(rest) = raw.strip_prefix('~') {
        let home = dirs::home_dir()
            .ok_or_else(|| ClassifiedError::permanent("home directory not resolvable"))?;
        if rest.is_empty() || rest == "/" || rest == "/." {
            home
        } else if let Some(tail) = rest.strip_prefix('/') {
            home.join(tail)
        } else {
            return Err(ClassifiedError::permanent(format!(
                "malformed path '{}': '~' must be followed by '/'",
                raw
            )));
        }
    } else {
        PathBuf::from(raw)
    };

    Ok(clean_path(&expanded))
}

/// Lexically normalize a path, eliminating `.` and `..` components
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    // Above the root or a relative head: drop the component
                }
            }
            other => cleaned.push(other),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::value::input_from_json;
    use serde_json::json;

    fn sample_schema() -> InputSchema {
        InputSchema::new()
            .with_param(ParamSpec::new("path", ParamType::Path, true, "target file"))
            .with_param(
                ParamSpec::new("limit", ParamType::Integer, false, "line limit")
                    .with_range(1, 1000),
            )
            .with_param(
                ParamSpec::new("mode", ParamType::String, false, "read mode")
                    .with_allowed(["full", "head"]),
            )
    }

    #[test]
    fn test_valid_input_passes() {
        let schema = sample_schema();
        let mut input = input_from_json(json!({"path": "src/main.rs", "limit": 10}));
        assert!(schema.validate(&mut input).is_ok());
    }

    #[test]
    fn test_missing_required_names_parameter() {
        let schema = sample_schema();
        let mut input = input_from_json(json!({"limit": 10}));
        let err = schema.validate(&mut input).unwrap_err();
        assert!(err.message.contains("'path'"));
    }

    #[test]
    fn test_wrong_type_names_parameter() {
        let schema = sample_schema();
        let mut input = input_from_json(json!({"path": "x", "limit": "ten"}));
        let err = schema.validate(&mut input).unwrap_err();
        assert!(err.message.contains("'limit'"));
        assert!(err.message.contains("integer"));
    }

    #[test]
    fn test_range_violation() {
        let schema = sample_schema();
        let mut input = input_from_json(json!({"path": "x", "limit": 5000}));
        let err = schema.validate(&mut input).unwrap_err();
        assert!(err.message.contains("maximum"));
    }

    #[test]
    fn test_allowed_values() {
        let schema = sample_schema();
        let mut input = input_from_json(json!({"path": "x", "mode": "tail"}));
        let err = schema.validate(&mut input).unwrap_err();
        assert!(err.message.contains("one of"));
    }

    #[test]
    fn test_invalid_regex_param() {
        let schema = InputSchema::new()
            .with_param(ParamSpec::new("pattern", ParamType::Regex, true, "search"));
        let mut input = input_from_json(json!({"pattern": "(unclosed"}));
        let err = schema.validate(&mut input).unwrap_err();
        assert!(err.message.contains("valid regex"));
    }

    #[test]
    fn test_tilde_expands_to_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_path("~").unwrap(), home);
        assert_eq!(expand_path("~/").unwrap(), home);
        assert_eq!(expand_path("~/.").unwrap(), home);
        assert_eq!(expand_path("~/projects").unwrap(), home.join("projects"));
    }

    #[test]
    fn test_malformed_tilde() {
        assert!(expand_path("~x").is_err());
        assert!(expand_path("~user/file").is_err());
    }

    #[test]
    fn test_expansion_idempotent() {
        for raw in ["~/projects/a.rs", "/tmp/x/../y", "rel/./path"] {
            let once = expand_path(raw).unwrap();
            let twice = expand_path(&once.to_string_lossy()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_clean_removes_parent_components() {
        assert_eq!(
            clean_path(Path::new("/a/b/../c")),
            PathBuf::from("/a/c")
        );
        assert_eq!(clean_path(Path::new("/a/./b")), PathBuf::from("/a/b"));
        assert_eq!(clean_path(Path::new("a/../..")), PathBuf::from("."));
    }

    #[test]
    fn test_path_param_is_cleaned_in_place() {
        let schema = InputSchema::new()
            .with_param(ParamSpec::new("path", ParamType::Path, true, "target"));
        let mut input = input_from_json(json!({"path": "/work/src/../main.rs"}));
        schema.validate(&mut input).unwrap();
        assert_eq!(input["path"].as_str(), Some("/work/main.rs"));
    }
}
