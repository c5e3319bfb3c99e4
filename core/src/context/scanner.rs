//! Project scanner
//!
//! Detects language and framework from manifest files, builds the file
//! tree under a merged ignore list, and extracts surface-level metadata
//! per file with regex rules. No real parser involved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClassifiedError;

/// Detected project language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Go,
    JavaScript,
    TypeScript,
    Python,
    Rust,
    Java,
    Unknown,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::Unknown => "unknown",
        }
    }
}

/// Surface-level metadata for one scanned file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Path relative to the project root
    pub path: String,
    /// Line count
    pub lines: usize,
    /// Imported modules/crates
    pub imports: Vec<String>,
    /// Exported symbols
    pub exports: Vec<String>,
    /// Function names
    pub functions: Vec<String>,
    /// Class/type names
    pub classes: Vec<String>,
    /// Looks like a test file
    pub is_test: bool,
    /// Looks like configuration
    pub is_config: bool,
    /// Looks like documentation
    pub is_doc: bool,
}

/// One node of the scanned file tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNode {
    /// Entry name
    pub name: String,
    /// Path relative to the project root
    pub path: String,
    /// Whether this is a directory
    pub is_dir: bool,
    /// Children, for directories
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
}

/// Complete scan result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    /// Detected language
    pub language: Language,
    /// Build-system tag for Java projects (maven/gradle)
    pub build_system: Option<String>,
    /// Detected framework, when any
    pub framework: Option<String>,
    /// Declared dependencies found in the manifest
    pub dependencies: Vec<String>,
    /// File tree rooted at the project root
    pub tree: Vec<FileNode>,
    /// Per-file metadata, keyed by relative path
    pub files: HashMap<String, FileMetadata>,
}

/// Directory and file patterns never included in a scan
const DEFAULT_IGNORES: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
];

const FRAMEWORK_MARKERS: &[&str] = &[
    "gin", "echo", "fiber", "react", "vue", "angular", "express", "nextjs", "nuxt", "svelte",
    "django", "flask", "fastapi", "maven", "gradle",
];

/// Scan the project rooted at `root`
pub fn scan_project(root: &Path) -> Result<ScanResult, ClassifiedError> {
    let root = root
        .canonicalize()
        .map_err(|e| ClassifiedError::permanent(format!("unresolvable root: {e}")))?;

    let ignores = merged_ignores(&root);
    let (language, build_system, dependencies) = detect_language(&root);
    let language = if language == Language::Unknown {
        majority_extension_language(&root, &ignores)
    } else {
        language
    };
    let framework = detect_framework(&dependencies);

    let tree = build_tree(&root, &root, &ignores);
    let mut files = HashMap::new();
    collect_metadata(&root, &tree, language, &mut files);

    debug!(
        root = %root.display(),
        language = language.as_str(),
        framework = framework.as_deref().unwrap_or("-"),
        files = files.len(),
        "project scan complete"
    );

    Ok(ScanResult {
        language,
        build_system,
        framework,
        dependencies,
        tree,
        files,
    })
}

/// Built-in ignore defaults merged with literal `.gitignore` lines
fn merged_ignores(root: &Path) -> Vec<String> {
    let mut ignores: Vec<String> = DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect();
    if let Ok(content) = std::fs::read_to_string(root.join(".gitignore")) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            ignores.push(line.trim_matches('/').to_string());
        }
    }
    ignores
}

fn is_ignored(name: &str, ignores: &[String]) -> bool {
    ignores.iter().any(|pat| pat == name)
}

/// Manifest-based language detection
fn detect_language(root: &Path) -> (Language, Option<String>, Vec<String>) {
    if root.join("go.mod").exists() {
        let deps = read_go_mod_deps(&root.join("go.mod"));
        return (Language::Go, None, deps);
    }
    if root.join("package.json").exists() {
        let (is_ts, deps) = read_package_json(&root.join("package.json"));
        let lang = if is_ts {
            Language::TypeScript
        } else {
            Language::JavaScript
        };
        return (lang, None, deps);
    }
    for manifest in ["requirements.txt", "setup.py", "pyproject.toml", "Pipfile"] {
        if root.join(manifest).exists() {
            let deps = if manifest == "requirements.txt" {
                read_requirements(&root.join(manifest))
            } else {
                read_lines_as_deps(&root.join(manifest))
            };
            return (Language::Python, None, deps);
        }
    }
    if root.join("Cargo.toml").exists() {
        let deps = read_lines_as_deps(&root.join("Cargo.toml"));
        return (Language::Rust, None, deps);
    }
    if root.join("pom.xml").exists() {
        let deps = read_lines_as_deps(&root.join("pom.xml"));
        return (Language::Java, Some("maven".to_string()), deps);
    }
    if root.join("build.gradle").exists() {
        let deps = read_lines_as_deps(&root.join("build.gradle"));
        return (Language::Java, Some("gradle".to_string()), deps);
    }
    (Language::Unknown, None, Vec::new())
}

fn read_go_mod_deps(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .map(str::trim)
        .filter(|l| l.contains('/') && !l.starts_with("module") && !l.starts_with("//"))
        .map(|l| l.split_whitespace().next().unwrap_or("").to_string())
        .filter(|l| !l.is_empty() && *l != "require" && *l != ")")
        .collect()
}

fn read_package_json(path: &Path) -> (bool, Vec<String>) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return (false, Vec::new());
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) else {
        return (false, Vec::new());
    };

    let mut deps = Vec::new();
    for section in ["dependencies", "devDependencies"] {
        if let Some(map) = json.get(section).and_then(|v| v.as_object()) {
            deps.extend(map.keys().cloned());
        }
    }
    let is_ts = json
        .get("devDependencies")
        .and_then(|v| v.as_object())
        .map(|m| m.contains_key("typescript"))
        .unwrap_or(false);
    (is_ts, deps)
}

fn read_requirements(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
            l.split(['=', '<', '>', '~', '!', '['])
                .next()
                .unwrap_or(l)
                .trim()
                .to_string()
        })
        .collect()
}

/// Lines of a manifest as loose dependency hints (substring matching only)
fn read_lines_as_deps(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|c| c.lines().map(|l| l.trim().to_string()).collect())
        .unwrap_or_default()
}

/// Extension-frequency fallback when no manifest matches
fn majority_extension_language(root: &Path, ignores: &[String]) -> Language {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();
    count_extensions(root, ignores, &mut counts, 0);

    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(ext, _)| match ext {
            "go" => Language::Go,
            "js" | "jsx" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "py" => Language::Python,
            "rs" => Language::Rust,
            "java" => Language::Java,
            _ => Language::Unknown,
        })
        .unwrap_or(Language::Unknown)
}

fn count_extensions(
    dir: &Path,
    ignores: &[String],
    counts: &mut HashMap<&'static str, usize>,
    depth: usize,
) {
    if depth > 16 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_ignored(&name, ignores) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            count_extensions(&path, ignores, counts, depth + 1);
        } else if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            let key: &'static str = match ext {
                "go" => "go",
                "js" => "js",
                "jsx" => "jsx",
                "ts" => "ts",
                "tsx" => "tsx",
                "py" => "py",
                "rs" => "rs",
                "java" => "java",
                _ => continue,
            };
            *counts.entry(key).or_default() += 1;
        }
    }
}

/// Framework detection by dependency substring
fn detect_framework(dependencies: &[String]) -> Option<String> {
    for marker in FRAMEWORK_MARKERS {
        // "next" would also match "nextjs"; match the marker as a loose
        // substring the way the manifests spell it
        let needle = match *marker {
            "nextjs" => "next",
            other => other,
        };
        if dependencies
            .iter()
            .any(|d| d.to_lowercase().contains(needle))
        {
            return Some(marker.to_string());
        }
    }
    None
}

fn build_tree(root: &Path, dir: &Path, ignores: &[String]) -> Vec<FileNode> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut nodes: Vec<FileNode> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_ignored(&name, ignores) {
                return None;
            }
            let path = entry.path();
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .into_owned();
            if path.is_dir() {
                Some(FileNode {
                    name,
                    path: rel,
                    is_dir: true,
                    children: build_tree(root, &path, ignores),
                })
            } else {
                Some(FileNode {
                    name,
                    path: rel,
                    is_dir: false,
                    children: Vec::new(),
                })
            }
        })
        .collect();
    nodes.sort_by(|a, b| (!a.is_dir, &a.name).cmp(&(!b.is_dir, &b.name)));
    nodes
}

fn collect_metadata(
    root: &Path,
    nodes: &[FileNode],
    language: Language,
    out: &mut HashMap<String, FileMetadata>,
) {
    for node in nodes {
        if node.is_dir {
            collect_metadata(root, &node.children, language, out);
        } else if let Ok(content) = std::fs::read_to_string(root.join(&node.path)) {
            out.insert(node.path.clone(), extract_metadata(&node.path, &content, language));
        }
    }
}

/// Regex surface rules per language; good enough for context building
pub fn extract_metadata(path: &str, content: &str, language: Language) -> FileMetadata {
    let mut meta = FileMetadata {
        path: path.to_string(),
        lines: content.lines().count(),
        ..Default::default()
    };

    let lower = path.to_lowercase();
    meta.is_test = lower.contains("test") || lower.contains("spec.");
    meta.is_config = lower.ends_with(".toml")
        || lower.ends_with(".yaml")
        || lower.ends_with(".yml")
        || lower.ends_with(".json")
        || lower.ends_with(".ini");
    meta.is_doc = lower.ends_with(".md") || lower.ends_with(".rst") || lower.ends_with(".txt");

    let rules: &[(&str, fn(&mut FileMetadata, String))] = match language {
        Language::Go => &[
            (r#"(?m)^import\s+"([^"]+)""#, push_import),
            (r"(?m)^func\s+(?:\([^)]*\)\s*)?(\w+)", push_function),
            (r"(?m)^type\s+(\w+)\s+struct", push_class),
        ],
        Language::Rust => &[
            (r"(?m)^use\s+([\w:]+)", push_import),
            (r"(?m)^\s*(?:pub\s+)?(?:async\s+)?fn\s+(\w+)", push_function),
            (r"(?m)^\s*(?:pub\s+)?(?:struct|enum|trait)\s+(\w+)", push_class),
            (r"(?m)^pub\s+(?:fn|struct|enum|trait)\s+(\w+)", push_export),
        ],
        Language::Python => &[
            (r"(?m)^(?:from\s+([\w.]+)\s+import|import\s+([\w.]+))", push_import),
            (r"(?m)^\s*def\s+(\w+)", push_function),
            (r"(?m)^class\s+(\w+)", push_class),
        ],
        Language::JavaScript | Language::TypeScript => &[
            (r#"(?m)from\s+['"]([^'"]+)['"]"#, push_import),
            (r"(?m)(?:^|\s)function\s+(\w+)", push_function),
            (r"(?m)^(?:export\s+)?class\s+(\w+)", push_class),
            (r"(?m)^export\s+(?:default\s+)?(?:function|class|const)\s+(\w+)", push_export),
        ],
        Language::Java => &[
            (r"(?m)^import\s+([\w.]+);", push_import),
            (r"(?m)(?:public|private|protected)\s+[\w<>\[\]]+\s+(\w+)\s*\(", push_function),
            (r"(?m)(?:public\s+)?(?:class|interface)\s+(\w+)", push_class),
        ],
        Language::Unknown => &[],
    };

    for (pattern, push) in rules {
        if let Ok(re) = Regex::new(pattern) {
            for cap in re.captures_iter(content) {
                let value = cap
                    .iter()
                    .skip(1)
                    .flatten()
                    .next()
                    .map(|m| m.as_str().to_string());
                if let Some(v) = value {
                    push(&mut meta, v);
                }
            }
        }
    }

    meta
}

fn push_import(meta: &mut FileMetadata, v: String) {
    if !meta.imports.contains(&v) {
        meta.imports.push(v);
    }
}

fn push_function(meta: &mut FileMetadata, v: String) {
    if !meta.functions.contains(&v) {
        meta.functions.push(v);
    }
}

fn push_class(meta: &mut FileMetadata, v: String) {
    if !meta.classes.contains(&v) {
        meta.classes.push(v);
    }
}

fn push_export(meta: &mut FileMetadata, v: String) {
    if !meta.exports.contains(&v) {
        meta.exports.push(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_go_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("go.mod"),
            "module example.com/app\n\nrequire (\n\tgithub.com/gin-gonic/gin v1.9.0\n)\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("main.go"), "package main\nfunc main() {}\n").unwrap();

        let scan = scan_project(dir.path()).unwrap();
        assert_eq!(scan.language, Language::Go);
        assert_eq!(scan.framework.as_deref(), Some("gin"));
    }

    #[test]
    fn test_detect_typescript_via_dev_dependency() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"react": "18"}, "devDependencies": {"typescript": "5"}}"#,
        )
        .unwrap();

        let scan = scan_project(dir.path()).unwrap();
        assert_eq!(scan.language, Language::TypeScript);
        assert_eq!(scan.framework.as_deref(), Some("react"));
    }

    #[test]
    fn test_detect_javascript_without_typescript() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"express": "4"}}"#,
        )
        .unwrap();

        let scan = scan_project(dir.path()).unwrap();
        assert_eq!(scan.language, Language::JavaScript);
        assert_eq!(scan.framework.as_deref(), Some("express"));
    }

    #[test]
    fn test_detect_python_requirements() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "flask==2.0\npytest\n").unwrap();

        let scan = scan_project(dir.path()).unwrap();
        assert_eq!(scan.language, Language::Python);
        assert_eq!(scan.framework.as_deref(), Some("flask"));
        assert!(scan.dependencies.contains(&"flask".to_string()));
    }

    #[test]
    fn test_detect_java_maven() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pom.xml"), "<project></project>").unwrap();

        let scan = scan_project(dir.path()).unwrap();
        assert_eq!(scan.language, Language::Java);
        assert_eq!(scan.build_system.as_deref(), Some("maven"));
    }

    #[test]
    fn test_extension_majority_fallback() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "y = 2\n").unwrap();
        std::fs::write(dir.path().join("c.js"), "var z;\n").unwrap();

        let scan = scan_project(dir.path()).unwrap();
        assert_eq!(scan.language, Language::Python);
    }

    #[test]
    fn test_gitignore_lines_excluded() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "# comment\n\nsecrets\n").unwrap();
        std::fs::create_dir(dir.path().join("secrets")).unwrap();
        std::fs::write(dir.path().join("secrets/key.txt"), "k").unwrap();
        std::fs::write(dir.path().join("visible.txt"), "v").unwrap();

        let scan = scan_project(dir.path()).unwrap();
        let names: Vec<_> = scan.tree.iter().map(|n| n.name.as_str()).collect();
        assert!(names.contains(&"visible.txt"));
        assert!(!names.contains(&"secrets"));
    }

    #[test]
    fn test_rust_metadata_extraction() {
        let content = "use std::fmt;\npub struct Engine;\npub fn start() {}\nfn helper() {}\n";
        let meta = extract_metadata("src/engine.rs", content, Language::Rust);
        assert_eq!(meta.lines, 4);
        assert!(meta.imports.contains(&"std::fmt".to_string()));
        assert!(meta.functions.contains(&"start".to_string()));
        assert!(meta.functions.contains(&"helper".to_string()));
        assert!(meta.classes.contains(&"Engine".to_string()));
        assert!(meta.exports.contains(&"start".to_string()));
    }

    #[test]
    fn test_test_and_config_flags() {
        let meta = extract_metadata("tests/api_tests.rs", "", Language::Rust);
        assert!(meta.is_test);
        let meta = extract_metadata("config.toml", "", Language::Unknown);
        assert!(meta.is_config);
        let meta = extract_metadata("README.md", "", Language::Unknown);
        assert!(meta.is_doc);
    }
}
