// crates/core/src/snapshot.rs

//! Immutable toolset snapshots.
//!
//! A snapshot is the full text of a toolset file the harness can load. The
//! last [`FOOTER_LINES`] lines are the harness boilerplate that must stay at
//! the end of the file; everything before them is the body. Composition never
//! edits a snapshot: it yields a new value, and writing it to disk is a
//! separate step that always targets a fresh path.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::descriptor::{find_functions, is_function_body, parse_descriptor, ToolDescriptor};
use crate::error::SnapshotError;

/// Line the harness looks for to register the function that follows it.
pub const REGISTRATION_MARKER: &str = "@mcp.tool()";

/// Number of trailing lines treated as harness boilerplate.
pub const FOOTER_LINES: usize = 2;

/// What to fold into a base snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addend {
    /// A full function body, appended and registered. Its first non-blank
    /// line must be the `def`; anything else re-bases unchanged.
    Function(String),
    /// A bare tool name; the base is re-based unchanged.
    Name(String),
    /// Nothing; the base is re-based unchanged.
    Empty,
}

impl Addend {
    /// Classify free text the way the composition rule reads it.
    pub fn classify(text: &str) -> Self {
        if text.trim().is_empty() {
            Addend::Empty
        } else if is_function_body(text) {
            Addend::Function(text.to_string())
        } else {
            Addend::Name(text.trim().to_string())
        }
    }
}

/// A tool registered in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTool {
    pub name: String,
    pub source: String,
    pub descriptor: Option<ToolDescriptor>,
}

/// A versioned, immutable toolset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Lines including their terminators, so the text round-trips byte for byte.
    lines: Vec<String>,
    id: String,
}

impl Snapshot {
    pub fn from_text(text: &str) -> Self {
        let lines: Vec<String> = text.split_inclusive('\n').map(str::to_string).collect();
        let id = content_id(text);
        Self { lines, id }
    }

    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let text = fs::read_to_string(path).map_err(|source| SnapshotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_text(&text))
    }

    /// Short content hash identifying this snapshot.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> String {
        self.lines.concat()
    }

    fn split_at(&self) -> usize {
        self.lines.len().saturating_sub(FOOTER_LINES)
    }

    pub fn body(&self) -> &[String] {
        &self.lines[..self.split_at()]
    }

    pub fn footer(&self) -> &[String] {
        &self.lines[self.split_at()..]
    }

    /// Fold `addend` into this snapshot, producing a new one.
    pub fn compose(&self, addend: &Addend) -> Snapshot {
        let mut lines: Vec<String> = self.body().to_vec();
        match addend {
            Addend::Function(source) if is_function_body(source) => {
                lines.push(format!("{}\n", REGISTRATION_MARKER));
                lines.extend(source.lines().map(|l| format!("{}\n", l)));
            }
            Addend::Function(source) => {
                let head = source.lines().map(str::trim).find(|l| !l.is_empty());
                warn!(head = head.unwrap_or_default(), "function addend does not open with a def, re-basing unchanged");
            }
            Addend::Name(_) | Addend::Empty => {}
        }
        lines.extend(self.footer().iter().cloned());

        let id = content_id(&lines.concat());
        Snapshot { lines, id }
    }

    /// Write to `path` via a sibling temp file and a rename, so readers never
    /// see a half-written toolset.
    pub fn persist(&self, path: &Path) -> Result<(), SnapshotError> {
        let write_err = |source| SnapshotError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let tmp = temp_sibling(path);
        fs::write(&tmp, self.text()).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)?;
        Ok(())
    }

    /// Every tool registered with [`REGISTRATION_MARKER`], in file order.
    pub fn tools(&self) -> Vec<RegisteredTool> {
        let mut tools = Vec::new();
        let mut idx = 0;
        while idx < self.lines.len() {
            if self.lines[idx].trim() != REGISTRATION_MARKER {
                idx += 1;
                continue;
            }
            // Skip blank lines and further decorators up to the def.
            let mut start = idx + 1;
            while start < self.lines.len() {
                let t = self.lines[start].trim();
                if t.is_empty() || t.starts_with('@') {
                    start += 1;
                } else {
                    break;
                }
            }
            let end = block_end(&self.lines, start);
            let source = self.lines[start..end].concat();
            if let Some(def) = find_functions(&source).into_iter().next() {
                tools.push(RegisteredTool {
                    name: def.name,
                    descriptor: parse_descriptor(&source).ok(),
                    source,
                });
            }
            idx = end.max(idx + 1);
        }
        tools
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools().into_iter().map(|t| t.name).collect()
    }

    pub fn contains_tool(&self, name: &str) -> bool {
        self.tools().iter().any(|t| t.name == name)
    }

    /// One line per registered tool, as shown to the oracle.
    pub fn library_listing(&self) -> Vec<String> {
        self.tools()
            .into_iter()
            .map(|t| match t.descriptor {
                Some(d) => d.listing_line(),
                None => format!("-{}(): ", t.name),
            })
            .collect()
    }
}

/// Compose a snapshot file into a new file. The base file is only read.
pub fn compose_file(
    base_path: &Path,
    addend: &Addend,
    target_path: &Path,
) -> Result<Snapshot, SnapshotError> {
    if same_file(base_path, target_path) {
        return Err(SnapshotError::SameTarget(target_path.to_path_buf()));
    }
    let base = Snapshot::load(base_path)?;
    let composed = base.compose(addend);
    composed.persist(target_path)?;
    Ok(composed)
}

/// End (exclusive) of the indented block that starts at `start`.
fn block_end(lines: &[String], start: usize) -> usize {
    let mut end = start + 1;
    while end < lines.len() {
        let line = &lines[end];
        let starts_indented = line.starts_with(' ') || line.starts_with('\t');
        if !line.trim().is_empty() && !starts_indented && !line.trim_start().starts_with(')') {
            break;
        }
        end += 1;
    }
    // Trailing blank lines belong to the gap, not the function.
    while end > start + 1 && lines[end - 1].trim().is_empty() {
        end -= 1;
    }
    end.min(lines.len())
}

fn content_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"from mcp.server.fastmcp import FastMCP
mcp = FastMCP('retail')

@mcp.tool()
def get_user_details(user_id):
    """
    {"type": "function", "function": {"name": "get_user_details", "description": "Get a user.", "parameters": {"type": "object", "properties": {"user_id": {"type": "string"}}, "required": ["user_id"]}}}
    """
    return '{}'

if __name__ == "__main__":
    mcp.run(transport='stdio')
"#;

    const FOO: &str = "def foo():\n    \"\"\"{\"name\": \"foo\", \"description\": \"Foo.\"}\"\"\"\n    pass";

    #[test]
    fn function_addend_lands_between_body_and_footer() {
        let base = Snapshot::from_text(BASE);
        let out = base.compose(&Addend::classify(FOO));
        let text = out.text();
        let lines: Vec<&str> = text.lines().collect();
        let n = lines.len();
        assert_eq!(lines[n - 2], "if __name__ == \"__main__\":");
        assert_eq!(lines[n - 1], "    mcp.run(transport='stdio')");
        assert_eq!(lines[n - 3], "    pass");
        assert_eq!(lines[n - 5], "def foo():");
        assert_eq!(lines[n - 6], REGISTRATION_MARKER);
        assert_eq!(out.footer(), base.footer());
        assert_ne!(out.id(), base.id());
    }

    #[test]
    fn name_and_empty_addends_rebase_unchanged() {
        let base = Snapshot::from_text(BASE);
        assert_eq!(base.compose(&Addend::Empty).text(), BASE);
        assert_eq!(
            base.compose(&Addend::classify("get_order_total")).text(),
            BASE
        );
        assert_eq!(base.compose(&Addend::Empty).id(), base.id());
    }

    #[test]
    fn function_addend_with_leading_statement_is_not_registered() {
        let base = Snapshot::from_text(BASE);
        let out = base.compose(&Addend::Function(format!("import re\n\n{}", FOO)));
        assert_eq!(out.text(), BASE);
        assert!(!out.text().contains("@mcp.tool()\nimport re"));
        assert_eq!(out.tool_names(), vec!["get_user_details"]);
    }

    #[test]
    fn footer_survives_missing_trailing_newline() {
        let text = "a\nb\nfooter1\nfooter2";
        let out = Snapshot::from_text(text).compose(&Addend::classify(FOO));
        assert!(out.text().ends_with("\nfooter1\nfooter2"));
    }

    #[test]
    fn lists_registered_tools_with_descriptors() {
        let out = Snapshot::from_text(BASE).compose(&Addend::classify(FOO));
        assert_eq!(out.tool_names(), vec!["get_user_details", "foo"]);
        assert_eq!(
            out.library_listing(),
            vec![
                "-get_user_details(user_id:string): Get a user.".to_string(),
                "-foo(): Foo.".to_string(),
            ]
        );
        assert!(out.contains_tool("foo"));
        assert!(!out.contains_tool("bar"));
    }

    #[test]
    fn compose_file_leaves_base_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let base_path = dir.path().join("base.py");
        fs::write(&base_path, BASE).unwrap();
        let before = fs::read(&base_path).unwrap();
        let mtime = fs::metadata(&base_path).unwrap().modified().unwrap();

        let target = dir.path().join("nested").join("trial.py");
        let snap = compose_file(&base_path, &Addend::classify(FOO), &target).unwrap();

        assert_eq!(fs::read(&base_path).unwrap(), before);
        assert_eq!(fs::metadata(&base_path).unwrap().modified().unwrap(), mtime);
        assert_eq!(fs::read_to_string(&target).unwrap(), snap.text());
        assert!(matches!(
            compose_file(&base_path, &Addend::Empty, &base_path),
            Err(SnapshotError::SameTarget(_))
        ));
    }

    #[test]
    fn missing_base_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = compose_file(
            &dir.path().join("nope.py"),
            &Addend::Empty,
            &dir.path().join("out.py"),
        )
        .unwrap_err();
        assert!(matches!(err, SnapshotError::Read { .. }));
    }
}
