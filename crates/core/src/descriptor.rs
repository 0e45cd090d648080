// crates/core/src/descriptor.rs

//! Extraction of the machine-readable descriptor carried in a candidate's docstring.
//!
//! Toolset files register each tool as a Python function whose docstring is a
//! JSON tool schema:
//!
//! ```text
//! def get_order_status(order_id):
//!     """
//!     {"type": "function", "function": {"name": "get_order_status", ...}}
//!     """
//! ```
//!
//! Only the structure around the docstring is inspected; the body stays opaque.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DescriptorError;

static DEF_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("valid def regex")
});

static TRAILING_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("valid trailing comma regex"));

/// One parameter of a tool, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    pub type_hint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Structured descriptor parsed out of a tool's documentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub parameters: Vec<ToolParameter>,
    pub description: String,
}

impl ToolDescriptor {
    /// Compact one-line form used when listing the library to the oracle.
    pub fn listing_line(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| match &p.default {
                Some(Value::String(s)) => format!("{}:{} = {}", p.name, p.type_hint, s),
                Some(other) => format!("{}:{} = {}", p.name, p.type_hint, other),
                None => format!("{}:{}", p.name, p.type_hint),
            })
            .collect();
        format!("-{}({}): {}", self.name, params.join(", "), self.description)
    }
}

/// A top-level function located in a block of source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    /// Cleaned docstring, if the first body statement is a string literal.
    pub docstring: Option<String>,
    /// Line index of the `def` line.
    pub line: usize,
}

/// Parse the descriptor of the first top-level function in `source`.
pub fn parse_descriptor(source: &str) -> Result<ToolDescriptor, DescriptorError> {
    let defs = find_functions(source);
    let def = defs.into_iter().next().ok_or(DescriptorError::NoFunctionFound)?;

    let doc = def
        .docstring
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .ok_or_else(|| DescriptorError::NotStructured {
            function: def.name.clone(),
            reason: "missing docstring".to_string(),
        })?;

    let value = parse_lenient_json(doc).map_err(|e| DescriptorError::NotStructured {
        function: def.name.clone(),
        reason: e.to_string(),
    })?;

    descriptor_from_value(&value, &def.name).ok_or_else(|| DescriptorError::NotStructured {
        function: def.name.clone(),
        reason: "docstring is not a JSON object".to_string(),
    })
}

/// Parse a standalone tool body, which must open with its `def` so the
/// registration marker can sit directly above it.
pub fn parse_tool_body(source: &str) -> Result<ToolDescriptor, DescriptorError> {
    let first = source
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or(DescriptorError::NoFunctionFound)?;
    if !DEF_LINE.is_match(first) {
        return Err(DescriptorError::LeadingStatement(first.to_string()));
    }
    parse_descriptor(source)
}

/// Name of the first top-level function, without requiring a valid docstring.
pub fn function_name(source: &str) -> Option<String> {
    find_functions(source).into_iter().next().map(|d| d.name)
}

/// Whether `text` reads as a function body: its first non-blank line is a `def`.
pub fn is_function_body(text: &str) -> bool {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| DEF_LINE.is_match(l))
        .unwrap_or(false)
}

/// Parse JSON after dropping separators that sit right before a closing bracket.
pub fn parse_lenient_json(text: &str) -> Result<Value, serde_json::Error> {
    let cleaned = TRAILING_SEPARATOR.replace_all(text, "$1");
    serde_json::from_str(&cleaned)
}

fn descriptor_from_value(value: &Value, fallback_name: &str) -> Option<ToolDescriptor> {
    let outer = value.as_object()?;
    let func = outer
        .get("function")
        .and_then(Value::as_object)
        .unwrap_or(outer);

    let name = func
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(fallback_name)
        .to_string();
    let description = func
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let schema = func.get("parameters");
    let required: Vec<&str> = schema
        .and_then(|s| s.get("required"))
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let parameters = schema
        .and_then(|s| s.get("properties"))
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(pname, prop)| ToolParameter {
                    name: pname.clone(),
                    type_hint: type_hint(prop),
                    default: prop.get("default").cloned(),
                    description: prop
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    required: required.contains(&pname.as_str()),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ToolDescriptor {
        name,
        parameters,
        description,
    })
}

fn type_hint(prop: &Value) -> String {
    match prop.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(ts)) => join_types(ts),
        _ => match prop.get("anyOf").and_then(Value::as_array) {
            Some(variants) => {
                let types: Vec<Value> = variants
                    .iter()
                    .filter_map(|v| v.get("type").cloned())
                    .collect();
                join_types(&types)
            }
            None => "Any".to_string(),
        },
    }
}

fn join_types(types: &[Value]) -> String {
    let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
    if names.is_empty() {
        "Any".to_string()
    } else {
        names.join(" | ")
    }
}

/// Locate every top-level function definition, skipping triple-quoted strings.
pub fn find_functions(source: &str) -> Vec<FunctionDef> {
    let lines: Vec<&str> = source.lines().collect();
    let mut defs = Vec::new();
    let mut open_quote: Option<&'static str> = None;

    for (idx, line) in lines.iter().enumerate() {
        if let Some(quote) = open_quote {
            if line.matches(quote).count() % 2 == 1 {
                open_quote = None;
            }
            continue;
        }

        if let Some(caps) = DEF_LINE.captures(line) {
            let name = caps[1].to_string();
            let docstring = docstring_after(&lines, idx);
            defs.push(FunctionDef {
                name,
                docstring,
                line: idx,
            });
            continue;
        }

        for quote in ["\"\"\"", "'''"] {
            if line.matches(quote).count() % 2 == 1 {
                open_quote = Some(quote);
                break;
            }
        }
    }

    defs
}

/// Return the docstring of the function whose `def` is at `def_idx`.
fn docstring_after(lines: &[&str], def_idx: usize) -> Option<String> {
    // Walk to the line that closes the signature.
    let mut depth: i32 = 0;
    let mut sig_end = None;
    let mut inline_body = "";
    for (idx, line) in lines.iter().enumerate().skip(def_idx) {
        let code = strip_comment(line);
        for (pos, ch) in code.char_indices() {
            match ch {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                ':' if depth == 0 => {
                    sig_end = Some(idx);
                    inline_body = code[pos + 1..].trim();
                    break;
                }
                _ => {}
            }
        }
        if sig_end.is_some() {
            break;
        }
    }
    let sig_end = sig_end?;

    let mut body: Vec<&str> = Vec::new();
    if !inline_body.is_empty() {
        body.push(inline_body);
    }
    body.extend(lines.iter().skip(sig_end + 1).copied());

    let first = body
        .iter()
        .position(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))?;
    let head = body[first].trim_start();

    let (raw, rest) = split_string_prefix(head);
    for quote in ["\"\"\"", "'''"] {
        if let Some(after_open) = rest.strip_prefix(quote) {
            // Single-line triple-quoted docstring.
            if let Some(end) = after_open.find(quote) {
                return Some(finish(&after_open[..end], raw));
            }
            let mut collected = vec![after_open.to_string()];
            for line in body.iter().skip(first + 1) {
                if let Some(end) = line.find(quote) {
                    collected.push(line[..end].to_string());
                    return Some(finish(&collected.join("\n"), raw));
                }
                collected.push(line.to_string());
            }
            return None;
        }
    }
    for quote in ['"', '\''] {
        if let Some(after_open) = rest.strip_prefix(quote) {
            let end = after_open.rfind(quote)?;
            return Some(finish(&after_open[..end], raw));
        }
    }
    None
}

fn split_string_prefix(s: &str) -> (bool, &str) {
    for prefix in ["r", "R", "u", "U"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            if rest.starts_with('"') || rest.starts_with('\'') {
                return (prefix.eq_ignore_ascii_case("r"), rest);
            }
        }
    }
    (false, s)
}

fn strip_comment(line: &str) -> &str {
    let mut in_single = false;
    let mut in_double = false;
    for (pos, ch) in line.char_indices() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '#' if !in_single && !in_double => return &line[..pos],
            _ => {}
        }
    }
    line
}

fn finish(raw_doc: &str, raw_literal: bool) -> String {
    let text = if raw_literal {
        raw_doc.to_string()
    } else {
        unescape(raw_doc)
    };
    clean_doc(&text)
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\n') => {}
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Dedent the docstring the way Python's `inspect.cleandoc` does.
fn clean_doc(doc: &str) -> String {
    let expanded = doc.replace('\t', "        ");
    let lines: Vec<&str> = expanded.lines().collect();
    if lines.is_empty() {
        return String::new();
    }

    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<String> = Vec::with_capacity(lines.len());
    cleaned.push(lines[0].trim_start().to_string());
    for line in lines.iter().skip(1) {
        cleaned.push(line.get(margin..).unwrap_or("").trim_end().to_string());
    }

    while cleaned.first().map(|l| l.is_empty()).unwrap_or(false) {
        cleaned.remove(0);
    }
    while cleaned.last().map(|l| l.is_empty()).unwrap_or(false) {
        cleaned.pop();
    }
    cleaned.join("\n")
}
