//! Candidate program and cost extraction from inference artifacts.
//!
//! The agent may write its program to a workspace file, or only emit it in a
//! fenced code block in the transcript. Extraction priority: newest `.py`
//! file in the workspace root, then a ```python fence, then a generic fence
//! that looks like Python, then a raw import-prefixed line scan. When nothing
//! is found the `ERROR` sentinel is returned so downstream bookkeeping still
//! proceeds.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Sentinel written in place of a candidate program when extraction failed.
pub const ERROR_SENTINEL: &str = "ERROR";

fn python_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?si)```python\s*(.*?)```").expect("static regex"))
}

fn generic_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```\s*(.*?)```").expect("static regex"))
}

/// Extracts the candidate program from the workspace, falling back to the
/// transcript. Returns [`ERROR_SENTINEL`] when neither yields code.
pub fn extract_candidate_program(workspace_root: &Path, transcript: &str) -> String {
    if let Some(path) = newest_python_file(workspace_root) {
        if let Ok(code) = fs::read_to_string(&path) {
            if !code.trim().is_empty() {
                return code;
            }
        }
    }
    extract_python_code(transcript)
}

/// Newest `.py` file directly under `dir`, by modification time.
fn newest_python_file(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<(std::time::SystemTime, PathBuf)> = fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "py"))
        .filter_map(|p| {
            let mtime = p.metadata().ok()?.modified().ok()?;
            Some((mtime, p))
        })
        .collect();
    candidates.sort_by(|a, b| b.0.cmp(&a.0));
    candidates.into_iter().next().map(|(_, p)| p)
}

/// Extracts Python code from transcript text.
pub fn extract_python_code(output: &str) -> String {
    if let Some(caps) = python_fence().captures(output) {
        return caps[1].trim().to_string();
    }

    if let Some(caps) = generic_fence().captures(output) {
        let code = caps[1].trim();
        let looks_like_python = ["import ", "def ", "class ", "print(", "from "]
            .iter()
            .any(|kw| code.contains(kw));
        if looks_like_python {
            return code.to_string();
        }
    }

    // Last resort: everything from the first import/from line onward.
    let mut collected = Vec::new();
    let mut in_code = false;
    for line in output.lines() {
        let stripped = line.trim_start();
        if stripped.starts_with("import ") || stripped.starts_with("from ") {
            in_code = true;
        }
        if in_code {
            collected.push(line);
        }
    }
    if !collected.is_empty() {
        return collected.join("\n");
    }

    ERROR_SENTINEL.to_string()
}

/// Pulls the total API cost out of a stream-json transcript, if the final
/// `result` record carries one.
pub fn extract_cost_usd(transcript: &str) -> Option<f64> {
    for line in transcript.lines().rev() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) else {
            continue;
        };
        if value.get("type").and_then(|t| t.as_str()) == Some("result") {
            return value.get("total_cost_usd").and_then(|c| c.as_f64());
        }
    }
    None
}
