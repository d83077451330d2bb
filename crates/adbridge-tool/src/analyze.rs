use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::{optional_str, required_str, Tool, ToolContext, ToolError, ToolResult};

pub const NO_FINDINGS: &str = "No obvious issues found";
const MAX_LINE_LENGTH: usize = 120;

static PASSWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(password|passwd|pwd)\s*[:=]\s*["'][^"']+["']"#).unwrap());
static SECRET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(api[_-]?key|secret|access[_-]?token|auth[_-]?token)\s*[:=]\s*["'][^"']+["']"#)
        .unwrap()
});
static SQL_CONCAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)["']\s*(select|insert|update|delete)\b[^"']*["']\s*(\+|\.\.|%)"#).unwrap()
});
static LOOSE_EQUALITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^=!<>]==[^=]").unwrap());
static JS_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|[\s;{(])var\s+\w").unwrap());
static GO_DISCARDED_ERR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|[\s,])_\s*(,\s*_\s*)?=\s*\w+.*\(").unwrap());

fn normalize_language(language: &str) -> String {
    match language.trim().to_ascii_lowercase().as_str() {
        "py" | "python" | "python3" => "python".to_string(),
        "js" | "javascript" | "ts" | "typescript" | "jsx" | "tsx" => "javascript".to_string(),
        "kt" | "kts" | "kotlin" => "kotlin".to_string(),
        "rs" | "rust" => "rust".to_string(),
        "golang" | "go" => "go".to_string(),
        other => other.to_string(),
    }
}

/// Deterministic pattern checks over a snippet. Each finding is prefixed
/// with its category.
pub fn analyze_code(code: &str, language: Option<&str>) -> Vec<String> {
    let mut findings = Vec::new();

    if PASSWORD.is_match(code) {
        findings.push("SECURITY: Hardcoded password detected; load credentials from a secure store or environment".to_string());
    }
    if SECRET.is_match(code) {
        findings.push("SECURITY: Possible hardcoded API key or secret".to_string());
    }
    if code.contains("eval(") {
        findings.push("SECURITY: eval() executes arbitrary code; avoid it".to_string());
    }
    if SQL_CONCAT.is_match(code) {
        findings.push("SECURITY: SQL built by string concatenation; use parameterized queries".to_string());
    }
    if code.contains("http://") && !code.contains("http://localhost") && !code.contains("http://127.0.0.1") {
        findings.push("SECURITY: Plain http:// URL; prefer https://".to_string());
    }

    let long_lines = code
        .lines()
        .filter(|line| line.chars().count() > MAX_LINE_LENGTH)
        .count();
    if long_lines > 0 {
        findings.push(format!(
            "STYLE: {} line(s) longer than {} characters",
            long_lines, MAX_LINE_LENGTH
        ));
    }
    let trailing = code
        .lines()
        .filter(|line| line.ends_with(' ') || line.ends_with('\t'))
        .count();
    if trailing > 0 {
        findings.push(format!("STYLE: Trailing whitespace on {} line(s)", trailing));
    }

    for marker in ["console.log(", "print(", "println!(", "System.out.println", "Log.d(", "fmt.Println("] {
        if code.contains(marker) {
            findings.push(format!(
                "DEBUG: Debug output statement found ({}); remove before merging",
                marker.trim_end_matches('(')
            ));
        }
    }

    if code.contains("TODO") || code.contains("FIXME") {
        findings.push("NOTE: Contains TODO/FIXME comments".to_string());
    }

    let language = language.map(normalize_language).unwrap_or_default();
    match language.as_str() {
        "python" => {
            if code.lines().any(|l| l.trim() == "except:") {
                findings.push("PYTHON: Bare except clause catches every exception, including KeyboardInterrupt".to_string());
            }
            if code.contains("import *") {
                findings.push("PYTHON: Wildcard import pollutes the namespace".to_string());
            }
            if code.contains("exec(") {
                findings.push("PYTHON: exec() runs arbitrary code".to_string());
            }
        }
        "javascript" => {
            if JS_VAR.is_match(code) {
                findings.push("JAVASCRIPT: Use let/const instead of var".to_string());
            }
            if LOOSE_EQUALITY.is_match(code) {
                findings.push("JAVASCRIPT: Use === instead of == to avoid type coercion".to_string());
            }
        }
        "kotlin" => {
            if code.contains("!!") {
                findings.push("KOTLIN: Non-null assertion (!!) may throw NullPointerException".to_string());
            }
            if code.contains("GlobalScope.") {
                findings.push("KOTLIN: GlobalScope coroutines are not tied to a lifecycle".to_string());
            }
        }
        "java" => {
            if code.contains("catch (Exception") || code.contains("catch(Exception") {
                findings.push("JAVA: Catching generic Exception hides specific failures".to_string());
            }
            if code.contains(".printStackTrace()") {
                findings.push("JAVA: printStackTrace() instead of a logger".to_string());
            }
        }
        "rust" => {
            if code.contains(".unwrap()") {
                findings.push("RUST: unwrap() may panic; propagate the error with ?".to_string());
            }
            if code.contains("unsafe ") || code.contains("unsafe{") {
                findings.push("RUST: unsafe block requires careful review".to_string());
            }
        }
        "go" => {
            if GO_DISCARDED_ERR.is_match(code) {
                findings.push("GO: Return value discarded with _; check returned errors".to_string());
            }
            if code.contains("panic(") {
                findings.push("GO: panic() in library code; return an error instead".to_string());
            }
        }
        _ => {}
    }

    findings
}

pub struct AnalyzeCodeTool;

#[async_trait]
impl Tool for AnalyzeCodeTool {
    fn id(&self) -> &str {
        "analyze_code"
    }

    fn description(&self) -> &str {
        "Run quick static checks on a code snippet: hardcoded secrets, debug output, style problems and language-specific pitfalls."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {"type": "string", "description": "Code to analyze"},
                "language": {
                    "type": "string",
                    "description": "Language of the code (python, javascript, kotlin, java, rust, go)"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> Result<ToolResult, ToolError> {
        let code = required_str(&args, "code")?;
        let language = optional_str(&args, "language");
        let findings = analyze_code(code, language);

        let output = if findings.is_empty() {
            NO_FINDINGS.to_string()
        } else {
            let mut out = format!("Found {} potential issue(s):\n", findings.len());
            for finding in &findings {
                out.push_str("- ");
                out.push_str(finding);
                out.push('\n');
            }
            out
        };
        Ok(ToolResult::simple("Code analysis", output).with_metadata("findings", json!(findings.len())))
    }
}
