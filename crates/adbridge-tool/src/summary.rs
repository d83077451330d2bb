use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{optional_str, required_str, Tool, ToolContext, ToolError, ToolResult};

fn assessment_label(assessment: &str) -> &'static str {
    match assessment.trim().to_ascii_uppercase().as_str() {
        "APPROVE" => "APPROVED",
        "REQUEST_CHANGES" => "CHANGES REQUESTED",
        _ => "COMMENT",
    }
}

pub fn format_review_summary(summary: &str, issues: &str, assessment: &str) -> String {
    let issues = if issues.trim().is_empty() {
        "None"
    } else {
        issues.trim()
    };
    let rule = "=".repeat(40);
    format!(
        "{rule}\nCODE REVIEW SUMMARY\n{rule}\n\n\
         Summary:\n{summary}\n\n\
         Issues Found:\n{issues}\n\n\
         Assessment: {label}\n{rule}",
        rule = rule,
        summary = summary.trim(),
        issues = issues,
        label = assessment_label(assessment),
    )
}

pub struct FormatReviewSummaryTool;

#[async_trait]
impl Tool for FormatReviewSummaryTool {
    fn id(&self) -> &str {
        "format_review_summary"
    }

    fn description(&self) -> &str {
        "Format the final code review report from a summary, the issues found and an assessment (APPROVE, REQUEST_CHANGES or COMMENT)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string", "description": "Short overview of the change"},
                "issues": {"type": "string", "description": "Issues found, one per line"},
                "assessment": {
                    "type": "string",
                    "description": "APPROVE, REQUEST_CHANGES or COMMENT"
                }
            },
            "required": ["summary", "assessment"]
        })
    }

    async fn execute(&self, args: Value, _ctx: ToolContext) -> Result<ToolResult, ToolError> {
        let summary = required_str(&args, "summary")?;
        let issues = optional_str(&args, "issues").unwrap_or_default();
        let assessment = optional_str(&args, "assessment").unwrap_or("COMMENT");
        Ok(ToolResult::simple(
            "Review summary",
            format_review_summary(summary, issues, assessment),
        ))
    }
}
