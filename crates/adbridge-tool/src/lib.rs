mod adb;
mod analyze;
mod azure;
mod github;
mod read_file;
mod registry;
mod summary;
mod tool;

pub use adb::AdbTool;
pub use analyze::{analyze_code, AnalyzeCodeTool};
pub use azure::{
    AzureDevOpsClient, InstallLatestBuildTool, AZURE_DEVOPS_PAT_ENV, DEFAULT_AZURE_DEVOPS_URL,
};
pub use github::{parse_repo, GetPrDiffTool, GetPrInfoTool, GithubClient, ListPrsTool};
pub use read_file::{ReadFileTool, MAX_FILE_BYTES};
pub use registry::{create_default_registry, ToolRegistry};
pub use summary::{format_review_summary, FormatReviewSummaryTool};
pub use tool::*;
