//! File read tool — read file contents up to a size cap.

use async_trait::async_trait;
use chatloop_core::error::ToolError;
use chatloop_core::tool::{Tool, ToolArguments, ToolContext, ToolOutput};
use tokio::io::AsyncReadExt;

pub const TOOL_NAME: &str = "tool_read_file";

pub struct FileReadTool {
    /// Bytes returned at most; longer files are truncated.
    max_bytes: u64,
}

impl FileReadTool {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Read the contents of a text file at the given path."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                }
            }
        })
    }

    fn required_params(&self) -> &[&str] {
        &["path"]
    }

    async fn execute(
        &self,
        arguments: ToolArguments,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let path = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("'path' must be a string".into()))?;

        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();

        let mut bytes = Vec::new();
        file.take(self.max_bytes).read_to_end(&mut bytes).await?;
        let truncated = size > self.max_bytes;

        let mut out = ToolOutput::new();
        out.insert("path".into(), serde_json::json!(path));
        out.insert(
            "content".into(),
            serde_json::json!(String::from_utf8_lossy(&bytes)),
        );
        out.insert("size".into(), serde_json::json!(size));
        out.insert("truncated".into(), serde_json::json!(truncated));
        Ok(out)
    }
}
