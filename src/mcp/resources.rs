//! MCP resources.
//!
//! - `greeting://{name}`: a plain-text greeting
//! - `session://status`: the connection session as JSON

use crate::error::{DbError, DbResult};
use crate::session::SessionStatus;
use rmcp::model::{
    AnnotateAble, ListResourceTemplatesResult, ListResourcesResult, RawResource,
    RawResourceTemplate, ReadResourceResult, ResourceContents,
};

pub const GREETING_SCHEME: &str = "greeting://";
pub const GREETING_TEMPLATE: &str = "greeting://{name}";
pub const STATUS_URI: &str = "session://status";

/// A resource URI this server knows how to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRequest {
    Greeting(String),
    Status,
}

impl ResourceRequest {
    pub fn parse(uri: &str) -> Option<Self> {
        if uri == STATUS_URI {
            return Some(Self::Status);
        }
        let name = uri.strip_prefix(GREETING_SCHEME)?.trim_end_matches('/');
        if name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::Greeting(name.to_string()))
    }
}

pub fn greeting(name: &str) -> String {
    format!("Hello, {}! Welcome to the session database MCP server.", name)
}

pub fn list_resources() -> ListResourcesResult {
    let mut status = RawResource::new(STATUS_URI, "session-status");
    status.description =
        Some("Current database, open connections and connection defaults".to_string());
    status.mime_type = Some("application/json".to_string());

    ListResourcesResult::with_all_items(vec![status.no_annotation()])
}

pub fn list_resource_templates() -> ListResourceTemplatesResult {
    let greeting = RawResourceTemplate {
        uri_template: GREETING_TEMPLATE.to_string(),
        name: "greeting".to_string(),
        title: Some("Greeting".to_string()),
        description: Some("Personalized greeting".to_string()),
        mime_type: Some("text/plain".to_string()),
    }
    .no_annotation();

    ListResourceTemplatesResult::with_all_items(vec![greeting])
}

pub fn text_result(uri: &str, text: String) -> ReadResourceResult {
    ReadResourceResult {
        contents: vec![ResourceContents::text(text, uri)],
    }
}

pub fn status_text(status: &SessionStatus) -> DbResult<String> {
    serde_json::to_string_pretty(status)
        .map_err(|e| DbError::internal(format!("Failed to serialize session status: {}", e)))
}
