//! MCP service implementation using rmcp.
//!
//! `DbService` exposes the session tools and resources over MCP. Every tool
//! reports failures in-band: the result carries the failure description and
//! `is_error`, never a protocol error.

use crate::db::PgConnector;
use crate::mcp::resources::{self, ResourceRequest};
use crate::session::SessionManager;
use crate::tools::{
    self, CompareTablesInput, ConnectInput, CreateDatabaseInput, DatabaseToolHandler,
    DescribeTableInput, ExecuteQueryInput, ExecuteQueryWithParamsInput, FindManyInput,
    FindOneInput, ListTablesInput, QueryToolHandler, SchemaToolHandler, UseDatabaseInput,
};
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{
        CallToolResult, Implementation, ListResourceTemplatesResult, ListResourcesResult,
        PaginatedRequestParam, ProtocolVersion, ReadResourceRequestParam, ReadResourceResult,
        ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router,
};
use std::sync::Arc;
use tracing::debug;

/// MCP server over a single process-wide connection session.
#[derive(Clone)]
pub struct DbService {
    /// Shared session; every client of this process sees the same current database
    session: Arc<SessionManager<PgConnector>>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl DbService {
    pub fn new(session: Arc<SessionManager<PgConnector>>) -> Self {
        Self {
            session,
            tool_router: Self::tool_router(),
        }
    }

    fn database_tools(&self) -> DatabaseToolHandler<PgConnector> {
        DatabaseToolHandler::new(self.session.clone())
    }

    fn query_tools(&self) -> QueryToolHandler<PgConnector> {
        QueryToolHandler::new(self.session.clone())
    }

    fn schema_tools(&self) -> SchemaToolHandler<PgConnector> {
        SchemaToolHandler::new(self.session.clone())
    }

    async fn read(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        match ResourceRequest::parse(uri) {
            Some(ResourceRequest::Greeting(name)) => {
                Ok(resources::text_result(uri, resources::greeting(&name)))
            }
            Some(ResourceRequest::Status) => {
                let status = self.session.status().await;
                let text = resources::status_text(&status)?;
                Ok(resources::text_result(uri, text))
            }
            None => Err(McpError::resource_not_found(
                format!("Unknown resource: {}", uri),
                None,
            )),
        }
    }
}

#[tool_router]
impl DbService {
    #[tool(
        description = "Connect to the database server.\nOpens a connection to the default database (main) and makes it current.\nA dsn or instance given here becomes the default for every later connection, including use_database."
    )]
    async fn connect(
        &self,
        Parameters(input): Parameters<ConnectInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tools::CONNECT.respond(self.database_tools().connect(input).await))
    }

    #[tool(description = "List all databases on the server as a JSON array of names.")]
    async fn list_databases(&self) -> Result<CallToolResult, McpError> {
        Ok(tools::LIST_DATABASES.respond(self.database_tools().list_databases().await))
    }

    #[tool(
        description = "Show the current database.\nAsks the server when connected, otherwise reports the database the session has on record."
    )]
    async fn current_database(&self) -> Result<CallToolResult, McpError> {
        Ok(tools::CURRENT_DATABASE.respond(self.database_tools().current_database().await))
    }

    #[tool(
        description = "Create a new database.\nSet switch_to to make it the current database afterwards."
    )]
    async fn create_database(
        &self,
        Parameters(input): Parameters<CreateDatabaseInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tools::CREATE_DATABASE.respond(self.database_tools().create_database(input).await))
    }

    #[tool(
        description = "Switch the current database.\nReuses an open connection to that database when it is still alive, otherwise connects with the default connection parameters.\nFails without changing anything if the database does not exist."
    )]
    async fn use_database(
        &self,
        Parameters(input): Parameters<UseDatabaseInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tools::USE_DATABASE.respond(self.database_tools().use_database(input).await))
    }

    #[tool(
        description = "Execute SQL against the current database and return the rows as JSON.\nStatements that return no rows produce an empty array."
    )]
    async fn execute_query(
        &self,
        Parameters(input): Parameters<ExecuteQueryInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tools::EXECUTE_QUERY.respond(self.query_tools().execute_query(input).await))
    }

    #[tool(
        description = "Execute SQL with named parameters.\nWrite placeholders as $name and pass values as a JSON object, e.g. query: SELECT * FROM users WHERE id = $id, params: {\"id\": 1}.\nUse casts such as $id::uuid when the column type cannot be inferred."
    )]
    async fn execute_query_with_params(
        &self,
        Parameters(input): Parameters<ExecuteQueryWithParamsInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tools::EXECUTE_QUERY_WITH_PARAMS
            .respond(self.query_tools().execute_query_with_params(input).await))
    }

    #[tool(
        description = "Find the first row of a table matching a filter.\nReturns the row as a JSON object or \"No matching record found\"."
    )]
    async fn find_one(
        &self,
        Parameters(input): Parameters<FindOneInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tools::FIND_ONE.respond(self.query_tools().find_one(input).await))
    }

    #[tool(
        description = "Find rows of a table with optional filter, ordering, limit and offset.\nReturns a JSON array."
    )]
    async fn find_many(
        &self,
        Parameters(input): Parameters<FindManyInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tools::FIND_MANY.respond(self.query_tools().find_many(input).await))
    }

    #[tool(
        description = "List tables and views in the current database.\nSystem schemas are left out unless include_system is set."
    )]
    async fn list_tables(
        &self,
        Parameters(input): Parameters<ListTablesInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tools::LIST_TABLES.respond(self.schema_tools().list_tables(input).await))
    }

    #[tool(
        description = "Describe a table: columns, constraints, foreign keys and indexes.\nAccepts schema.table or a separate schema argument (default: public)."
    )]
    async fn describe_table(
        &self,
        Parameters(input): Parameters<DescribeTableInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tools::DESCRIBE_TABLE.respond(self.schema_tools().describe_table(input).await))
    }

    #[tool(
        description = "Compare the columns and foreign keys of two tables in the current database.\nReports columns missing on either side and differences in type or nullability.\nForeign keys are matched by their columns and compared by referenced table, columns and actions."
    )]
    async fn compare_tables(
        &self,
        Parameters(input): Parameters<CompareTablesInput>,
    ) -> Result<CallToolResult, McpError> {
        Ok(tools::COMPARE_TABLES.respond(self.schema_tools().compare_tables(input).await))
    }
}

#[tool_handler]
impl ServerHandler for DbService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "session-db-mcp".to_owned(),
                title: Some("Session Database MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Database tools over a single connection session.\n\
                \n\
                ## Workflow\n\
                1. Call `connect` (optionally with `dsn` or `instance`) to open the default database\n\
                2. Use `list_databases` and `use_database` to move between databases\n\
                3. Query with `execute_query`, `execute_query_with_params`, `find_one` or `find_many`\n\
                \n\
                ## Session\n\
                - The session is shared by every client of this server process\n\
                - `use_database` changes the current database for all later calls\n\
                - Connections are kept per database and reused; a dead connection is re-established on switch\n\
                \n\
                ## Errors\n\
                Failures are returned as tool results with a hint on how to fix them.\n\
                If you see \"Not connected to database\", call `connect` first."
                    .to_string(),
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(resources::list_resources())
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        Ok(resources::list_resource_templates())
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        debug!(uri = %request.uri, "read_resource");
        self.read(&request.uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConnectionParameters;
    use rmcp::model::ResourceContents;

    fn create_test_service() -> DbService {
        let session = Arc::new(SessionManager::new(
            PgConnector::default(),
            ConnectionParameters::default(),
        ));
        DbService::new(session)
    }

    fn text_of(result: &CallToolResult) -> String {
        result.content[0]
            .as_text()
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_server_info() {
        let service = create_test_service();
        let info = service.get_info();
        assert_eq!(info.server_info.name, "session-db-mcp");
        assert!(info.capabilities.tools.is_some());
        assert!(info.capabilities.resources.is_some());
    }

    #[test]
    fn test_all_tools_registered() {
        let service = create_test_service();
        let names: Vec<String> = service
            .tool_router
            .list_all()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        for expected in [
            "connect",
            "list_databases",
            "current_database",
            "create_database",
            "use_database",
            "execute_query",
            "execute_query_with_params",
            "find_one",
            "find_many",
            "list_tables",
            "describe_table",
            "compare_tables",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing tool {}", expected);
        }
    }

    #[tokio::test]
    async fn test_tools_before_connect_report_in_band() {
        let service = create_test_service();
        let result = service
            .execute_query(Parameters(ExecuteQueryInput {
                query: "SELECT 1".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
        let text = text_of(&result);
        assert!(text.starts_with("Execute query failed: Not connected to database 'main'"));
        assert!(text.contains("connect tool"));
    }

    #[tokio::test]
    async fn test_current_database_without_connection() {
        let service = create_test_service();
        let result = service.current_database().await.unwrap();
        assert_eq!(result.is_error, Some(false));
        assert_eq!(
            text_of(&result),
            "Could not query the server; session records current database: main"
        );
    }

    #[tokio::test]
    async fn test_read_greeting_and_status() {
        let service = create_test_service();

        let greeting = service.read("greeting://Ada").await.unwrap();
        match &greeting.contents[0] {
            ResourceContents::TextResourceContents { text, .. } => {
                assert!(text.starts_with("Hello, Ada!"));
            }
            other => panic!("unexpected contents: {:?}", other),
        }

        let status = service.read(resources::STATUS_URI).await.unwrap();
        match &status.contents[0] {
            ResourceContents::TextResourceContents { text, .. } => {
                assert!(text.contains("\"current_database\": \"main\""));
                assert!(text.contains("\"current_connected\": false"));
            }
            other => panic!("unexpected contents: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_unknown_resource() {
        let service = create_test_service();
        assert!(service.read("nope://x").await.is_err());
    }
}
