use std::sync::Arc;

use clap::{Args, Subcommand};
use kayzen_core::client::{DEFAULT_BASE_URL, DEFAULT_HTTP_TIMEOUT_SECS};
use kayzen_core::token::{DEFAULT_TOKEN_TTL_SECS, MAX_TOKEN_TTL_SECS};
use kayzen_core::{ApiClient, ClientError, ClientOptions, Credentials};
use serde_json::{Map, Value, json};
use tokio::io::{self, AsyncBufRead, AsyncWrite, BufReader};
use tracing::Instrument;
use uuid::Uuid;

pub mod prompts;
pub mod tools;
mod transport;

use prompts::{find_prompt, prompt_definitions};
use tools::{ReportTools, to_pretty_json, tool_definitions};
use transport::{Framing, read_message, write_message};

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "kayzen-mcp";

/// Where the Kayzen API lives and how to authenticate against it.
#[derive(Args, Clone)]
pub struct ConnectionArgs {
    /// Kayzen API base URL
    #[arg(long, env = "KAYZEN_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// API key exchanged for a bearer token
    #[arg(long, env = "KAYZEN_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// API secret exchanged for a bearer token
    #[arg(long, env = "KAYZEN_API_SECRET", hide_env_values = true)]
    pub api_secret: String,

    /// Token lifetime in seconds when the auth endpoint does not declare one
    #[arg(
        long,
        env = "KAYZEN_TOKEN_TTL_SECS",
        default_value_t = DEFAULT_TOKEN_TTL_SECS,
        value_parser = clap::value_parser!(i64).range(1..=MAX_TOKEN_TTL_SECS)
    )]
    pub token_ttl_secs: i64,

    /// Per-request HTTP timeout in seconds
    #[arg(long, env = "KAYZEN_HTTP_TIMEOUT_SECS", default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)]
    pub http_timeout_secs: u64,
}

impl ConnectionArgs {
    pub fn build_client(&self) -> Result<ApiClient, ClientError> {
        ApiClient::new(
            Credentials {
                base_url: self.base_url.clone(),
                api_key: self.api_key.clone(),
                api_secret: self.api_secret.clone(),
            },
            ClientOptions {
                default_token_ttl: chrono::Duration::seconds(self.token_ttl_secs),
                http_timeout: std::time::Duration::from_secs(self.http_timeout_secs),
            },
        )
    }
}

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the Kayzen MCP server over stdio
    Serve,
    /// Exchange credentials once and print a readiness report
    Diagnose,
}

pub async fn run(connection: &ConnectionArgs, command: McpCommands) -> i32 {
    let client = match connection.build_client() {
        Ok(client) => Arc::new(client),
        Err(err) => {
            let payload = json!({
                "error": "invalid_configuration",
                "message": err.to_string(),
            });
            eprintln!("{}", to_pretty_json(&payload));
            return 1;
        }
    };

    match command {
        McpCommands::Serve => {
            let server = McpServer::new(client);
            match server.serve_stdio().await {
                Ok(()) => 0,
                Err(err) => {
                    tracing::error!(error = %err, "mcp server stopped");
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err,
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
        McpCommands::Diagnose => match diagnose(&client).await {
            Ok(report) => {
                println!("{}", to_pretty_json(&report));
                0
            }
            Err(err) => {
                let code = if err.is_auth() {
                    "auth_failed"
                } else {
                    "connection_error"
                };
                let payload = json!({
                    "error": code,
                    "message": err.to_string(),
                    "base_url": client.base_url(),
                });
                eprintln!("{}", to_pretty_json(&payload));
                1
            }
        },
    }
}

/// One credential exchange; the report never includes the token itself.
async fn diagnose(client: &ApiClient) -> Result<Value, ClientError> {
    client.get_auth_token().await?;
    Ok(json!({
        "status": "ready",
        "server": MCP_SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "base_url": client.base_url(),
        "token": {
            "phase": client.token_phase().await.as_str(),
            "expires_at": client.token_expires_at().await,
        }
    }))
}

pub struct McpServer {
    tools: ReportTools,
    session_id: String,
}

impl McpServer {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            tools: ReportTools::new(client),
            session_id: format!("stdio-{}", Uuid::now_v7()),
        }
    }

    pub async fn serve_stdio(&self) -> Result<(), String> {
        let mut reader = BufReader::new(io::stdin());
        let mut stdout = io::stdout();
        self.serve(&mut reader, &mut stdout).await
    }

    /// Answer messages from `reader` on `writer` until EOF.
    pub async fn serve<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let span = tracing::info_span!("mcp_session", session_id = %self.session_id);
        async {
            tracing::info!(
                server = MCP_SERVER_NAME,
                version = env!("CARGO_PKG_VERSION"),
                base_url = self.tools.client().base_url(),
                "mcp server ready"
            );

            loop {
                let incoming = read_message(reader)
                    .await
                    .map_err(|e| format!("Failed to read MCP message: {e}"))?;
                let Some(incoming) = incoming else {
                    break;
                };

                let responses = match incoming.payload {
                    Ok(message) => self.handle_incoming_message(message).await,
                    Err(parse_error) => vec![error_response(
                        Value::Null,
                        RpcError::parse_error(parse_error),
                    )],
                };
                for response in responses {
                    write_message(writer, &response, incoming.framing)
                        .await
                        .map_err(|e| format!("Failed to write MCP response: {e}"))?;
                }
            }

            tracing::info!("stdin closed, mcp server exiting");
            Ok(())
        }
        .instrument(span)
        .await
    }

    pub async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // A client response; this server never issues requests.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        if let Some(id) = obj.get("id").cloned() {
            let result = self.handle_request(method, params).await;
            Some(match result {
                Ok(payload) => success_response(id, payload),
                Err(err) => {
                    tracing::debug!(method, code = err.code, error = %err.message, "rpc error");
                    error_response(id, err)
                }
            })
        } else {
            tracing::trace!(method, "notification ignored");
            None
        }
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "prompts/list" => Ok(prompts_list_payload()),
            "prompts/get" => handle_prompts_get(params),
            "resources/list" => Ok(json!({ "resources": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "prompts": { "listChanged": false },
                "resources": { "listChanged": false }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Kayzen Analytics reporting. Start a report with create_report, poll get_report_status with the returned report id until it is complete, then fetch get_report_results. Use list_reports to find existing reports. Tool failures come back as text starting with 'Error'."
        })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        let output = self.tools.call(name, &args).await;
        let mut result = json!({
            "content": [{ "type": "text", "text": output.text }]
        });
        if output.is_error {
            result["isError"] = json!(true);
        }
        Ok(result)
    }
}

fn tools_list_payload() -> Value {
    let tools: Vec<Value> = tool_definitions()
        .into_iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": tool.input_schema,
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn prompts_list_payload() -> Value {
    let prompts: Vec<Value> = prompt_definitions()
        .iter()
        .map(|prompt| prompt.to_list_entry())
        .collect();
    json!({ "prompts": prompts })
}

fn handle_prompts_get(params: Value) -> Result<Value, RpcError> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("prompts/get requires string field 'name'"))?;
    find_prompt(name)
        .map(|prompt| prompt.to_get_result())
        .ok_or_else(|| RpcError::invalid_params(format!("Unknown prompt '{name}'")))
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: format!("Parse error: {}", message.into()),
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}

#[cfg(test)]
mod tests {
    use kayzen_core::testing::FakeApi;
    use serde_json::{Value, json};

    use super::*;

    async fn server_with_fake() -> (McpServer, FakeApi) {
        let fake = FakeApi::start().await;
        let client = ApiClient::new(fake.credentials(), ClientOptions::default()).unwrap();
        (McpServer::new(Arc::new(client)), fake)
    }

    fn unreachable_server() -> McpServer {
        let client = ApiClient::new(
            Credentials {
                base_url: "http://127.0.0.1:9".to_string(),
                api_key: "k".to_string(),
                api_secret: "s".to_string(),
            },
            ClientOptions::default(),
        )
        .unwrap();
        McpServer::new(Arc::new(client))
    }

    async fn single(server: &McpServer, message: Value) -> Value {
        let mut responses = server.handle_incoming_message(message).await;
        assert_eq!(responses.len(), 1);
        responses.remove(0)
    }

    #[tokio::test]
    async fn initialize_advertises_tools_and_prompts() {
        let server = unreachable_server();
        let response = single(
            &server,
            json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }),
        )
        .await;

        let result = &response["result"];
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "kayzen-mcp");
        assert!(result["capabilities"]["tools"].is_object());
        assert!(result["capabilities"]["prompts"].is_object());
        assert!(
            result["instructions"]
                .as_str()
                .unwrap()
                .contains("get_report_status")
        );
    }

    #[tokio::test]
    async fn tools_list_exposes_report_tools() {
        let server = unreachable_server();
        let response = single(
            &server,
            json!({ "jsonrpc": "2.0", "id": "a", "method": "tools/list" }),
        )
        .await;

        assert_eq!(response["id"], "a");
        let names: Vec<&str> = response["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "create_report",
                "get_report_status",
                "get_report_results",
                "list_reports"
            ]
        );
    }

    #[tokio::test]
    async fn tools_call_returns_pretty_json_text() {
        let (server, fake) = server_with_fake().await;
        fake.respond(
            "GET",
            "/reports/r123/status",
            200,
            json!({ "report_id": "r123", "status": "completed" }),
        );

        let response = single(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": { "name": "get_report_status", "arguments": { "report_id": "r123" } }
            }),
        )
        .await;

        let result = &response["result"];
        assert!(result.get("isError").is_none());
        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains('\n'));
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed, json!({ "report_id": "r123", "status": "completed" }));

        let call = &fake.requests()[0];
        assert_eq!(call.method, "GET");
        assert_eq!(call.path, "/reports/r123/status");
        assert_eq!(call.body, None);
    }

    #[tokio::test]
    async fn tools_call_failure_is_text_result_not_rpc_error() {
        let (server, fake) = server_with_fake().await;
        fake.set_auth_status(401);

        let response = single(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": {
                    "name": "create_report",
                    "arguments": {
                        "report_type": "campaign",
                        "start_date": "2024-01-01",
                        "end_date": "2024-01-07",
                        "dimensions": ["campaign_id"],
                        "metrics": ["impressions"]
                    }
                }
            }),
        )
        .await;

        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["isError"], true);
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("Error creating report: "));
    }

    #[tokio::test]
    async fn tools_call_rejects_non_object_arguments() {
        let server = unreachable_server();
        let response = single(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 5,
                "method": "tools/call",
                "params": { "name": "list_reports", "arguments": [1] }
            }),
        )
        .await;
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn prompts_get_returns_static_template() {
        let server = unreachable_server();
        let listed = single(
            &server,
            json!({ "jsonrpc": "2.0", "id": 6, "method": "prompts/list" }),
        )
        .await;
        assert_eq!(listed["result"]["prompts"].as_array().unwrap().len(), 2);

        let response = single(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "prompts/get",
                "params": { "name": "create_campaign_report" }
            }),
        )
        .await;
        let text = response["result"]["messages"][0]["content"]["text"]
            .as_str()
            .unwrap();
        assert!(text.contains("Report type: campaign"));

        let missing = single(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 8,
                "method": "prompts/get",
                "params": { "name": "nope" }
            }),
        )
        .await;
        assert_eq!(missing["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn protocol_errors_use_jsonrpc_codes() {
        let server = unreachable_server();

        let unknown = single(
            &server,
            json!({ "jsonrpc": "2.0", "id": 9, "method": "sampling/createMessage" }),
        )
        .await;
        assert_eq!(unknown["error"]["code"], -32601);

        let wrong_version = single(&server, json!({ "jsonrpc": "1.0", "id": 10, "method": "ping" })).await;
        assert_eq!(wrong_version["error"]["code"], -32600);
        assert_eq!(wrong_version["id"], 10);

        let empty_batch = single(&server, json!([])).await;
        assert_eq!(empty_batch["error"]["code"], -32600);

        let not_object = single(&server, json!("ping")).await;
        assert_eq!(not_object["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn notifications_and_client_responses_get_no_reply() {
        let server = unreachable_server();
        let responses = server
            .handle_incoming_message(json!([
                { "jsonrpc": "2.0", "method": "notifications/initialized" },
                { "jsonrpc": "2.0", "id": 11, "result": {} },
                { "jsonrpc": "2.0", "id": 12, "method": "ping" }
            ]))
            .await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 12);
        assert_eq!(responses[0]["result"], json!({}));
    }

    #[tokio::test]
    async fn serve_answers_in_the_framing_it_was_asked_in() {
        let server = unreachable_server();
        let framed_body = r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#;
        let input = format!(
            "{}\n{{oops\nContent-Length: {}\r\n\r\n{framed_body}",
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            framed_body.len()
        );
        let mut reader = BufReader::new(input.as_bytes());
        let mut output = Vec::new();

        server.serve(&mut reader, &mut output).await.unwrap();

        let output = String::from_utf8(output).unwrap();
        let mut lines = output.lines();
        let first: Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(first["id"], 1);
        let parse_error: Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(parse_error["error"]["code"], -32700);
        assert!(lines.next().unwrap().starts_with("Content-Length: "));

        let (_, framed) = output.split_once("\r\n\r\n").unwrap();
        let framed: Value = serde_json::from_str(framed).unwrap();
        assert_eq!(framed["id"], 2);
        assert_eq!(framed["result"], json!({}));
    }

    #[tokio::test]
    async fn diagnose_reports_valid_token_without_leaking_it() {
        let fake = FakeApi::start().await;
        let client = ApiClient::new(fake.credentials(), ClientOptions::default()).unwrap();

        let report = diagnose(&client).await.unwrap();
        assert_eq!(report["status"], "ready");
        assert_eq!(report["token"]["phase"], "valid");
        assert!(report["token"]["expires_at"].is_string());
        assert!(!report.to_string().contains("token-1"));
    }

    #[derive(clap::Parser)]
    struct ConnectionCli {
        #[command(flatten)]
        connection: ConnectionArgs,
    }

    #[test]
    fn token_ttl_flag_is_bounded() {
        use clap::Parser;

        let parse = |ttl: &str| {
            ConnectionCli::try_parse_from([
                "kayzen-mcp",
                "--api-key",
                "k",
                "--api-secret",
                "s",
                "--token-ttl-secs",
                ttl,
            ])
        };

        let max = MAX_TOKEN_TTL_SECS.to_string();
        assert_eq!(parse(&max).unwrap().connection.token_ttl_secs, MAX_TOKEN_TTL_SECS);
        assert!(parse("0").is_err());
        assert!(parse(&(MAX_TOKEN_TTL_SECS + 1).to_string()).is_err());
        assert!(parse("10000000000000").is_err());
    }

    #[tokio::test]
    async fn diagnose_surfaces_auth_failure() {
        let fake = FakeApi::start().await;
        fake.set_auth_status(403);
        let client = ApiClient::new(fake.credentials(), ClientOptions::default()).unwrap();

        let err = diagnose(&client).await.unwrap_err();
        assert!(err.is_auth());
    }
}
