use std::sync::Arc;

use kayzen_core::{ApiClient, ClientError, ReportRequest, ResultsWindow};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// The operations exposed as MCP tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolAction {
    CreateReport,
    GetReportStatus,
    GetReportResults,
    ListReports,
}

impl ToolAction {
    pub const ALL: [ToolAction; 4] = [
        ToolAction::CreateReport,
        ToolAction::GetReportStatus,
        ToolAction::GetReportResults,
        ToolAction::ListReports,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolAction::CreateReport => "create_report",
            ToolAction::GetReportStatus => "get_report_status",
            ToolAction::GetReportResults => "get_report_results",
            ToolAction::ListReports => "list_reports",
        }
    }

    /// Used in failure text: "Error <phrase>: <message>".
    pub fn phrase(self) -> &'static str {
        match self {
            ToolAction::CreateReport => "creating report",
            ToolAction::GetReportStatus => "getting report status",
            ToolAction::GetReportResults => "getting report results",
            ToolAction::ListReports => "listing reports",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.name() == name)
    }
}

#[derive(Debug, Error)]
pub enum ToolFailure {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("{message}")]
    InvalidArguments { field: String, message: String },
}

impl ToolFailure {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ToolFailure::InvalidArguments {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Text handed back to the calling agent. Failures are text too, flagged
/// with `is_error`; nothing is raised past this point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolText {
    pub text: String,
    pub is_error: bool,
}

impl ToolText {
    pub fn from_result(action: ToolAction, result: Result<Value, ToolFailure>) -> Self {
        match result {
            Ok(value) => ToolText {
                text: to_pretty_json(&value),
                is_error: false,
            },
            Err(err) => {
                tracing::warn!(tool = action.name(), error = %err, "tool call failed");
                ToolText {
                    text: format!("Error {}: {err}", action.phrase()),
                    is_error: true,
                }
            }
        }
    }
}

/// Tool front-end over the API client: one client call per tool.
#[derive(Clone)]
pub struct ReportTools {
    client: Arc<ApiClient>,
}

impl ReportTools {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub async fn create_report(
        &self,
        report_type: &str,
        start_date: &str,
        end_date: &str,
        dimensions: &[String],
        metrics: &[String],
    ) -> ToolText {
        let report = ReportRequest {
            report_type: report_type.to_string(),
            start_date: start_date.to_string(),
            end_date: end_date.to_string(),
            dimensions: dimensions.to_vec(),
            metrics: metrics.to_vec(),
        };
        let result = self.client.create_report(&report).await.map_err(Into::into);
        ToolText::from_result(ToolAction::CreateReport, result)
    }

    pub async fn get_report_status(&self, report_id: &str) -> ToolText {
        let result = self
            .client
            .get_report_status(report_id)
            .await
            .map_err(Into::into);
        ToolText::from_result(ToolAction::GetReportStatus, result)
    }

    pub async fn get_report_results(&self, report_id: &str, window: &ResultsWindow) -> ToolText {
        let result = self
            .client
            .get_report_results_in_window(report_id, window)
            .await
            .map_err(Into::into);
        ToolText::from_result(ToolAction::GetReportResults, result)
    }

    pub async fn list_reports(&self) -> ToolText {
        let result = self.client.list_reports().await.map_err(Into::into);
        ToolText::from_result(ToolAction::ListReports, result)
    }

    /// Dispatch a `tools/call` by name with raw JSON arguments.
    pub async fn call(&self, name: &str, args: &Map<String, Value>) -> ToolText {
        let Some(action) = ToolAction::from_name(name) else {
            return ToolText {
                text: format!("Error: unknown tool '{name}'"),
                is_error: true,
            };
        };
        tracing::debug!(tool = name, "tool call");

        match action {
            ToolAction::CreateReport => match create_report_args(args) {
                Ok(report) => {
                    self.create_report(
                        &report.report_type,
                        &report.start_date,
                        &report.end_date,
                        &report.dimensions,
                        &report.metrics,
                    )
                    .await
                }
                Err(err) => ToolText::from_result(action, Err(err)),
            },
            ToolAction::GetReportStatus => match required_string(args, "report_id") {
                Ok(report_id) => self.get_report_status(&report_id).await,
                Err(err) => ToolText::from_result(action, Err(err)),
            },
            ToolAction::GetReportResults => match results_args(args) {
                Ok((report_id, window)) => self.get_report_results(&report_id, &window).await,
                Err(err) => ToolText::from_result(action, Err(err)),
            },
            ToolAction::ListReports => self.list_reports().await,
        }
    }
}

#[derive(Debug)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    ToolAction::ALL
        .into_iter()
        .map(|action| match action {
            ToolAction::CreateReport => ToolDefinition {
                name: action.name(),
                description: "Create a new Kayzen report. Returns the created report, including its report_id.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "report_type": {
                            "type": "string",
                            "description": "Type of report (e.g. 'campaign', 'creative')"
                        },
                        "start_date": {
                            "type": "string",
                            "description": "Start date in YYYY-MM-DD format"
                        },
                        "end_date": {
                            "type": "string",
                            "description": "End date in YYYY-MM-DD format"
                        },
                        "dimensions": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Dimensions to include"
                        },
                        "metrics": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Metrics to include"
                        }
                    },
                    "required": ["report_type", "start_date", "end_date", "dimensions", "metrics"],
                    "additionalProperties": false
                }),
            },
            ToolAction::GetReportStatus => ToolDefinition {
                name: action.name(),
                description: "Get the status of a Kayzen report.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "report_id": {
                            "type": "string",
                            "description": "ID of the report to check"
                        }
                    },
                    "required": ["report_id"],
                    "additionalProperties": false
                }),
            },
            ToolAction::GetReportResults => ToolDefinition {
                name: action.name(),
                description: "Get the results of a completed Kayzen report, optionally limited to a date range.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "report_id": {
                            "type": "string",
                            "description": "ID of the report to fetch results for"
                        },
                        "start_date": {
                            "type": "string",
                            "description": "Only results from this date (YYYY-MM-DD)"
                        },
                        "end_date": {
                            "type": "string",
                            "description": "Only results up to this date (YYYY-MM-DD)"
                        }
                    },
                    "required": ["report_id"],
                    "additionalProperties": false
                }),
            },
            ToolAction::ListReports => ToolDefinition {
                name: action.name(),
                description: "List reports available to this account.",
                input_schema: json!({
                    "type": "object",
                    "properties": {},
                    "additionalProperties": false
                }),
            },
        })
        .collect()
}

fn create_report_args(args: &Map<String, Value>) -> Result<ReportRequest, ToolFailure> {
    Ok(ReportRequest {
        report_type: required_str(args, "report_type")?,
        start_date: required_str(args, "start_date")?,
        end_date: required_str(args, "end_date")?,
        dimensions: required_string_array(args, "dimensions")?,
        metrics: required_string_array(args, "metrics")?,
    })
}

fn results_args(args: &Map<String, Value>) -> Result<(String, ResultsWindow), ToolFailure> {
    let report_id = required_string(args, "report_id")?;
    let window = ResultsWindow {
        start_date: arg_optional_string(args, "start_date")?,
        end_date: arg_optional_string(args, "end_date")?,
    };
    Ok((report_id, window))
}

// Any string is forwarded as given; the API owns validation of the value.
fn required_str(args: &Map<String, Value>, key: &str) -> Result<String, ToolFailure> {
    let value = args
        .get(key)
        .ok_or_else(|| ToolFailure::invalid(key, format!("Missing required field '{key}'")))?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ToolFailure::invalid(key, format!("'{key}' must be a string")))
}

fn required_string(args: &Map<String, Value>, key: &str) -> Result<String, ToolFailure> {
    let value = required_str(args, key)?;
    if value.trim().is_empty() {
        return Err(ToolFailure::invalid(key, format!("'{key}' must not be empty")));
    }
    Ok(value)
}

fn arg_optional_string(args: &Map<String, Value>, key: &str) -> Result<Option<String>, ToolFailure> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(v)) if v.trim().is_empty() => Ok(None),
        Some(Value::String(v)) => Ok(Some(v.clone())),
        Some(_) => Err(ToolFailure::invalid(key, format!("'{key}' must be a string"))),
    }
}

// Items are forwarded as given; the API owns their validation.
fn required_string_array(args: &Map<String, Value>, key: &str) -> Result<Vec<String>, ToolFailure> {
    let value = args
        .get(key)
        .ok_or_else(|| ToolFailure::invalid(key, format!("Missing required field '{key}'")))?;
    let items = value
        .as_array()
        .ok_or_else(|| ToolFailure::invalid(key, format!("'{key}' must be an array of strings")))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| ToolFailure::invalid(key, format!("'{key}' items must be strings")))
        })
        .collect()
}

pub(crate) fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}
