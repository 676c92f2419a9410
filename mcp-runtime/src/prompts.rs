use serde_json::{Value, json};

#[derive(Debug)]
pub struct PromptDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub text: &'static str,
}

impl PromptDefinition {
    pub fn to_list_entry(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "arguments": []
        })
    }

    /// `prompts/get` result: the template as a single user message.
    pub fn to_get_result(&self) -> Value {
        json!({
            "description": self.description,
            "messages": [{
                "role": "user",
                "content": { "type": "text", "text": self.text }
            }]
        })
    }
}

const CAMPAIGN_REPORT: &str = "Please help me create a campaign performance report with the following specifications:

1. Report type: campaign
2. Time period: Last 7 days
3. Dimensions: campaign_id, campaign_name
4. Metrics: impressions, clicks, spend, ctr, cpc

Please use the create_report tool with these parameters.";

// `{report_id}` is left for the user to fill in.
const ANALYZE_RESULTS: &str = "I have a report with ID {report_id}. Please:

1. Check the report status
2. If it's complete, fetch and analyze the results
3. Provide insights about:
   - Top performing campaigns
   - Areas for optimization
   - Unusual patterns or anomalies";

pub fn prompt_definitions() -> Vec<PromptDefinition> {
    vec![
        PromptDefinition {
            name: "create_campaign_report",
            description: "Template for creating a campaign performance report",
            text: CAMPAIGN_REPORT,
        },
        PromptDefinition {
            name: "analyze_report_results",
            description: "Template for analyzing report results",
            text: ANALYZE_RESULTS,
        },
    ]
}

pub fn find_prompt(name: &str) -> Option<PromptDefinition> {
    prompt_definitions().into_iter().find(|p| p.name == name)
}
