//! Almanac (黄历) tool — daily yi/ji and auspicious-hour lookup via the
//! external calendrical API.

use super::{Tool, ToolResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AlmanacTool {
    client: reqwest::Client,
    base_url: String,
}

impl AlmanacTool {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Deserialize)]
struct Params {
    /// Date to look up, YYYY-MM-DD.
    date: String,
}

#[derive(Deserialize)]
struct AlmanacResponse {
    #[serde(default)]
    lunar_date: Option<String>,
    /// 宜 — favorable activities.
    #[serde(default)]
    yi: Vec<String>,
    /// 忌 — unfavorable activities.
    #[serde(default)]
    ji: Vec<String>,
    #[serde(default)]
    lucky_hours: Option<String>,
}

#[async_trait]
impl Tool for AlmanacTool {
    fn id(&self) -> &str {
        "almanac"
    }

    fn name(&self) -> &str {
        "黄历宜忌"
    }

    fn description(&self) -> &str {
        "查询某天的黄历宜忌与吉时。用户问择日、宜忌、黄道吉日时必须调用本工具。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "date": {"type": "string", "description": "日期 YYYY-MM-DD"}
            },
            "required": ["date"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let p: Params = serde_json::from_value(args).context("invalid almanac params")?;

        let response = self
            .client
            .get(format!("{}/daily", self.base_url))
            .query(&[("date", p.date.as_str())])
            .send()
            .await
            .context("almanac request failed")?;

        if !response.status().is_success() {
            return Ok(ToolResult::error(format!(
                "黄历服务返回错误: {}",
                response.status()
            )));
        }

        let body: AlmanacResponse = response
            .json()
            .await
            .context("unparseable almanac response")?;

        let mut output = format!("{}黄历", p.date);
        if let Some(lunar) = body.lunar_date {
            output.push_str(&format!("（{lunar}）"));
        }
        output.push_str(&format!(
            "：宜 {}；忌 {}",
            join_or_none(&body.yi),
            join_or_none(&body.ji)
        ));
        if let Some(hours) = body.lucky_hours {
            output.push_str(&format!("；吉时 {hours}"));
        }
        Ok(ToolResult::success(output))
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "无".to_string()
    } else {
        items.join("、")
    }
}
