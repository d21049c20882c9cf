//! Lunar calendar tool — solar↔lunar conversion via the external
//! calendrical API. The conversion math itself is the API's problem.

use super::{Tool, ToolResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LunarTool {
    client: reqwest::Client,
    base_url: String,
}

impl LunarTool {
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
    /// Date to convert, YYYY-MM-DD.
    date: String,
    /// "to_lunar" (default) or "to_solar".
    #[serde(default = "default_direction")]
    direction: String,
}

fn default_direction() -> String {
    "to_lunar".to_string()
}

#[derive(Deserialize)]
struct ConversionResponse {
    /// e.g. "甲辰年 腊月初八"
    result: String,
    #[serde(default)]
    zodiac: Option<String>,
    #[serde(default)]
    ganzhi: Option<String>,
}

#[async_trait]
impl Tool for LunarTool {
    fn id(&self) -> &str {
        "lunar"
    }

    fn name(&self) -> &str {
        "农历转换"
    }

    fn description(&self) -> &str {
        "公历与农历日期互转，并返回生肖与干支。涉及农历、生肖、干支的问题必须调用本工具。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "date": {"type": "string", "description": "日期 YYYY-MM-DD"},
                "direction": {
                    "type": "string",
                    "enum": ["to_lunar", "to_solar"],
                    "description": "转换方向，默认公历转农历"
                }
            },
            "required": ["date"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let p: Params = serde_json::from_value(args).context("invalid lunar params")?;

        let response = self
            .client
            .get(format!("{}/convert", self.base_url))
            .query(&[("date", p.date.as_str()), ("direction", p.direction.as_str())])
            .send()
            .await
            .context("lunar conversion request failed")?;

        if !response.status().is_success() {
            return Ok(ToolResult::error(format!(
                "农历转换服务返回错误: {}",
                response.status()
            )));
        }

        let body: ConversionResponse = response
            .json()
            .await
            .context("unparseable lunar conversion response")?;

        let mut output = format!("{} 对应 {}", p.date, body.result);
        if let Some(zodiac) = body.zodiac {
            output.push_str(&format!("，生肖{zodiac}"));
        }
        if let Some(ganzhi) = body.ganzhi {
            output.push_str(&format!("，干支{ganzhi}"));
        }
        Ok(ToolResult::success(output))
    }
}
