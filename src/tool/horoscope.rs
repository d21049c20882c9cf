//! Horoscope tool — zodiac-sign fortune lookup via the external API.

use super::{Tool, ToolResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const SIGNS: &[&str] = &[
    "白羊座", "金牛座", "双子座", "巨蟹座", "狮子座", "处女座", "天秤座", "天蝎座", "射手座",
    "摩羯座", "水瓶座", "双鱼座",
];

pub struct HoroscopeTool {
    client: reqwest::Client,
    base_url: String,
}

impl HoroscopeTool {
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
    /// Zodiac sign, e.g. "天蝎座".
    sign: String,
    /// "today" | "tomorrow" | "week" | "month"
    #[serde(default = "default_period")]
    period: String,
}

fn default_period() -> String {
    "today".to_string()
}

#[derive(Deserialize)]
struct HoroscopeResponse {
    summary: String,
    #[serde(default)]
    lucky_color: Option<String>,
    #[serde(default)]
    lucky_number: Option<u32>,
}

#[async_trait]
impl Tool for HoroscopeTool {
    fn id(&self) -> &str {
        "horoscope"
    }

    fn name(&self) -> &str {
        "星座运势"
    }

    fn description(&self) -> &str {
        "查询十二星座的今日/明日/本周/本月运势。用户问星座运势时必须调用本工具。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sign": {"type": "string", "description": "星座名，如 天蝎座"},
                "period": {
                    "type": "string",
                    "enum": ["today", "tomorrow", "week", "month"],
                    "description": "查询周期，默认 today"
                }
            },
            "required": ["sign"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let p: Params = serde_json::from_value(args).context("invalid horoscope params")?;
        if !SIGNS.contains(&p.sign.as_str()) {
            return Ok(ToolResult::error(format!(
                "未知星座「{}」，应为十二星座之一，如：{}",
                p.sign, SIGNS[0]
            )));
        }

        let response = self
            .client
            .get(format!("{}/fortune", self.base_url))
            .query(&[("sign", p.sign.as_str()), ("period", p.period.as_str())])
            .send()
            .await
            .context("horoscope request failed")?;

        if !response.status().is_success() {
            return Ok(ToolResult::error(format!(
                "运势服务返回错误: {}",
                response.status()
            )));
        }

        let body: HoroscopeResponse = response
            .json()
            .await
            .context("unparseable horoscope response")?;

        let mut output = format!("{}运势：{}", p.sign, body.summary);
        if let Some(color) = body.lucky_color {
            output.push_str(&format!(" 幸运色：{color}。"));
        }
        if let Some(number) = body.lucky_number {
            output.push_str(&format!(" 幸运数字：{number}。"));
        }
        Ok(ToolResult::success(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_sign_is_a_soft_error() {
        let tool = HoroscopeTool::new("http://localhost:1");
        let result = tool.execute(json!({"sign": "蛇夫座"})).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("未知星座"));
    }
}
