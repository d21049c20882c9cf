//! Date/time tool — current date, weekday, and day arithmetic. Purely local.

use super::{Tool, ToolResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Duration, Local, NaiveDate};
use serde::Deserialize;
use serde_json::{Value, json};

pub struct DateTimeTool;

impl DateTimeTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DateTimeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct Params {
    /// "now" | "offset" | "weekday"
    #[serde(default = "default_op")]
    op: String,
    /// Base date (YYYY-MM-DD) for offset/weekday; defaults to today.
    #[serde(default)]
    date: Option<String>,
    /// Day offset for op = "offset".
    #[serde(default)]
    days: i64,
}

fn default_op() -> String {
    "now".to_string()
}

const WEEKDAYS: [&str; 7] = [
    "星期一", "星期二", "星期三", "星期四", "星期五", "星期六", "星期日",
];

fn describe(date: NaiveDate) -> String {
    let weekday = WEEKDAYS[date.weekday().num_days_from_monday() as usize];
    format!("{}年{:02}月{:02}日 {}", date.year(), date.month(), date.day(), weekday)
}

#[async_trait]
impl Tool for DateTimeTool {
    fn id(&self) -> &str {
        "datetime"
    }

    fn name(&self) -> &str {
        "日期时间"
    }

    fn description(&self) -> &str {
        "获取当前日期时间，或计算某个日期偏移若干天后的日期与星期。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "op": {
                    "type": "string",
                    "enum": ["now", "offset", "weekday"],
                    "description": "now=当前时间, offset=日期加减天数, weekday=查星期"
                },
                "date": {"type": "string", "description": "基准日期 YYYY-MM-DD，默认今天"},
                "days": {"type": "integer", "description": "偏移天数，可为负"}
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let p: Params = serde_json::from_value(args).context("invalid datetime params")?;
        let base = match &p.date {
            Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("unparseable date '{s}'"))?,
            None => Local::now().date_naive(),
        };

        let output = match p.op.as_str() {
            "now" => {
                let now = Local::now();
                format!("现在是{}，{}", describe(now.date_naive()), now.format("%H:%M"))
            }
            "offset" => {
                let target = base + Duration::days(p.days);
                format!("{}偏移{}天后是{}", describe(base), p.days, describe(target))
            }
            "weekday" => describe(base),
            other => return Ok(ToolResult::error(format!("未知操作: {other}"))),
        };
        Ok(ToolResult::success(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn offset_crosses_month_boundary() {
        let tool = DateTimeTool::new();
        let result = tool
            .execute(json!({"op": "offset", "date": "2024-01-30", "days": 3}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("2024年02月02日"));
    }

    #[tokio::test]
    async fn weekday_is_reported_in_chinese() {
        let tool = DateTimeTool::new();
        let result = tool
            .execute(json!({"op": "weekday", "date": "2024-06-10"}))
            .await
            .unwrap();
        // 2024-06-10 was a Monday.
        assert!(result.output.contains("星期一"));
    }

    #[tokio::test]
    async fn bad_date_is_an_error() {
        let tool = DateTimeTool::new();
        assert!(tool
            .execute(json!({"op": "weekday", "date": "not-a-date"}))
            .await
            .is_err());
    }
}
