//! Real-estate listings tool — on-sale property search via the external
//! listings API.

use super::{Tool, ToolResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct ListingsTool {
    client: reqwest::Client,
    base_url: String,
}

impl ListingsTool {
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
    /// City name, e.g. "东莞".
    city: String,
    /// Optional district filter.
    #[serde(default)]
    district: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    5
}

#[derive(Deserialize)]
struct ListingsResponse {
    #[serde(default)]
    items: Vec<Listing>,
}

#[derive(Deserialize)]
struct Listing {
    name: String,
    #[serde(default)]
    district: Option<String>,
    /// Price in yuan per square meter.
    #[serde(default)]
    price: Option<u64>,
    #[serde(default)]
    status: Option<String>,
}

#[async_trait]
impl Tool for ListingsTool {
    fn id(&self) -> &str {
        "listings"
    }

    fn name(&self) -> &str {
        "楼盘查询"
    }

    fn description(&self) -> &str {
        "查询某城市在售楼盘，返回楼盘名、区域、均价与销售状态。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": {"type": "string", "description": "城市名，如 东莞"},
                "district": {"type": "string", "description": "区域筛选，可选"},
                "limit": {"type": "integer", "default": 5, "description": "最多返回条数"}
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let p: Params = serde_json::from_value(args).context("invalid listings params")?;

        let mut query = vec![("city", p.city.clone()), ("limit", p.limit.to_string())];
        if let Some(district) = &p.district {
            query.push(("district", district.clone()));
        }

        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&query)
            .send()
            .await
            .context("listings request failed")?;

        if !response.status().is_success() {
            return Ok(ToolResult::error(format!(
                "楼盘服务返回错误: {}",
                response.status()
            )));
        }

        let body: ListingsResponse = response
            .json()
            .await
            .context("unparseable listings response")?;

        if body.items.is_empty() {
            return Ok(ToolResult::success(format!("{}暂无符合条件的在售楼盘", p.city)));
        }

        let output = body
            .items
            .iter()
            .take(p.limit)
            .enumerate()
            .map(|(i, l)| {
                let mut line = format!("{}. {}", i + 1, l.name);
                if let Some(d) = &l.district {
                    line.push_str(&format!("（{d}）"));
                }
                if let Some(price) = l.price {
                    line.push_str(&format!(" 均价{price}元/㎡"));
                }
                if let Some(status) = &l.status {
                    line.push_str(&format!(" {status}"));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolResult::success(output))
    }
}
