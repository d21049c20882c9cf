//! Agent personas
//!
//! Each agent type maps to a fixed system-prompt persona, composed with
//! runtime context (today's date) the same way for every turn.

use chrono::Local;
use serde::{Deserialize, Serialize};

/// The advisory agents this backend serves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// 玄学命理: fortune-telling, BaZi, zodiac, almanac questions.
    Metaphysics,
    /// 股票投资顾问.
    Stocks,
    /// 健康养生顾问.
    Health,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Metaphysics => "metaphysics",
            AgentKind::Stocks => "stocks",
            AgentKind::Health => "health",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the persona portion of the System turn.
pub fn persona_prompt(agent: AgentKind) -> String {
    let today = Local::now().format("%Y年%m月%d日");
    let persona = match agent {
        AgentKind::Metaphysics => {
            "你是一位精通中国传统玄学的命理大师，擅长八字、生肖、星座运势与黄历择日。\
             回答时先给结论再给依据，语气沉稳。涉及具体日期、农历换算、黄历宜忌或\
             星座运势时，必须调用相应工具获取准确信息，不要凭记忆推算日历。"
        }
        AgentKind::Stocks => {
            "你是一位资深股票投资顾问，擅长行情分析与投资建议。回答要客观、有数据\
             支撑，提醒用户投资有风险。需要最新行情或新闻时调用联网搜索工具。"
        }
        AgentKind::Health => {
            "你是一位专业的健康养生顾问，擅长饮食、运动与日常保健建议。回答通俗\
             易懂，严重症状一律建议就医，不做诊断。"
        }
    };
    format!("{persona}\n今天的日期是{today}。")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_todays_date() {
        let prompt = persona_prompt(AgentKind::Metaphysics);
        let year = Local::now().format("%Y年").to_string();
        assert!(prompt.contains(&year));
        assert!(prompt.contains("命理大师"));
    }

    #[test]
    fn agent_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&AgentKind::Stocks).unwrap(),
            "\"stocks\""
        );
    }
}
