//! Extracts a `HeartbeatAction` from an advisory oracle's free-text
//! response. The oracle is expected to return exactly one JSON object;
//! this adapter is deliberately tolerant of prose wrapped around it.

use serde::Deserialize;

use crate::types::HeartbeatAction;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum RawAction {
    Hold,
    CloseEntirely,
    TakePartialProfit { fraction: Option<f64>, size: Option<f64> },
    TightenStop { new_stop_price: f64 },
    AdjustTakeProfit { new_take_profit_price: f64 },
}

impl From<RawAction> for HeartbeatAction {
    fn from(r: RawAction) -> Self {
        match r {
            RawAction::Hold => HeartbeatAction::Hold,
            RawAction::CloseEntirely => HeartbeatAction::CloseEntirely,
            RawAction::TakePartialProfit { fraction, size } => {
                HeartbeatAction::TakePartialProfit { fraction, size }
            }
            RawAction::TightenStop { new_stop_price } => HeartbeatAction::TightenStop { new_stop_price },
            RawAction::AdjustTakeProfit { new_take_profit_price } => {
                HeartbeatAction::AdjustTakeProfit { new_take_profit_price }
            }
        }
    }
}

/// Missing or malformed output degrades to `Hold` (§6), never an error.
pub fn extract_action(content: &str) -> HeartbeatAction {
    extract_json_object(content)
        .and_then(|json| serde_json::from_str::<RawAction>(&json).ok())
        .map(HeartbeatAction::from)
        .unwrap_or(HeartbeatAction::Hold)
}

fn extract_json_object(content: &str) -> Option<String> {
    if let Some(fenced) = extract_fenced_block(content) {
        return Some(fenced);
    }
    extract_brace_balanced(content)
}

fn extract_fenced_block(content: &str) -> Option<String> {
    let start = content.find("```")?;
    let after_marker = &content[start + 3..];
    let after_marker = after_marker.strip_prefix("json").unwrap_or(after_marker);
    let end = after_marker.find("```")?;
    Some(after_marker[..end].trim().to_string())
}

fn extract_brace_balanced(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let mut depth = 0i32;
    for (i, ch) in content[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(content[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let text = "Here is my decision:\n```json\n{\"action\":\"hold\"}\n```\nThanks.";
        assert_eq!(extract_action(text), HeartbeatAction::Hold);
    }

    #[test]
    fn parses_brace_balanced_json_without_fence() {
        let text = "I think {\"action\":\"close_entirely\"} is right.";
        assert_eq!(extract_action(text), HeartbeatAction::CloseEntirely);
    }

    #[test]
    fn malformed_output_degrades_to_hold() {
        assert_eq!(extract_action("no json here at all"), HeartbeatAction::Hold);
    }

    #[test]
    fn tighten_stop_round_trips() {
        let text = "{\"action\":\"tighten_stop\",\"new_stop_price\":97.5}";
        assert_eq!(extract_action(text), HeartbeatAction::TightenStop { new_stop_price: 97.5 });
    }
}
