use crate::message::Dict;
use serde_json::Value;
use std::collections::BTreeMap;

pub const INITIAL_DUMP_PROCEDURE: &str = "/sports#initialDump";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    AllSports,
    LiveSports,
    Custom,
}

/// Names what a subscription delivers and how to reach it on the router.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentIdentifier {
    pub content_type: ContentType,
    pub topic: String,
    pub options: Dict,
    /// Procedure called with `{topic}` after SUBSCRIBED to fetch current state.
    pub initial_dump: Option<String>,
}

impl ContentIdentifier {
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            content_type: ContentType::Custom,
            topic: topic.into(),
            options: Dict::new(),
            initial_dump: None,
        }
    }

    pub fn all_sports(operator_id: &str, language: &str) -> Self {
        Self {
            content_type: ContentType::AllSports,
            topic: format!("/sports/{}/{}/disciplines/BOTH/BOTH", operator_id, language),
            options: Dict::new(),
            initial_dump: Some(INITIAL_DUMP_PROCEDURE.to_string()),
        }
    }

    pub fn live_sports(operator_id: &str, language: &str) -> Self {
        Self {
            content_type: ContentType::LiveSports,
            topic: format!("/sports/{}/{}/disciplines/LIVE/BOTH", operator_id, language),
            options: Dict::new(),
            initial_dump: Some(INITIAL_DUMP_PROCEDURE.to_string()),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn with_initial_dump(mut self, procedure: impl Into<String>) -> Self {
        self.initial_dump = Some(procedure.into());
        self
    }

    pub fn without_initial_dump(mut self) -> Self {
        self.initial_dump = None;
        self
    }

    /// Registry key: the topic plus its subscribe options in sorted order.
    pub fn canonical_topic(&self) -> String {
        if self.options.is_empty() {
            return self.topic.clone();
        }
        let sorted: BTreeMap<&String, &Value> = self.options.iter().collect();
        let options_str = serde_json::to_string(&sorted).unwrap_or_default();
        format!("{}?{}", self.topic, options_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sports_topics() {
        let all = ContentIdentifier::all_sports("4093", "en");
        assert_eq!(all.topic, "/sports/4093/en/disciplines/BOTH/BOTH");
        assert_eq!(all.initial_dump.as_deref(), Some(INITIAL_DUMP_PROCEDURE));

        let live = ContentIdentifier::live_sports("4093", "en");
        assert_eq!(live.topic, "/sports/4093/en/disciplines/LIVE/BOTH");
        assert_ne!(all.canonical_topic(), live.canonical_topic());
    }

    #[test]
    fn test_canonical_topic_ignores_option_order() {
        let a = ContentIdentifier::topic("com.example")
            .with_option("match", json!("prefix"))
            .with_option("get_retained", json!(true));
        let b = ContentIdentifier::topic("com.example")
            .with_option("get_retained", json!(true))
            .with_option("match", json!("prefix"));
        assert_eq!(a.canonical_topic(), b.canonical_topic());
        assert_eq!(
            a.canonical_topic(),
            "com.example?{\"get_retained\":true,\"match\":\"prefix\"}"
        );
        assert_eq!(ContentIdentifier::topic("com.example").canonical_topic(), "com.example");
    }
}
