//! Values flowing between pipeline layers

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of one model invocation
///
/// A failed invocation still occupies its slot in the layer so the
/// enumeration seen by the next layer stays aligned with the model list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponseText {
    Success {
        model: String,
        text: String,
    },
    Failed {
        model: String,
        attempts: u32,
        error: String,
    },
}

impl ResponseText {
    /// Placeholder text for a model that never answered
    pub fn sentinel(model: &str) -> String {
        format!("Error: Could not get response from {}.", model)
    }

    pub fn model(&self) -> &str {
        match self {
            ResponseText::Success { model, .. } | ResponseText::Failed { model, .. } => model,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseText::Success { .. })
    }

    /// Text as seen by the next layer: the response, or the sentinel
    pub fn text(&self) -> String {
        match self {
            ResponseText::Success { text, .. } => text.clone(),
            ResponseText::Failed { model, .. } => Self::sentinel(model),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ResponseText::Success { text, .. } => text,
            ResponseText::Failed { model, .. } => Self::sentinel(&model),
        }
    }
}

impl fmt::Display for ResponseText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseText::Success { text, .. } => f.write_str(text),
            ResponseText::Failed { model, .. } => f.write_str(&Self::sentinel(model)),
        }
    }
}

/// Index-aligned responses for one layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerResult {
    responses: Vec<ResponseText>,
}

impl LayerResult {
    pub fn new(responses: Vec<ResponseText>) -> Self {
        Self { responses }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ResponseText> {
        self.responses.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResponseText> {
        self.responses.iter()
    }

    pub fn failures(&self) -> usize {
        self.responses.iter().filter(|r| !r.is_success()).count()
    }
}

impl<'a> IntoIterator for &'a LayerResult {
    type Item = &'a ResponseText;
    type IntoIter = std::slice::Iter<'a, ResponseText>;

    fn into_iter(self) -> Self::IntoIter {
        self.responses.iter()
    }
}

/// Full record of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoaRun {
    /// Reference layers in execution order; the first has no prior context
    pub layers: Vec<LayerResult>,
    /// Aggregator output
    pub final_response: ResponseText,
}

impl MoaRun {
    pub fn final_text(&self) -> String {
        self.final_response.text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(model: &str, text: &str) -> ResponseText {
        ResponseText::Success {
            model: model.into(),
            text: text.into(),
        }
    }

    #[test]
    fn test_failed_renders_sentinel() {
        let failed = ResponseText::Failed {
            model: "gpt-4o".into(),
            attempts: 3,
            error: "Rate limit exceeded".into(),
        };

        assert_eq!(failed.text(), "Error: Could not get response from gpt-4o.");
        assert_eq!(failed.to_string(), failed.text());
        assert_eq!(failed.model(), "gpt-4o");
        assert!(!failed.is_success());
    }

    #[test]
    fn test_layer_result_keeps_order_and_counts_failures() {
        let layer = LayerResult::new(vec![
            success("a", "one"),
            ResponseText::Failed {
                model: "b".into(),
                attempts: 3,
                error: "down".into(),
            },
            success("c", "three"),
        ]);

        let models: Vec<_> = layer.iter().map(ResponseText::model).collect();
        assert_eq!(models, vec!["a", "b", "c"]);
        assert_eq!(layer.len(), 3);
        assert_eq!(layer.failures(), 1);
        assert_eq!(layer.get(2).unwrap().text(), "three");
    }

    #[test]
    fn test_response_serialization() {
        let json = serde_json::to_string(&success("a", "hi")).unwrap();
        assert!(json.contains("\"status\":\"success\""));

        let parsed: ResponseText = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, success("a", "hi"));
    }
}
