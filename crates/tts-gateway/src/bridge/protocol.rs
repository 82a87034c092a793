//! Backend request record.
//!
//! Field order here is the order the codec emits map entries in. The backend
//! compares payloads byte for byte, so do not reorder.

use serde::{Deserialize, Serialize};

/// Content type sent with every encoded request.
pub const CONTENT_TYPE_MSGPACK: &str = "application/msgpack";

pub const DEFAULT_FORMAT: &str = "wav";

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

/// One synthesis request as forwarded to the backend.
///
/// `reference_id`, `top_p` and `temperature` are omitted from the wire map
/// when absent. An empty `reference_id` counts as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl TtsRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reference_id: None,
            streaming: false,
            format: default_format(),
            top_p: None,
            temperature: None,
        }
    }

    pub fn with_reference_id(mut self, id: impl Into<String>) -> Self {
        self.reference_id = Some(id.into());
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Reference id if present and non-empty.
    pub fn reference_id(&self) -> Option<&str> {
        self.reference_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_defaults_fill_format() {
        let req: TtsRequest = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(req, TtsRequest::new("hi"));
        assert_eq!(req.format, "wav");
        assert!(!req.streaming);
    }

    #[test]
    fn empty_reference_id_counts_as_absent() {
        let req = TtsRequest::new("hi").with_reference_id("");
        assert_eq!(req.reference_id(), None);

        let req = TtsRequest::new("hi").with_reference_id("alice");
        assert_eq!(req.reference_id(), Some("alice"));
    }

    #[test]
    fn serializes_without_absent_optionals() {
        let req = TtsRequest::new("hello").with_temperature(0.7);
        insta::assert_json_snapshot!(req, @r#"
        {
          "text": "hello",
          "streaming": false,
          "format": "wav",
          "temperature": 0.7
        }
        "#);
    }
}
