//! Version information for the gateway.

pub const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    pub gateway: &'static str,
    /// Backend base URL this instance relays to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            gateway: GATEWAY_VERSION,
            backend: None,
        }
    }
}

impl VersionInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, base_url: impl Into<String>) -> Self {
        self.backend = Some(base_url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info_has_gateway_version() {
        let info = VersionInfo::new();
        assert_eq!(info.gateway, GATEWAY_VERSION);
        assert!(info.backend.is_none());
    }

    #[test]
    fn version_info_serializes_backend_when_set() {
        let info = VersionInfo {
            gateway: "0.1.0",
            backend: None,
        }
        .with_backend("http://tts:8080");
        insta::assert_json_snapshot!(info, @r#"
        {
          "gateway": "0.1.0",
          "backend": "http://tts:8080"
        }
        "#);
    }
}
