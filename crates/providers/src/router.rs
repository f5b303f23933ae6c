//! Provider selection: picks the one backend a run will use.
//!
//! The choice is made once at startup from configuration; the loop driver
//! only ever sees `Arc<dyn Provider>`.

use std::sync::Arc;
use std::time::Duration;

use deepreact_config::{ProviderConfig, ProviderKind};
use deepreact_core::provider::Provider;
use tracing::info;

use crate::openai_compat::OpenAiCompatProvider;
use crate::text_completion::TextCompletionProvider;

/// Build the configured provider.
///
/// `request_timeout` bounds a single HTTP exchange; the retry controller
/// applies its own per-attempt timeout on top.
pub fn build_from_config(config: &ProviderConfig, request_timeout: Duration) -> Arc<dyn Provider> {
    info!(
        kind = ?config.kind,
        api_base = %config.api_base,
        model = %config.model,
        native_tool_calls = config.native_tool_calls,
        "Selecting provider"
    );

    match config.kind {
        ProviderKind::Openai => Arc::new(
            OpenAiCompatProvider::new("openai", &config.api_base, config.api_key.clone())
                .with_native_tool_calls(config.native_tool_calls)
                .with_timeout(request_timeout),
        ),
        ProviderKind::Text => {
            Arc::new(TextCompletionProvider::new(&config.api_base).with_timeout(request_timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_from_default_config() {
        let provider = build_from_config(&ProviderConfig::default(), Duration::from_secs(30));
        assert_eq!(provider.name(), "openai");
        assert!(!provider.capabilities().native_tool_calls);
    }

    #[test]
    fn native_flag_is_forwarded() {
        let config = ProviderConfig {
            native_tool_calls: true,
            ..ProviderConfig::default()
        };
        let provider = build_from_config(&config, Duration::from_secs(30));
        assert!(provider.capabilities().native_tool_calls);
    }

    #[test]
    fn text_kind_selects_text_provider() {
        let config = ProviderConfig {
            kind: ProviderKind::Text,
            native_tool_calls: true,
            ..ProviderConfig::default()
        };
        let provider = build_from_config(&config, Duration::from_secs(30));
        assert_eq!(provider.name(), "text");
        assert!(!provider.capabilities().native_tool_calls);
    }
}
