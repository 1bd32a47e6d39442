// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider construction from configuration.

use std::sync::Arc;

use anyhow::bail;

use otto_config::ProviderConfig;

use crate::{AnthropicProvider, MockProvider, OpenAiProvider, Provider};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Build a provider instance from one config entry.
pub fn from_config(cfg: &ProviderConfig) -> anyhow::Result<Arc<dyn Provider>> {
    let api_key = resolve_api_key(cfg);
    match cfg.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            cfg.id(),
            &cfg.model,
            api_key,
            cfg.base_url.as_deref().unwrap_or(OPENAI_BASE_URL),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(
            cfg.id(),
            &cfg.model,
            api_key,
            cfg.base_url.as_deref(),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "mock" => Ok(Arc::new(MockProvider)),
        other => bail!("unknown provider driver: {other}"),
    }
}

/// Resolve the API key: explicit value, then the configured env var, then
/// the driver's canonical env var.
fn resolve_api_key(cfg: &ProviderConfig) -> Option<String> {
    if let Some(key) = &cfg.api_key {
        return Some(key.clone());
    }
    if let Some(env) = &cfg.api_key_env {
        if let Ok(key) = std::env::var(env) {
            return Some(key);
        }
    }
    let canonical = match cfg.provider.as_str() {
        "openai" => "OPENAI_API_KEY",
        "anthropic" => "ANTHROPIC_API_KEY",
        _ => return None,
    };
    std::env::var(canonical).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(provider: &str) -> ProviderConfig {
        ProviderConfig {
            provider: provider.into(),
            model: "test-model".into(),
            id: None,
            api_key_env: None,
            api_key: Some("k".into()),
            base_url: None,
            max_tokens: None,
            temperature: None,
        }
    }

    #[test]
    fn known_drivers_construct() {
        assert_eq!(from_config(&cfg("openai")).unwrap().id(), "openai");
        assert_eq!(from_config(&cfg("anthropic")).unwrap().id(), "anthropic");
        assert_eq!(from_config(&cfg("mock")).unwrap().id(), "mock");
    }

    #[test]
    fn unknown_driver_is_an_error() {
        assert!(from_config(&cfg("telepathy")).is_err());
    }

    #[test]
    fn explicit_api_key_wins_over_env() {
        let mut c = cfg("openai");
        c.api_key = Some("explicit".into());
        c.api_key_env = Some("PATH".into());
        assert_eq!(resolve_api_key(&c).as_deref(), Some("explicit"));
    }
}
