//! Provider registry construction from server configuration

use crate::config::{ProviderSettings, ServerConfig};
use anyhow::Context;
use modelgate_core::{Provider, ProviderRegistry};
use modelgate_egress::{
    anthropic::{AnthropicConfig, AnthropicConnector},
    gemini::{GeminiConfig, GeminiConnector},
    openai::{OpenAIConfig, OpenAIConnector},
    openrouter::{OpenRouterConfig, OpenRouterConnector},
};
use reqwest::Client;
use std::sync::Arc;
use tracing::info;

/// Settings of a provider that should be registered, with its resolved key
fn active<'a>(
    name: &str,
    settings: &'a Option<ProviderSettings>,
) -> anyhow::Result<Option<(&'a ProviderSettings, String)>> {
    let Some(settings) = settings else {
        return Ok(None);
    };
    if !settings.enabled {
        info!("✗ {} provider disabled in configuration", name);
        return Ok(None);
    }
    let api_key = settings
        .resolved_api_key()
        .with_context(|| format!("Failed to resolve {} API key", name))?;
    match api_key {
        Some(key) => Ok(Some((settings, key))),
        None => {
            info!("✗ {} provider configured without an API key, skipping", name);
            Ok(None)
        }
    }
}

/// Build one adapter per configured provider, all sharing `client`.
///
/// Fails when no provider ends up registered.
pub fn build_registry(config: &ServerConfig, client: Client) -> anyhow::Result<ProviderRegistry> {
    let buffer = config.streaming.buffer_size;
    let providers = &config.providers;
    let mut registry = ProviderRegistry::new();

    if let Some((settings, key)) = active("OpenAI", &providers.openai)? {
        let mut cfg = OpenAIConfig::new(key).with_stream_buffer(buffer);
        if let Some(url) = &settings.base_url {
            cfg = cfg.with_base_url(url);
        }
        if let Some(model) = &settings.default_model {
            cfg = cfg.with_default_model(model);
        }
        if let Some(org) = &settings.organization {
            cfg = cfg.with_organization(org);
        }
        register(&mut registry, OpenAIConnector::with_client(cfg, client.clone())?);
    }

    if let Some((settings, key)) = active("Anthropic", &providers.anthropic)? {
        let mut cfg = AnthropicConfig::new(key).with_stream_buffer(buffer);
        if let Some(url) = &settings.base_url {
            cfg = cfg.with_base_url(url);
        }
        if let Some(model) = &settings.default_model {
            cfg = cfg.with_default_model(model);
        }
        register(&mut registry, AnthropicConnector::with_client(cfg, client.clone())?);
    }

    if let Some((settings, key)) = active("Gemini", &providers.gemini)? {
        let mut cfg = GeminiConfig::new(key).with_stream_buffer(buffer);
        if let Some(url) = &settings.base_url {
            cfg = cfg.with_base_url(url);
        }
        if let Some(model) = &settings.default_model {
            cfg = cfg.with_default_model(model);
        }
        register(&mut registry, GeminiConnector::with_client(cfg, client.clone())?);
    }

    if let Some((settings, key)) = active("OpenRouter", &providers.openrouter)? {
        let mut cfg = OpenRouterConfig::new(key)
            .with_stream_buffer(buffer)
            .with_attribution(settings.site_url.clone(), settings.app_name.clone());
        if let Some(url) = &settings.base_url {
            cfg = cfg.with_base_url(url);
        }
        if let Some(model) = &settings.default_model {
            cfg = cfg.with_default_model(model);
        }
        register(&mut registry, OpenRouterConnector::with_client(cfg, client)?);
    }

    if registry.is_empty() {
        anyhow::bail!(
            "no providers initialized - set at least one of OPENAI_API_KEY, \
             ANTHROPIC_API_KEY, GEMINI_API_KEY or OPENROUTER_API_KEY"
        );
    }

    Ok(registry)
}

fn register<P: Provider + 'static>(registry: &mut ProviderRegistry, provider: P) {
    info!("✓ {} provider enabled", provider.name());
    registry.register(Arc::new(provider));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use modelgate_egress::create_client;
    use modelgate_ingress::{RpcState, router};
    use tower::ServiceExt;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header as header_matcher, method, path},
    };

    fn client() -> Client {
        create_client(&ServerConfig::default().http_client.to_http_client_config()).unwrap()
    }

    fn keyed(key: &str) -> Option<ProviderSettings> {
        Some(ProviderSettings {
            api_key: Some(key.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn test_registers_only_keyed_and_enabled_providers() {
        let mut config = ServerConfig::default();
        config.providers.openai = keyed("sk-test");
        config.providers.gemini = keyed("g-test");
        config.providers.anthropic = Some(ProviderSettings {
            api_key: Some("ant-test".into()),
            enabled: false,
            ..Default::default()
        });
        config.providers.openrouter = Some(ProviderSettings::default());

        let registry = build_registry(&config, client()).unwrap();
        assert_eq!(registry.names(), vec!["gemini", "openai"]);
    }

    #[test]
    fn test_all_four_providers() {
        let mut config = ServerConfig::default();
        config.providers.openai = keyed("a");
        config.providers.anthropic = keyed("b");
        config.providers.gemini = keyed("c");
        config.providers.openrouter = keyed("d");

        let registry = build_registry(&config, client()).unwrap();
        assert_eq!(
            registry.names(),
            vec!["anthropic", "gemini", "openai", "openrouter"]
        );
    }

    #[test]
    fn test_default_model_override() {
        let mut config = ServerConfig::default();
        config.providers.anthropic = Some(ProviderSettings {
            api_key: Some("ant-test".into()),
            default_model: Some("claude-3-opus-latest".into()),
            ..Default::default()
        });

        let registry = build_registry(&config, client()).unwrap();
        assert_eq!(
            registry.get("anthropic").unwrap().default_model(),
            "claude-3-opus-latest"
        );
    }

    #[test]
    fn test_no_providers_is_an_error() {
        let err = build_registry(&ServerConfig::default(), client()).unwrap_err();
        assert!(err.to_string().contains("no providers initialized"));
    }

    #[tokio::test]
    async fn test_end_to_end_invoke_through_openai() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header_matcher("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "Hello"}],
                "max_tokens": 16
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Hi"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let mut config = ServerConfig::default();
        config.providers.openai = Some(ProviderSettings {
            api_key: Some("sk-test".into()),
            base_url: Some(format!("{}/v1", mock_server.uri())),
            default_model: Some("gpt-4o-mini".into()),
            ..Default::default()
        });
        let registry = build_registry(&config, client()).unwrap();
        let app = router(RpcState::new(Arc::new(registry)));

        let body = serde_json::json!({
            "provider": "openai",
            "messages": [{"role": "user", "content": "Hello"}],
            "max_tokens": 16
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/invoke")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["content"], "Hi");
        assert_eq!(json["usage"]["total_tokens"], 7);
    }
}
