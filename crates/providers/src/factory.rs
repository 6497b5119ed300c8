//! Provider construction from configuration.

use opencodex_config::AppConfig;
use opencodex_core::error::ProviderError;
use opencodex_core::provider::Provider;
use std::sync::Arc;

use crate::openai_compat::OpenAiCompatProvider;

/// Build the configured default provider.
///
/// Every supported backend speaks the OpenAI-compatible protocol; the
/// name only selects the base URL and key. Local endpoints (ollama,
/// vllm, llama.cpp) do not require a key.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
    build_named(config, &config.default_provider)
}

/// Build a provider by name using its `[providers.<name>]` section.
pub fn build_named(config: &AppConfig, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
    let section = config.providers.get(name);

    let base_url = section
        .and_then(|p| p.api_url.clone())
        .or_else(|| default_base_url(name).map(String::from))
        .ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "unknown provider '{name}': set providers.{name}.api_url"
            ))
        })?;

    let api_key = match config.api_key_for(name) {
        Some(key) => key,
        None if is_local(name) => name.to_string(),
        None => {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for provider '{name}' (set OPENCODEX_API_KEY or providers.{name}.api_key)"
            )));
        }
    };

    Ok(Arc::new(OpenAiCompatProvider::new(name, base_url, api_key)))
}

/// Whether `name` is a local endpoint that needs no API key.
pub fn is_local(name: &str) -> bool {
    matches!(name, "ollama" | "vllm" | "llamacpp" | "llama.cpp")
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> Option<&'static str> {
    match provider_name {
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        "deepseek" => Some("https://api.deepseek.com/v1"),
        "groq" => Some("https://api.groq.com/openai/v1"),
        "together" => Some("https://api.together.xyz/v1"),
        "fireworks" => Some("https://api.fireworks.ai/inference/v1"),
        "vllm" => Some("http://localhost:8000/v1"),
        "llamacpp" | "llama.cpp" => Some("http://localhost:8080/v1"),
        _ => None,
    }
}
