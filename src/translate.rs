//! Translation provider contract and implementations.
//!
//! One polymorphic capability: `translate(text, target, source?) -> text`.
//! The concrete provider is chosen by configuration/injection, never by a
//! shared global. [`HttpTranslator`] talks to a LibreTranslate-shaped JSON
//! endpoint; [`EchoTranslator`] is the offline stand-in.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// External collaborator mapping (text, target language) to translated
/// text. Treated as idempotent and retryable.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Translate `text` into `target`. `source` of `None` means
    /// auto-detect.
    async fn translate(
        &self,
        text: &str,
        target: &str,
        source: Option<&str>,
    ) -> Result<String, RequestError>;
}

// ---------------------------------------------------------------------------
// Language codes
// ---------------------------------------------------------------------------

/// Provider-side language codes, keyed by the codes the UI hands in.
static LANGUAGE_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("ja", "ja"),
        ("en", "en"),
        ("ko", "ko"),
        ("es", "es"),
        ("fr", "fr"),
        ("de", "de"),
        ("it", "it"),
        ("pt", "pt"),
        ("ru", "ru"),
        ("ar", "ar"),
        ("hi", "hi"),
        ("th", "th"),
        ("vi", "vi"),
        ("tr", "tr"),
        ("pl", "pl"),
        ("uk", "uk"),
        ("id", "id"),
        ("nl", "nl"),
        ("sv", "sv"),
        ("zh", "zh"),
        ("zh-Hans", "zh-CN"),
        ("zh-Hant", "zh-TW"),
        ("zh-CN", "zh-CN"),
        ("zh-TW", "zh-TW"),
        ("pt-BR", "pt-BR"),
        ("pt-PT", "pt-PT"),
    ])
});

/// Normalize a UI language code to a provider code.
///
/// Exact matches win; otherwise a regional code falls back to its base
/// language (`fr-CA` -> `fr`); anything unknown falls back to `en`.
pub fn normalize_lang(code: &str) -> String {
    if let Some(mapped) = LANGUAGE_MAP.get(code) {
        return (*mapped).to_string();
    }
    let base = code.split('-').next().unwrap_or("").to_lowercase();
    if let Some(mapped) = LANGUAGE_MAP.get(base.as_str()) {
        return (*mapped).to_string();
    }
    "en".to_string()
}

// ---------------------------------------------------------------------------
// Bounded translation cache
// ---------------------------------------------------------------------------

struct TranslationCache {
    entries: HashMap<String, String>,
    order: VecDeque<String>,
    cap: usize,
}

impl TranslationCache {
    fn new(cap: usize) -> Self {
        Self { entries: HashMap::new(), order: VecDeque::new(), cap }
    }

    fn key(text: &str, source: &str, target: &str) -> String {
        format!("{source}:{target}:{text}")
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: String) {
        if self.cap == 0 {
            return;
        }
        if !self.entries.contains_key(&key) {
            if self.entries.len() >= self.cap {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, value);
    }
}

// ---------------------------------------------------------------------------
// HttpTranslator
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// Default size of the per-provider translation cache.
pub const DEFAULT_CACHE_SIZE: usize = 100;

/// HTTP translation provider (LibreTranslate-shaped `POST {q, source,
/// target, format}` returning `{translatedText}`).
///
/// Skips the network entirely for empty input and same-language pairs, and
/// serves repeats from a bounded in-memory cache.
pub struct HttpTranslator {
    client: reqwest::Client,
    endpoint: String,
    cache: Mutex<TranslationCache>,
}

impl HttpTranslator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_cache_size(endpoint, DEFAULT_CACHE_SIZE)
    }

    pub fn with_cache_size(endpoint: impl Into<String>, cache_size: usize) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            cache: Mutex::new(TranslationCache::new(cache_size)),
        }
    }

    async fn request(&self, text: &str, source: &str, target: &str) -> Result<String, RequestError> {
        let body = TranslateRequest { q: text, source, target, format: "text" };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| RequestError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(RequestError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RequestError::Http { status: status.as_u16(), body });
        }

        let parsed: TranslateResponse = resp
            .json()
            .await
            .map_err(|e| RequestError::Json(e.to_string()))?;
        if parsed.translated_text.is_empty() {
            return Err(RequestError::Json("empty translation in response".to_string()));
        }
        Ok(parsed.translated_text)
    }
}

#[async_trait]
impl TranslationProvider for HttpTranslator {
    async fn translate(
        &self,
        text: &str,
        target: &str,
        source: Option<&str>,
    ) -> Result<String, RequestError> {
        if text.trim().is_empty() {
            return Ok(text.to_string());
        }

        let target = normalize_lang(target);
        let source = source.map(normalize_lang);
        if source.as_deref() == Some(target.as_str()) {
            return Ok(text.to_string());
        }
        let source = source.unwrap_or_else(|| "auto".to_string());

        let key = TranslationCache::key(text, &source, &target);
        if let Some(hit) = self.cache.lock().expect("cache lock").get(&key) {
            return Ok(hit);
        }

        let translated = self.request(text, &source, &target).await?;
        self.cache.lock().expect("cache lock").insert(key, translated.clone());
        Ok(translated)
    }
}

/// Provider that returns the input unchanged. Used by the demo binary when
/// no endpoint is configured, and as a harmless default in tests.
#[derive(Debug, Clone, Default)]
pub struct EchoTranslator;

#[async_trait]
impl TranslationProvider for EchoTranslator {
    async fn translate(
        &self,
        text: &str,
        _target: &str,
        _source: Option<&str>,
    ) -> Result<String, RequestError> {
        Ok(text.to_string())
    }
}
