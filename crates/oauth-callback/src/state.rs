//! `state` parameter codec
//!
//! The `state` value is standard Base64 of a small JSON object,
//! `{"p": "google" | "github", "n": <nonce>}`. It leaves with the sign-in
//! redirect and comes back untouched on the callback, so the callback can
//! tell which provider it came from.
//!
//! Decoding never fails: anything unreadable is reported as
//! `DecodedProvider::Unknown` and left to the resolver's fallback policy.

use backend::Provider;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use rand::RngExt;
use serde_json::Value;

use crate::constants::STATE_NONCE_BYTES;

/// Provider tag found in a decoded `state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedProvider {
    Google,
    Github,
    Unknown,
}

impl DecodedProvider {
    pub fn known(&self) -> Option<Provider> {
        match self {
            DecodedProvider::Google => Some(Provider::Google),
            DecodedProvider::Github => Some(Provider::Github),
            DecodedProvider::Unknown => None,
        }
    }
}

impl From<Provider> for DecodedProvider {
    fn from(provider: Provider) -> Self {
        match provider {
            Provider::Google => DecodedProvider::Google,
            Provider::Github => DecodedProvider::Github,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedState {
    pub provider: DecodedProvider,
    /// The value as received, empty when absent.
    pub raw: String,
}

/// Decode a callback `state`. Never panics, never errors.
pub fn decode(state: Option<&str>) -> DecodedState {
    let raw = state.unwrap_or_default().to_string();
    let provider = decode_bytes(&raw)
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .and_then(|payload| payload.get("p").and_then(Value::as_str).and_then(Provider::from_tag))
        .map(DecodedProvider::from)
        .unwrap_or(DecodedProvider::Unknown);
    DecodedState { provider, raw }
}

/// Try each Base64 flavour a redirect hop might have produced.
///
/// An unescaped `+` in a query string arrives as a space after form
/// decoding, so spaces are mapped back first.
fn decode_bytes(raw: &str) -> Option<Vec<u8>> {
    let candidate = raw.trim().replace(' ', "+");
    if candidate.is_empty() {
        return None;
    }
    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .into_iter()
        .find_map(|engine| engine.decode(&candidate).ok())
}

/// Encode an outbound `state` naming `provider`, with a fresh random nonce.
pub fn encode(provider: Provider) -> String {
    let mut nonce = [0u8; STATE_NONCE_BYTES];
    rand::rng().fill(&mut nonce);
    let payload = serde_json::json!({
        "p": provider.as_str(),
        "n": URL_SAFE_NO_PAD.encode(nonce),
    });
    STANDARD.encode(payload.to_string())
}
