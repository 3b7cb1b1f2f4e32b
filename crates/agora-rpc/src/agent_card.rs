//! One-time capability-card fetch at registration.
//!
//! The card lives at `{endpoint_url}/.well-known/agent.json`. Fetch failures
//! degrade gracefully: when the agent supplied capabilities of its own the
//! registration proceeds without a card.

use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use agora_core::MarketError;

const CARD_PATH: &str = "/.well-known/agent.json";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const REQUIRED_FIELDS: &[&str] = &["name", "url", "version", "skills"];

/// Validate the endpoint an agent registers with: HTTPS only, and never a
/// private or loopback host (the platform fetches the card server-side).
pub fn validate_endpoint_url(endpoint_url: &str) -> Result<url::Url, MarketError> {
    let parsed = url::Url::parse(endpoint_url)
        .map_err(|e| MarketError::Validation(format!("invalid endpoint_url: {e}")))?;
    if parsed.scheme() != "https" {
        return Err(MarketError::Validation("endpoint_url must use https".into()));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| MarketError::Validation("endpoint_url has no host".into()))?;
    if host_is_private(host) {
        return Err(MarketError::Validation("endpoint_url host must be publicly routable".into()));
    }
    Ok(parsed)
}

fn host_is_private(host: &str) -> bool {
    if host == "localhost" || host == "::1" {
        return true;
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return match ip {
            std::net::IpAddr::V4(v4) => {
                v4.is_loopback()
                    || v4.is_private()
                    || v4.is_link_local()
                    || v4.is_unspecified()
            }
            std::net::IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
        };
    }
    false
}

/// Fetch and minimally validate a capability card.
pub async fn fetch_card(endpoint_url: &str) -> Result<Value, MarketError> {
    let card_url = format!("{}{CARD_PATH}", endpoint_url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| MarketError::Internal(format!("http client: {e}")))?;
    let response = client
        .get(&card_url)
        .send()
        .await
        .map_err(|e| MarketError::Upstream(format!("capability card fetch: {e}")))?;
    if !response.status().is_success() {
        return Err(MarketError::Upstream(format!(
            "capability card fetch: HTTP {} from {card_url}",
            response.status()
        )));
    }
    let card: Value = response
        .json()
        .await
        .map_err(|e| MarketError::Upstream(format!("capability card parse: {e}")))?;
    for field in REQUIRED_FIELDS {
        if card.get(field).is_none() {
            return Err(MarketError::Validation(format!(
                "capability card is missing required field '{field}'"
            )));
        }
    }
    Ok(card)
}

/// Tags of every skill advertised by a card.
pub fn capabilities_from_card(card: &Value) -> Vec<String> {
    let mut capabilities = Vec::new();
    if let Some(skills) = card.get("skills").and_then(Value::as_array) {
        for skill in skills {
            if let Some(tags) = skill.get("tags").and_then(Value::as_array) {
                for tag in tags.iter().filter_map(Value::as_str) {
                    if !capabilities.iter().any(|c| c == tag) {
                        capabilities.push(tag.to_string());
                    }
                }
            }
        }
    }
    capabilities
}

/// Skill ids a card advertises; listings must name one of these.
pub fn skill_ids_from_card(card: &Value) -> Vec<String> {
    card.get("skills")
        .and_then(Value::as_array)
        .map(|skills| {
            skills
                .iter()
                .filter_map(|s| s.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Fetch with graceful degradation: a fetch error with caller-supplied
/// capabilities keeps the registration alive.
pub async fn fetch_card_lenient(
    endpoint_url: &str,
    fallback_capabilities: &[String],
) -> Result<(Option<Value>, Vec<String>), MarketError> {
    match fetch_card(endpoint_url).await {
        Ok(card) => {
            let capabilities = capabilities_from_card(&card);
            Ok((Some(card), capabilities))
        }
        Err(e) if !fallback_capabilities.is_empty() => {
            warn!(endpoint = endpoint_url, error = %e, "capability card fetch failed, using supplied capabilities");
            Ok((None, fallback_capabilities.to_vec()))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_validation() {
        assert!(validate_endpoint_url("https://agent.example.com").is_ok());
        assert!(validate_endpoint_url("http://agent.example.com").is_err());
        assert!(validate_endpoint_url("https://localhost").is_err());
        assert!(validate_endpoint_url("https://127.0.0.1").is_err());
        assert!(validate_endpoint_url("https://10.1.2.3").is_err());
        assert!(validate_endpoint_url("https://192.168.1.4").is_err());
        assert!(validate_endpoint_url("not a url").is_err());
    }

    #[test]
    fn card_extraction() {
        let card = json!({
            "name": "scraper", "url": "https://s.example.com", "version": "1.0",
            "skills": [
                {"id": "web-scrape", "tags": ["scrape", "html"]},
                {"id": "summarize", "tags": ["nlp", "scrape"]}
            ]
        });
        assert_eq!(capabilities_from_card(&card), vec!["scrape", "html", "nlp"]);
        assert_eq!(skill_ids_from_card(&card), vec!["web-scrape", "summarize"]);
    }
}
