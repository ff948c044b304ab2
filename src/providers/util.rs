use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub use crate::core::config::RetryPolicy;
use crate::core::error::MarketDataError;
use crate::core::quote::Quote;
use crate::core::symbol::ProviderId;

pub(crate) const USER_AGENT: &str = "market-pulse/0.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Query parameters whose values never reach the logs.
const SECRET_PARAMS: &[&str] = &["apikey", "api_key", "token"];

/// Retries an async operation with configurable attempts and linear backoff
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Base delay; attempt `n` waits `delay_ms * n` before the next run
///
/// # Returns
/// Either the successful result or the last error. Errors that are not
/// retryable are returned immediately.
pub async fn with_retry<F, Fut, T>(
    mut operation: F,
    retries: usize,
    delay_ms: u64,
) -> Result<T, MarketDataError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MarketDataError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > retries || !err.is_retryable() {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
                tokio::time::sleep(Duration::from_millis(delay_ms * attempt as u64)).await;
                attempt += 1;
            }
        }
    }
}

pub(crate) fn http_client() -> Result<Client, MarketDataError> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

pub(crate) fn build_url(
    provider: ProviderId,
    base_url: &str,
    path: &str,
    params: &[(&str, &str)],
) -> Result<Url, MarketDataError> {
    let raw = format!("{}{}", base_url.trim_end_matches('/'), path);
    Url::parse_with_params(&raw, params).map_err(|e| MarketDataError::ProviderError {
        provider,
        message: format!("invalid URL {raw}: {e}"),
    })
}

/// URL safe for logging, with credentials masked.
pub(crate) fn redact(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let key: &str = &k;
            if SECRET_PARAMS.contains(&key) {
                (k.into_owned(), "***".to_string())
            } else {
                (k.into_owned(), v.into_owned())
            }
        })
        .collect();
    if !pairs.is_empty() {
        redacted.query_pairs_mut().clear().extend_pairs(pairs);
    }
    redacted.to_string()
}

/// Sends a GET and decodes the JSON body, classifying failures.
///
/// 429 maps to `RateLimited`, 404 to `SymbolNotFound` for `symbol`, any
/// other non-success status to `ProviderError`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    client: &Client,
    provider: ProviderId,
    url: Url,
    symbol: &str,
) -> Result<T, MarketDataError> {
    debug!(url = %redact(&url), "Requesting {provider} data");

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| MarketDataError::from_request(provider, e))?;

    let status = response.status();
    match status {
        s if s.is_success() => {}
        StatusCode::TOO_MANY_REQUESTS => return Err(MarketDataError::RateLimited { provider }),
        StatusCode::NOT_FOUND => return Err(MarketDataError::SymbolNotFound(symbol.to_string())),
        s => {
            return Err(MarketDataError::ProviderError {
                provider,
                message: format!("HTTP {s} for {symbol}"),
            });
        }
    }

    let text = response
        .text()
        .await
        .map_err(|e| MarketDataError::from_request(provider, e))?;
    serde_json::from_str(&text).map_err(|e| MarketDataError::MalformedResponse {
        provider,
        message: format!("{symbol}: {e}"),
    })
}

/// Turns per-symbol outcomes into one quote per symbol.
///
/// Symbol-level failures become placeholders. When nothing succeeded and at
/// least one failure was provider-level, the whole batch fails so the
/// caller can tell an outage from a list of unknown symbols.
pub(crate) fn collect_symbol_results(
    provider: ProviderId,
    results: Vec<(String, Result<Quote, MarketDataError>)>,
) -> Result<Vec<Quote>, MarketDataError> {
    let all_failed = !results.is_empty() && results.iter().all(|(_, r)| r.is_err());
    if all_failed {
        let provider_failure = results
            .iter()
            .position(|(_, r)| matches!(r, Err(e) if !e.is_symbol_level()));
        if let Some(index) = provider_failure {
            return Err(results
                .into_iter()
                .nth(index)
                .and_then(|(_, r)| r.err())
                .unwrap_or(MarketDataError::AllProvidersFailed));
        }
    }

    Ok(results
        .into_iter()
        .map(|(symbol, result)| match result {
            Ok(quote) => quote,
            Err(e) => {
                warn!(%provider, %symbol, error = %e, "No quote for symbol, using placeholder");
                Quote::placeholder(&symbol)
            }
        })
        .collect())
}

/// Spreads one batch-level failure over every symbol of the batch.
pub(crate) fn fail_all(
    provider: ProviderId,
    symbols: &[String],
    err: MarketDataError,
) -> Vec<(String, Result<Quote, MarketDataError>)> {
    let symbol_level = err.is_symbol_level();
    let message = err.to_string();
    let mut first = Some(err);
    symbols
        .iter()
        .map(|symbol| {
            let err = first.take().unwrap_or_else(|| {
                if symbol_level {
                    MarketDataError::RateLimited { provider }
                } else {
                    MarketDataError::ProviderError {
                        provider,
                        message: message.clone(),
                    }
                }
            });
            (symbol.clone(), Err(err))
        })
        .collect()
}
