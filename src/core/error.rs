//! Error types for quote providers and the aggregation layer.

use std::time::Duration;

use thiserror::Error;

use crate::core::symbol::ProviderId;

/// Errors raised while talking to upstream quote providers.
///
/// Adapters classify their failures so the layers above know whether a
/// failure belongs to one symbol (and becomes a placeholder) or to the
/// provider as a whole.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The provider does not know the symbol.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// The provider signalled backpressure (HTTP 429 or a quota note).
    #[error("Rate limited: {provider}")]
    RateLimited { provider: ProviderId },

    /// The local rate limiter would have to wait longer than allowed.
    #[error("Quota exhausted: {provider} (next slot in {retry_after:?})")]
    QuotaExhausted {
        provider: ProviderId,
        retry_after: Duration,
    },

    #[error("Timeout: {provider}")]
    Timeout { provider: ProviderId },

    #[error("Provider error: {provider} - {message}")]
    ProviderError { provider: ProviderId, message: String },

    #[error("Malformed response from {provider}: {message}")]
    MalformedResponse { provider: ProviderId, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Every symbol of a refresh came back without data.
    #[error("All providers failed")]
    AllProvidersFailed,

    #[error("Symbol universe unavailable: {0}")]
    Universe(String),
}

impl MarketDataError {
    /// Failures scoped to a single symbol. These degrade to a placeholder
    /// and never fail a batch.
    pub fn is_symbol_level(&self) -> bool {
        matches!(
            self,
            Self::SymbolNotFound(_) | Self::RateLimited { .. } | Self::QuotaExhausted { .. }
        )
    }

    /// Failures worth another attempt within the retry budget.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    pub(crate) fn from_request(provider: ProviderId, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { provider }
        } else {
            Self::Network(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_level_classification() {
        assert!(MarketDataError::SymbolNotFound("XYZ".into()).is_symbol_level());
        assert!(
            MarketDataError::RateLimited {
                provider: ProviderId::AlphaVantage
            }
            .is_symbol_level()
        );
        assert!(
            MarketDataError::QuotaExhausted {
                provider: ProviderId::TwelveData,
                retry_after: Duration::from_secs(3600),
            }
            .is_symbol_level()
        );
        assert!(
            !MarketDataError::MalformedResponse {
                provider: ProviderId::Yahoo,
                message: "bad json".into(),
            }
            .is_symbol_level()
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(
            MarketDataError::Timeout {
                provider: ProviderId::Yahoo
            }
            .is_retryable()
        );
        assert!(
            !MarketDataError::RateLimited {
                provider: ProviderId::Yahoo
            }
            .is_retryable()
        );
        assert!(!MarketDataError::AllProvidersFailed.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let error = MarketDataError::ProviderError {
            provider: ProviderId::AlphaVantage,
            message: "HTTP 500".to_string(),
        };
        assert_eq!(error.to_string(), "Provider error: ALPHA_VANTAGE - HTTP 500");

        let error = MarketDataError::RateLimited {
            provider: ProviderId::TwelveData,
        };
        assert_eq!(error.to_string(), "Rate limited: TWELVE_DATA");
    }
}
