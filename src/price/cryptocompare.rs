use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use crate::error::FetchError;
use crate::model::PriceQuote;
use crate::price::PriceSource;

pub const CRYPTOCOMPARE_BASE_URL: &str = "https://min-api.cryptocompare.com";
const PRICE_PATH: &str = "/data/price";

pub struct CryptoCompareSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl CryptoCompareSource {
    /// `client` carries the proxy and timeout settings.
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.base_url, PRICE_PATH)
    }
}

impl PriceSource for CryptoCompareSource {
    fn fetch(&self) -> BoxFuture<'_, Result<PriceQuote, Report<FetchError>>> {
        Box::pin(async move {
            let endpoint = self.endpoint();

            let mut params = vec![("fsym", "XMR"), ("tsyms", "BTC,USD,EUR,CNY")];
            if let Some(key) = &self.api_key {
                params.push(("api_key", key.as_str()));
            }

            let response = self
                .client
                .get(&endpoint)
                .query(&params)
                .send()
                .await
                .change_context(FetchError::Request {
                    endpoint: endpoint.clone(),
                })?;

            if !response.status().is_success() {
                return Err(Report::new(FetchError::Request {
                    endpoint: endpoint.clone(),
                })
                .attach(format!("HTTP status: {}", response.status())));
            }

            let body = response
                .text()
                .await
                .change_context(FetchError::Request {
                    endpoint: endpoint.clone(),
                })?;

            let quote = parse_quote(&endpoint, &body)?;
            debug!(btc = quote.btc, usd = quote.usd, "fetched xmr quote");
            Ok(quote)
        })
    }
}

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CryptoCompareQuote {
    #[serde(rename = "BTC")]
    btc: f64,
    #[serde(rename = "USD")]
    usd: f64,
    #[serde(rename = "EUR")]
    eur: f64,
    #[serde(rename = "CNY")]
    cny: f64,
}

/// Decode a `/data/price` body. Anything other than exactly the four currency fields
/// (error envelopes included) is a parse error; negative or non-finite values are an
/// invalid quote.
fn parse_quote(endpoint: &str, body: &str) -> Result<PriceQuote, Report<FetchError>> {
    let raw: CryptoCompareQuote = serde_json::from_str(body)
        .change_context(FetchError::ResponseParse {
            endpoint: endpoint.to_owned(),
        })
        .attach_with(|| format!("body: {body}"))?;

    let quote = PriceQuote {
        btc: raw.btc,
        usd: raw.usd,
        eur: raw.eur,
        cny: raw.cny,
    };
    if !quote.is_valid() {
        return Err(Report::new(FetchError::InvalidQuote)
            .attach(format!("endpoint: {endpoint}, quote: {quote:?}")));
    }
    Ok(quote)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "https://example.com/data/price";

    fn assert_parse_error(body: &str) {
        let err = parse_quote(ENDPOINT, body).unwrap_err();
        assert!(matches!(
            err.current_context(),
            FetchError::ResponseParse { endpoint } if endpoint == ENDPOINT
        ));
    }

    #[test]
    fn parses_four_field_body() {
        let quote = parse_quote(
            ENDPOINT,
            r#"{"BTC":0.002651,"USD":163.47,"EUR":150.02,"CNY":1171.3}"#,
        )
        .unwrap();
        assert_eq!(
            quote,
            PriceQuote {
                btc: 0.002651,
                usd: 163.47,
                eur: 150.02,
                cny: 1171.3,
            }
        );
    }

    #[test]
    fn missing_field_is_a_parse_error() {
        assert_parse_error(r#"{"BTC":0.002651,"USD":163.47,"EUR":150.02}"#);
    }

    #[test]
    fn extra_field_is_a_parse_error() {
        assert_parse_error(r#"{"BTC":0.002651,"USD":163.47,"EUR":150.02,"CNY":1171.3,"JPY":1.0}"#);
    }

    #[test]
    fn error_envelope_is_a_parse_error() {
        assert_parse_error(r#"{"Response":"Error","Message":"rate limit","HasWarning":false}"#);
    }

    #[test]
    fn malformed_body_is_a_parse_error() {
        assert_parse_error("<html>502 Bad Gateway</html>");
    }

    #[test]
    fn negative_price_is_an_invalid_quote() {
        let body = r#"{"BTC":-0.1,"USD":163.47,"EUR":150.02,"CNY":1171.3}"#;
        let err = parse_quote(ENDPOINT, body).unwrap_err();
        assert!(matches!(err.current_context(), FetchError::InvalidQuote));
    }

    #[test]
    fn empty_api_key_is_ignored() {
        let source = CryptoCompareSource::new(
            reqwest::Client::new(),
            "https://example.com/",
            Some(String::new()),
        );
        assert!(source.api_key.is_none());
        assert_eq!(source.endpoint(), "https://example.com/data/price");
    }

    /// Integration test: requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_fetch_quote() {
        let source = CryptoCompareSource::new(reqwest::Client::new(), CRYPTOCOMPARE_BASE_URL, None);
        let quote = source.fetch().await.unwrap();
        assert!(quote.usd > 0.0);
    }
}
