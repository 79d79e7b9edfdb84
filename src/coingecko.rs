use reqwest::{Method, StatusCode};
use thiserror::Error;

use crate::market::{to_snapshots, InvalidRecord, MarketSnapshot, UpstreamCoin};

const DEMO_KEY_HEADER: &str = "x-cg-demo-api-key";

/// Fixed query for the market table: page 1 of the top coins by market cap, in USD.
pub const VS_CURRENCY: &str = "usd";
pub const ORDER: &str = "market_cap_desc";
pub const PER_PAGE: u32 = 10;
pub const PAGE: u32 = 1;

#[derive(Debug, Error)]
pub enum CoinGeckoError {
    /// Transport failure (connect, TLS, body read).
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("upstream status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid upstream record: {0}")]
    Invalid(#[from] InvalidRecord),
}

impl CoinGeckoError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CoinGeckoError::Status { status, .. } => Some(*status),
            CoinGeckoError::Request(e) => e.status(),
            _ => None,
        }
    }
}

/// CoinGecko API client. Cheap to clone; build once and share.
#[derive(Clone)]
pub struct Client {
    inner: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl Client {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, CoinGeckoError> {
        let inner = reqwest::Client::builder()
            .user_agent(concat!("coinpulse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            inner,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let req = self
            .inner
            .request(method, &url)
            .header("Accept", "application/json");
        match &self.api_key {
            Some(key) => req.header(DEMO_KEY_HEADER, key),
            None => req,
        }
    }

    /// Top coins by market cap, mapped to [`MarketSnapshot`] in provider order.
    pub async fn top_coins(&self) -> Result<Vec<MarketSnapshot>, CoinGeckoError> {
        log::info!("markets.fetch url={}/coins/markets", self.base_url);

        let response = self
            .request(Method::GET, "/coins/markets")
            .query(&[("vs_currency", VS_CURRENCY), ("order", ORDER)])
            .query(&[("per_page", PER_PAGE), ("page", PAGE)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        log::debug!("markets.raw status={} body={}", status, body);

        if !status.is_success() {
            return Err(CoinGeckoError::Status { status, body });
        }

        let coins: Vec<UpstreamCoin> = serde_json::from_str(&body)?;
        Ok(to_snapshots(coins)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TWO_COINS: &str = r#"[
        {"id":"bitcoin","symbol":"btc","name":"Bitcoin","image":"https://img.example/btc.png",
         "current_price":67012.5,"market_cap":1320000000000,"price_change_percentage_24h":1.234},
        {"id":"ethereum","symbol":"eth","name":"Ethereum","image":"https://img.example/eth.png",
         "current_price":3501.1,"market_cap":420000000000,"price_change_percentage_24h":-3.456}
    ]"#;

    #[tokio::test]
    async fn test_top_coins_sends_fixed_query_and_key() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .and(query_param("vs_currency", "usd"))
            .and(query_param("order", "market_cap_desc"))
            .and(query_param("per_page", "10"))
            .and(query_param("page", "1"))
            .and(header("x-cg-demo-api-key", "CG-test"))
            .respond_with(ResponseTemplate::new(200).set_body_string(TWO_COINS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = Client::new(mock_server.uri(), Some("CG-test".to_string())).unwrap();
        let coins = client.top_coins().await.unwrap();

        assert_eq!(coins.len(), 2);
        assert_eq!(coins[0].id, "bitcoin");
        assert_eq!(coins[0].symbol, "BTC");
        assert_eq!(coins[1].symbol, "ETH");
        assert_eq!(coins[1].change_24h, Some(-3.456));
    }

    #[tokio::test]
    async fn test_top_coins_without_key_omits_header() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists("x-cg-demo-api-key"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/coins/markets"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&mock_server)
            .await;

        let client = Client::new(mock_server.uri(), None).unwrap();
        assert!(client.top_coins().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_string(r#"{"status":{"error_code":429}}"#))
            .mount(&mock_server)
            .await;

        let client = Client::new(mock_server.uri(), None).unwrap();
        let err = client.top_coins().await.unwrap_err();
        assert!(matches!(err, CoinGeckoError::Status { .. }), "{err:?}");
        assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"not":"a list"}"#))
            .mount(&mock_server)
            .await;

        let client = Client::new(mock_server.uri(), None).unwrap();
        let err = client.top_coins().await.unwrap_err();
        assert!(matches!(err, CoinGeckoError::Decode(_)), "{err:?}");
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn test_record_missing_price_fails_whole_page() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"id":"x","symbol":"x","name":"X","image":"i","current_price":null}]"#,
            ))
            .mount(&mock_server)
            .await;

        let client = Client::new(mock_server.uri(), None).unwrap();
        let err = client.top_coins().await.unwrap_err();
        assert!(matches!(err, CoinGeckoError::Invalid(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        // Nothing listens on port 9 locally.
        let client = Client::new("http://127.0.0.1:9", None).unwrap();
        let err = client.top_coins().await.unwrap_err();
        assert!(matches!(err, CoinGeckoError::Request(_)), "{err:?}");
    }
}
