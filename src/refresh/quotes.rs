use crate::error::AppError;
use crate::refresh::types::{parse_realtime_payload, QuoteBatch};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Serialize;

const REALTIME_QUOTES_PATH: &str = "/api-xcdh/StockRealTime/stock_realtimes";

pub type QuoteFuture<'a> = BoxFuture<'a, Result<QuoteBatch, AppError>>;

pub trait QuoteFetcher: Send + Sync {
    fn fetch_quotes<'a>(&'a self, codes: &'a [String]) -> QuoteFuture<'a>;
}

#[derive(Debug, Serialize)]
struct RealtimeRequestWire<'a> {
    rows: &'a [String],
}

fn realtime_endpoint(base_url: &str) -> String {
    format!("{}{REALTIME_QUOTES_PATH}", base_url.trim_end_matches('/'))
}

pub struct RealtimeQuoteClient {
    client: Client,
    endpoint: String,
    bearer_token: RwLock<Option<String>>,
}

impl RealtimeQuoteClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: realtime_endpoint(base_url),
            bearer_token: RwLock::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn set_bearer_token(&self, token: Option<String>) {
        *self.bearer_token.write() = token.filter(|value| !value.trim().is_empty());
    }

    async fn fetch_realtime_quotes(&self, codes: &[String]) -> Result<QuoteBatch, AppError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&RealtimeRequestWire { rows: codes });
        let token = self.bearer_token.read().clone();
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?.error_for_status()?;
        let mut payload = response.bytes().await?.to_vec();
        parse_realtime_payload(&mut payload)
    }
}

impl QuoteFetcher for RealtimeQuoteClient {
    fn fetch_quotes<'a>(&'a self, codes: &'a [String]) -> QuoteFuture<'a> {
        self.fetch_realtime_quotes(codes).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_endpoint_joins_base_url() {
        assert_eq!(
            realtime_endpoint("https://quotes.example.com/"),
            "https://quotes.example.com/api-xcdh/StockRealTime/stock_realtimes"
        );
    }

    #[test]
    fn request_body_wraps_codes_in_rows() {
        let codes = vec!["600000.SH".to_string(), "000001.SZ".to_string()];
        let body = simd_json::to_string(&RealtimeRequestWire { rows: &codes })
            .expect("request body should serialize");
        assert_eq!(body, r#"{"rows":["600000.SH","000001.SZ"]}"#);
    }

    #[test]
    fn blank_token_is_ignored() {
        let client = RealtimeQuoteClient::new(Client::new(), "http://127.0.0.1:8080");
        client.set_bearer_token(Some("  ".to_string()));
        assert!(client.bearer_token.read().is_none());

        client.set_bearer_token(Some("abc".to_string()));
        assert_eq!(client.bearer_token.read().as_deref(), Some("abc"));
    }
}
