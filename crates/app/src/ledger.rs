//! Ledger client speaking JSON over HTTP

use async_trait::async_trait;
use common::agent::ledger::{Account, LedgerClient, LedgerError, SignedOperation, SignedQuery};
use common::prelude::PublicKey;
use reqwest::{header::HeaderMap, header::HeaderValue, Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum HttpLedgerError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("HTTP status {0}: {1}")]
    HttpStatus(StatusCode, String),
}

impl From<HttpLedgerError> for LedgerError {
    fn from(e: HttpLedgerError) -> Self {
        match e {
            HttpLedgerError::HttpStatus(status, body) if status.is_client_error() => {
                LedgerError::Rejected(body)
            }
            HttpLedgerError::HttpStatus(status, body) => {
                LedgerError::Unreachable(format!("{}: {}", status, body))
            }
            HttpLedgerError::Reqwest(e) if e.is_decode() => LedgerError::Default(e.into()),
            HttpLedgerError::Reqwest(e) => LedgerError::Unreachable(e.to_string()),
            HttpLedgerError::UrlParse(e) => LedgerError::Default(e.into()),
        }
    }
}

/// A request against the ledger endpoint
pub trait LedgerRequest {
    type Response: DeserializeOwned;

    fn build_request(self, base: &Url, client: &Client) -> Result<RequestBuilder, HttpLedgerError>;
}

pub struct SubmitRequest(pub SignedOperation);

impl LedgerRequest for SubmitRequest {
    type Response = Value;

    fn build_request(self, base: &Url, client: &Client) -> Result<RequestBuilder, HttpLedgerError> {
        Ok(client.post(base.join("submit")?).json(&self.0))
    }
}

pub struct QueryRequest(pub SignedQuery);

impl LedgerRequest for QueryRequest {
    type Response = Map<String, Value>;

    fn build_request(self, base: &Url, client: &Client) -> Result<RequestBuilder, HttpLedgerError> {
        Ok(client.post(base.join("query")?).json(&self.0))
    }
}

pub struct AccountRequest(pub PublicKey);

impl LedgerRequest for AccountRequest {
    type Response = Account;

    fn build_request(self, base: &Url, client: &Client) -> Result<RequestBuilder, HttpLedgerError> {
        let url = base.join(&format!("accounts/{}", self.0.to_hex()))?;
        Ok(client.get(url))
    }
}

#[derive(Debug, Clone)]
pub struct HttpLedger {
    remote: Url,
    client: Client,
}

impl HttpLedger {
    pub fn new(remote: &Url) -> Result<Self, HttpLedgerError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder().default_headers(default_headers).build()?;

        // endpoints are joined relative to the base, which needs a trailing slash
        let mut remote = remote.clone();
        if !remote.path().ends_with('/') {
            let path = format!("{}/", remote.path());
            remote.set_path(&path);
        }

        Ok(Self { remote, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.remote
    }

    pub async fn call<T: LedgerRequest>(&self, request: T) -> Result<T::Response, HttpLedgerError> {
        let request_builder = request.build_request(&self.remote, &self.client)?;
        let response = request_builder.send().await?;

        if response.status().is_success() {
            Ok(response.json::<T::Response>().await?)
        } else {
            Err(HttpLedgerError::HttpStatus(
                response.status(),
                response.text().await?,
            ))
        }
    }
}

#[async_trait]
impl LedgerClient for HttpLedger {
    async fn submit(&self, operation: SignedOperation) -> Result<(), LedgerError> {
        tracing::debug!(sequence = operation.sequence, "submitting operation");
        self.call(SubmitRequest(operation)).await?;
        Ok(())
    }

    async fn query(&self, query: SignedQuery) -> Result<Map<String, Value>, LedgerError> {
        Ok(self.call(QueryRequest(query)).await?)
    }

    async fn account(&self, public_key: &PublicKey) -> Result<Option<Account>, LedgerError> {
        match self.call(AccountRequest(*public_key)).await {
            Ok(account) => Ok(Some(account)),
            Err(HttpLedgerError::HttpStatus(StatusCode::NOT_FOUND, _)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
