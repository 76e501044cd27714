//! Transactional HTTP endpoint client.

use std::time::Duration;

use async_trait::async_trait;

use super::wire::{self, TxResponse};
use super::{CypherClient, CypherRows, CypherTx};
use crate::config::Neo4jConfig;
use crate::engine::AccessMode;
use crate::error::{GraphError, Result};
use crate::query::cypher::Statement;

#[derive(Debug, Clone)]
struct Endpoint {
    http: reqwest::Client,
    base: String,
    user: Option<String>,
    password: Option<String>,
}

impl Endpoint {
    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let request = self.http.request(method, url);
        match &self.user {
            Some(user) => request.basic_auth(user, self.password.as_ref()),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, statement: Option<&Statement>) -> Result<TxResponse> {
        let response = request
            .send()
            .await
            .map_err(|err| GraphError::Connection(err.to_string()))?;

        let response: TxResponse = response
            .json()
            .await
            .map_err(|err| GraphError::Connection(format!("malformed response: {err}")))?;

        if let Some(error) = response.errors.first() {
            return Err(match statement {
                Some(statement) => GraphError::query(statement.text.clone(), statement.parameter_keys(), error.clone()),
                None => GraphError::Connection(error.to_string()),
            });
        }

        Ok(response)
    }
}

/// [`CypherClient`] over the native engine's HTTP API.
#[derive(Debug, Clone)]
pub struct Neo4jHttpClient {
    endpoint: Endpoint,
}

impl Neo4jHttpClient {
    /// Build a client for `config`.
    pub fn new(config: &Neo4jConfig) -> Result<Self> {
        tracing::info!(
            url = %config.url,
            database = %config.database,
            request_timeout_secs = config.request_timeout_secs,
            "Initializing native engine HTTP client"
        );

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| GraphError::Connection(err.to_string()))?;

        Ok(Self {
            endpoint: Endpoint {
                http,
                base: format!("{}/db/{}/tx", config.url.trim_end_matches('/'), config.database),
                user: config.user.clone(),
                password: config.password.clone(),
            },
        })
    }
}

#[async_trait]
impl CypherClient for Neo4jHttpClient {
    async fn begin(&self, mode: AccessMode) -> Result<Box<dyn CypherTx>> {
        let access = if mode.is_write() { "WRITE" } else { "READ" };
        let request = self
            .endpoint
            .request(reqwest::Method::POST, self.endpoint.base.clone())
            .header("access-mode", access)
            .json(&serde_json::json!({ "statements": [] }));

        let response = self.endpoint.send(request, None).await?;
        let id = response
            .commit
            .as_deref()
            .and_then(wire::transaction_id)
            .ok_or_else(|| GraphError::Connection("transaction begin returned no commit url".to_string()))?;

        Ok(Box::new(HttpTx {
            endpoint: self.endpoint.clone(),
            url: format!("{}/{}", self.endpoint.base, id),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct HttpTx {
    endpoint: Endpoint,
    url: String,
}

#[async_trait]
impl CypherTx for HttpTx {
    async fn run(&mut self, statement: &Statement) -> Result<CypherRows> {
        let request = self
            .endpoint
            .request(reqwest::Method::POST, self.url.clone())
            .json(&wire::request_body(statement));

        let response = self.endpoint.send(request, Some(statement)).await?;
        match response.results.into_iter().next() {
            Some(result) => wire::decode_result(result),
            None => Ok(CypherRows::default()),
        }
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let request = self
            .endpoint
            .request(reqwest::Method::POST, format!("{}/commit", self.url))
            .json(&serde_json::json!({ "statements": [] }));
        self.endpoint.send(request, None).await.map(|_| ())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let request = self.endpoint.request(reqwest::Method::DELETE, self.url.clone());
        self.endpoint.send(request, None).await.map(|_| ())
    }
}
