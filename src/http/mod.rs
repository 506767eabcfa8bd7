use anyhow::Result;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, instrument};

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds a client that sends `authorization` verbatim on every request.
    pub fn new(authorization: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(value) = authorization {
            let mut value = HeaderValue::from_str(value)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("moviedeck/0.1.0")
            .default_headers(headers)
            .build()?;

        Ok(Self { client })
    }

    #[instrument(skip(self), fields(url = %url))]
    pub async fn get(&self, url: &str) -> Result<Response> {
        debug!("Making GET request");
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            error!("HTTP request failed with status: {}", response.status());
            return Err(anyhow::anyhow!("HTTP request failed: {}", response.status()));
        }

        Ok(response)
    }

    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url).await?;
        let json = response.json::<T>().await?;
        Ok(json)
    }

    /// POSTs `body` as JSON; the response body is not read.
    #[instrument(skip(self, body), fields(url = %url))]
    pub async fn post_json<B: Serialize>(&self, url: &str, body: &B) -> Result<()> {
        debug!("Making POST request");
        let response = self.client
            .post(url)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            error!("HTTP POST failed with status: {}", response.status());
            return Err(anyhow::anyhow!("HTTP POST failed: {}", response.status()));
        }

        Ok(())
    }
}
