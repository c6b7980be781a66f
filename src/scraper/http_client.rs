use crate::config::ScraperConfig;
use crate::error::FetchError;
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use super::{RawResponse, Transport};

pub struct HttpClient {
    inner: reqwest::Client,
    config: ScraperConfig,
    referer: Option<String>,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self, FetchError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // Accept cookies so session-based pages work
            .cookie_store(true)
            .build()?;

        Ok(Self {
            inner,
            config: config.clone(),
            referer: None,
        })
    }

    /// Send `Referer` on form posts (the history API checks it).
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = rand::rng().random_range(0..=self.config.jitter_ms);
        let total = Duration::from_millis(self.config.request_delay_ms + jitter);
        if !total.is_zero() {
            sleep(total).await;
        }
    }

    async fn read(resp: reqwest::Response) -> Result<RawResponse, FetchError> {
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(RawResponse { status, body })
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn get_text(&self, url: &str) -> Result<RawResponse, FetchError> {
        self.polite_delay().await;
        debug!("GET {}", url);

        let resp = self.inner.get(url).send().await?;
        let raw = Self::read(resp).await?;
        debug!("GET {} -> {} ({} bytes)", url, raw.status, raw.body.len());
        Ok(raw)
    }

    async fn post_form(
        &self,
        url: &str,
        fields: &[(&'static str, String)],
    ) -> Result<RawResponse, FetchError> {
        self.polite_delay().await;
        debug!("POST {}", url);

        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();

        let mut req = self
            .inner
            .post(url)
            .header(ACCEPT, "application/json, text/javascript, */*; q=0.01")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.8")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=UTF-8")
            .body(body);
        if let Some(referer) = &self.referer {
            req = req.header(REFERER, referer.as_str());
        }

        let raw = Self::read(req.send().await?).await?;
        debug!("POST {} -> {} ({} bytes)", url, raw.status, raw.body.len());
        Ok(raw)
    }
}
