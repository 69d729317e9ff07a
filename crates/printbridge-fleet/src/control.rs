//! HTTP client for the control plane.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::config::ControlPlaneConfig;
use crate::error::{FleetError, Result};
use crate::types::{InitResponse, PrinterDescriptor, PrinterId, StatusReport, UpdateResponse};

/// The remote service that owns the desired printer set.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch the initial printer set.
    async fn init(&self) -> Result<Vec<PrinterDescriptor>>;

    /// Send the status report; receive commands and the desired printer set.
    async fn update(&self, report: &StatusReport) -> Result<UpdateResponse>;

    /// Upload one base64 JPEG camera image.
    async fn upload_image(&self, printer_id: &PrinterId, image: &str) -> Result<()>;
}

/// [`ControlPlane`] over HTTPS with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    base_url: String,
}

impl HttpControlPlane {
    /// Create a client from configuration.
    pub fn new(config: &ControlPlaneConfig) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| FleetError::Config("api key contains invalid characters".into()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(FleetError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(FleetError::Http)?;

        if !response.status().is_success() {
            return Err(FleetError::control_plane(format!(
                "{path} failed: {}",
                response.status()
            )));
        }

        response.json().await.map_err(FleetError::Http)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn init(&self) -> Result<Vec<PrinterDescriptor>> {
        let response: InitResponse = self.post("/init", &json!({})).await?;
        Ok(response.printers)
    }

    async fn update(&self, report: &StatusReport) -> Result<UpdateResponse> {
        self.post("/update", report).await
    }

    async fn upload_image(&self, printer_id: &PrinterId, image: &str) -> Result<()> {
        let url = format!("{}/camera", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "printer_id": printer_id, "image": image }))
            .send()
            .await
            .map_err(FleetError::Http)?;

        if !response.status().is_success() {
            return Err(FleetError::control_plane(format!(
                "/camera failed: {}",
                response.status()
            )));
        }
        Ok(())
    }
}
