use std::time::Duration;

use adrules_protocol::entity::{EntityType, TimePreset};
use adrules_protocol::metrics::MetricsSnapshot;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use crate::connector::{AdPlatformConnector, EntityMutation, EntityState, PlatformLimits};
use crate::error::ConnectorError;

/// Typed HTTP client for an ad-platform connector service.
///
/// Routes, relative to the base URL:
/// `GET entities/{type}/{id}/snapshot?time_preset=..`, `GET entities/{type}/{id}`
/// and `POST entities/{type}/{id}/mutations`.
#[derive(Clone)]
pub struct HttpConnector {
    http: reqwest::Client,
    base_url: Url,
    limits: PlatformLimits,
}

impl HttpConnector {
    pub fn new(base_url: &str, timeout: Duration, limits: PlatformLimits) -> Result<Self, ConnectorError> {
        let mut url = Url::parse(base_url).map_err(|err| ConnectorError::InvalidUrl {
            url: base_url.to_string(),
            message: err.to_string(),
        })?;

        if !url.path().ends_with('/') {
            let mut path = url.path().trim_end_matches('/').to_string();
            path.push('/');
            url.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ConnectorError::Connect(err.to_string()))?;

        Ok(Self {
            http,
            base_url: url,
            limits,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn entity_url(&self, entity_type: EntityType, entity_id: &str, suffix: &str) -> Result<Url, ConnectorError> {
        let relative = format!(
            "entities/{}/{}{}",
            entity_type.as_str().to_ascii_lowercase(),
            encode_path_segment(entity_id),
            suffix
        );
        self.base_url
            .join(&relative)
            .map_err(|err| ConnectorError::InvalidUrl {
                url: format!("{}{}", self.base_url, relative),
                message: err.to_string(),
            })
    }

    async fn read_json<T: DeserializeOwned>(
        entity_id: &str,
        response: reqwest::Response,
    ) -> Result<T, ConnectorError> {
        let response = check_status(entity_id, response).await?;
        response
            .json()
            .await
            .map_err(|err| ConnectorError::Decode(err.to_string()))
    }
}

async fn check_status(entity_id: &str, response: reqwest::Response) -> Result<reqwest::Response, ConnectorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ConnectorError::EntityNotFound(entity_id.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(ConnectorError::Status {
        status: status.as_u16(),
        body,
    })
}

fn encode_path_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

#[async_trait]
impl AdPlatformConnector for HttpConnector {
    async fn fetch_snapshot(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        time_preset: TimePreset,
    ) -> Result<MetricsSnapshot, ConnectorError> {
        let url = self.entity_url(entity_type, entity_id, "/snapshot")?;
        let response = self
            .http
            .get(url)
            .query(&[("time_preset", time_preset.as_str())])
            .send()
            .await?;
        Self::read_json(entity_id, response).await
    }

    async fn entity_state(&self, entity_id: &str, entity_type: EntityType) -> Result<EntityState, ConnectorError> {
        let url = self.entity_url(entity_type, entity_id, "")?;
        let response = self.http.get(url).send().await?;
        Self::read_json(entity_id, response).await
    }

    async fn mutate_entity(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        mutation: EntityMutation,
    ) -> Result<(), ConnectorError> {
        let url = self.entity_url(entity_type, entity_id, "/mutations")?;
        let response = self.http.post(url).json(&mutation).send().await?;
        check_status(entity_id, response).await?;
        Ok(())
    }

    fn limits(&self) -> PlatformLimits {
        self.limits
    }
}
