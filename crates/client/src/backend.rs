use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use nearbux_core::backend::{
    Availability, AvailabilityQuery, BackendGateway, LocationUpdate, PasswordUpdate,
    PromotionRequest, PromotionStatus, RegistrationRequest,
};
use nearbux_core::config::BackendConfig;
use nearbux_core::domain::{Audience, ImageAttachment, PromotionId, ShopId};
use nearbux_core::errors::{ExecutionError, NetworkError, ServerError};
use nearbux_core::verification::IdentityToken;

/// REST client for the NearBux backend.
#[derive(Clone, Debug)]
pub struct HttpBackendGateway {
    client: Client,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PromotionLookup {
    shop_id: i64,
}

#[derive(Debug, Deserialize)]
struct PromotionLookupResponse {
    message: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromotionCreated {
    adver_id: i64,
}

impl HttpBackendGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url, timeout })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.base_url.clone(), Duration::from_secs(config.timeout_secs))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ExecutionError> {
        let response = request.send().await.map_err(|error| self.transport_error(error))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|parsed| parsed.message.or(parsed.error))
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| {
                status.canonical_reason().unwrap_or("request failed").to_string()
            });
        warn!(
            event_name = "backend.request.rejected",
            status = status.as_u16(),
            message = %message,
            "backend rejected request"
        );
        Err(ServerError::new(status.as_u16(), message).into())
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        &self,
        response: Response,
    ) -> Result<T, ExecutionError> {
        let status = response.status().as_u16();
        response.json::<T>().await.map_err(|error| {
            ServerError::new(status, format!("unexpected response body: {error}")).into()
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> ExecutionError {
        if error.is_timeout() {
            let after_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
            return ExecutionError::Timeout { after_ms };
        }
        NetworkError(error.to_string()).into()
    }
}

#[async_trait]
impl BackendGateway for HttpBackendGateway {
    async fn check_availability(
        &self,
        audience: Audience,
        query: &AvailabilityQuery,
    ) -> Result<Availability, ExecutionError> {
        let url = self.url(&format!("{}/validate", audience.route_prefix()));
        let response = self.send(self.client.post(url).json(query)).await?;
        self.decode(response).await
    }

    async fn register(
        &self,
        audience: Audience,
        request: &RegistrationRequest,
        identity: &IdentityToken,
    ) -> Result<(), ExecutionError> {
        let url = self.url(&format!("{}/signup", audience.route_prefix()));
        debug!(event_name = "backend.register", url = %url, "registering account");
        self.send(self.client.post(url).bearer_auth(identity.expose()).json(request)).await?;
        Ok(())
    }

    async fn update_location(&self, request: &LocationUpdate) -> Result<(), ExecutionError> {
        self.send(self.client.post(self.url("/user/info")).json(request)).await?;
        Ok(())
    }

    async fn update_password(
        &self,
        request: &PasswordUpdate,
        identity: &IdentityToken,
    ) -> Result<(), ExecutionError> {
        let request = self
            .client
            .post(self.url("/shop/updatepass"))
            .bearer_auth(identity.expose())
            .json(request);
        self.send(request).await?;
        Ok(())
    }

    async fn promotion_status(&self, shop: ShopId) -> Result<PromotionStatus, ExecutionError> {
        let lookup = PromotionLookup { shop_id: shop.0 };
        let response = self.send(self.client.post(self.url("/shop/already")).json(&lookup)).await?;
        let body: PromotionLookupResponse = self.decode(response).await?;
        Ok(PromotionStatus { active: body.message == 1 })
    }

    async fn create_promotion(
        &self,
        request: &PromotionRequest,
    ) -> Result<PromotionId, ExecutionError> {
        let response =
            self.send(self.client.post(self.url("/shop/create-promotion")).json(request)).await?;
        let created: PromotionCreated = self.decode(response).await?;
        Ok(PromotionId(created.adver_id))
    }

    async fn attach_promotion_image(
        &self,
        id: PromotionId,
        image: &ImageAttachment,
    ) -> Result<(), ExecutionError> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.content_type)
            .map_err(|error| self.transport_error(error))?;
        let form = Form::new().part("image", part).text("adverId", id.0.to_string());
        self.send(self.client.post(self.url("/api/upload-image")).multipart(form)).await?;
        Ok(())
    }
}
