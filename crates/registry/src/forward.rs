use crate::{NodeIdentity, RegistryError};
use models::{Config, Mode, RegisterRequest, Schema};
use serde::Deserialize;
use std::time::Duration;

/// Caller headers carried through to the leader, e.g. authorization and
/// request tracing.
pub type ForwardHeaders = Vec<(String, String)>;

/// REST client used by followers to forward mutations to the leader.
pub struct LeaderRestClient {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RestErrorBody {
    error_code: i32,
    message: String,
}

impl LeaderRestClient {
    pub fn new(timeout: Duration) -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RegistryError::Initialization(err.to_string()))?;
        Ok(Self { http })
    }

    #[tracing::instrument(skip(self, headers, request))]
    pub async fn register_schema(
        &self,
        leader: &NodeIdentity,
        headers: &ForwardHeaders,
        subject: &str,
        request: &RegisterRequest,
        normalize: bool,
    ) -> Result<Schema, RegistryError> {
        let url = format!(
            "{}/subjects/{}/versions?normalize={normalize}",
            leader.base_url(),
            urlencode(subject),
        );
        self.send(self.http.post(url).json(request), headers).await
    }

    pub async fn update_config(
        &self,
        leader: &NodeIdentity,
        headers: &ForwardHeaders,
        subject: Option<&str>,
        config: &Config,
    ) -> Result<Config, RegistryError> {
        let url = match subject {
            Some(subject) => format!("{}/config/{}", leader.base_url(), urlencode(subject)),
            None => format!("{}/config", leader.base_url()),
        };
        self.send(self.http.put(url).json(config), headers).await
    }

    pub async fn delete_config(
        &self,
        leader: &NodeIdentity,
        headers: &ForwardHeaders,
        subject: Option<&str>,
    ) -> Result<(), RegistryError> {
        let url = match subject {
            Some(subject) => format!("{}/config/{}", leader.base_url(), urlencode(subject)),
            None => format!("{}/config", leader.base_url()),
        };
        let _: serde_json::Value = self.send(self.http.delete(url), headers).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, headers))]
    pub async fn delete_schema_version(
        &self,
        leader: &NodeIdentity,
        headers: &ForwardHeaders,
        subject: &str,
        version: i32,
        permanent: bool,
    ) -> Result<i32, RegistryError> {
        let url = format!(
            "{}/subjects/{}/versions/{version}?permanent={permanent}",
            leader.base_url(),
            urlencode(subject),
        );
        self.send(self.http.delete(url), headers).await
    }

    #[tracing::instrument(skip(self, headers))]
    pub async fn delete_subject(
        &self,
        leader: &NodeIdentity,
        headers: &ForwardHeaders,
        subject: &str,
        permanent: bool,
    ) -> Result<Vec<i32>, RegistryError> {
        let url = format!(
            "{}/subjects/{}?permanent={permanent}",
            leader.base_url(),
            urlencode(subject),
        );
        self.send(self.http.delete(url), headers).await
    }

    pub async fn set_mode(
        &self,
        leader: &NodeIdentity,
        headers: &ForwardHeaders,
        subject: Option<&str>,
        mode: Mode,
        force: bool,
    ) -> Result<(), RegistryError> {
        let url = match subject {
            Some(subject) => format!(
                "{}/mode/{}?force={force}",
                leader.base_url(),
                urlencode(subject)
            ),
            None => format!("{}/mode?force={force}", leader.base_url()),
        };
        let body = serde_json::json!({ "mode": mode });
        let _: serde_json::Value = self.send(self.http.put(url).json(&body), headers).await?;
        Ok(())
    }

    pub async fn delete_subject_mode(
        &self,
        leader: &NodeIdentity,
        headers: &ForwardHeaders,
        subject: &str,
    ) -> Result<(), RegistryError> {
        let url = format!("{}/mode/{}", leader.base_url(), urlencode(subject));
        let _: serde_json::Value = self.send(self.http.delete(url), headers).await?;
        Ok(())
    }

    // Transport failures surface as RequestForwarding; structured errors
    // from the leader are propagated with status and error code intact.
    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        headers: &ForwardHeaders,
    ) -> Result<T, RegistryError> {
        let mut request = request;
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|err| RegistryError::RequestForwarding(err.to_string()))?;
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|err| RegistryError::RequestForwarding(err.to_string()))
        } else {
            let body: RestErrorBody = response.json().await.unwrap_or(RestErrorBody {
                error_code: status.as_u16() as i32,
                message: "leader returned an unreadable error body".to_string(),
            });
            Err(RegistryError::Rest {
                status: status.as_u16(),
                code: body.error_code,
                message: body.message,
            })
        }
    }
}

// Subjects may contain context delimiters; keep them path-safe.
fn urlencode(subject: &str) -> String {
    url::form_urlencoded::byte_serialize(subject.as_bytes()).collect()
}
