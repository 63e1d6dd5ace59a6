use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::record::{HistoryPage, Record, RecordId, Verification};

/// The provenance backend's REST surface.
#[async_trait]
pub trait ProvenanceApi: Send + Sync {
    async fn list_records(&self) -> Result<Vec<Record>, ClientError>;

    async fn add_record(&self, data: &str, user: &str) -> Result<(), ClientError>;

    async fn update_record(&self, id: &RecordId, data: &str, user: &str)
    -> Result<(), ClientError>;

    async fn delete_record(&self, id: &RecordId, user: &str) -> Result<(), ClientError>;

    /// Any reply with a JSON body is a verification outcome, whatever its status.
    async fn verify_record(&self, id: &RecordId) -> Result<Verification, ClientError>;

    /// A 404 is an empty page, not an error.
    async fn fetch_history(&self, id: &RecordId) -> Result<HistoryPage, ClientError>;

    /// Wipes every record and log row. Development backends only.
    async fn reset(&self) -> Result<(), ClientError>;
}

#[derive(Serialize)]
struct RecordBody<'a> {
    data: &'a str,
    user: &'a str,
}

#[derive(Serialize)]
struct UserBody<'a> {
    user: &'a str,
}

#[derive(Clone)]
pub struct HttpApi {
    base: Url,
    client: Client,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base = Url::parse(&config.base_url)
            .map_err(|_| ClientError::InvalidUrl(config.base_url.clone()))?;
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ClientError::Transport)?;
        Ok(HttpApi { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<Response, ClientError> {
        debug!(%method, %url, "backend request");
        let mut req = self.client.request(method.clone(), url.clone());
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send().await.map_err(|e| {
            warn!(%method, %url, error = %e, "backend unreachable");
            ClientError::Transport(e)
        })
    }

    /// Mutations only care that the backend accepted them.
    async fn expect_success(&self, endpoint: &str, resp: Response) -> Result<(), ClientError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        warn!(endpoint, %status, "backend rejected request");
        Err(ClientError::Status {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        resp: Response,
    ) -> Result<T, ClientError> {
        let text = resp.text().await.map_err(ClientError::Transport)?;
        serde_json::from_str(&text).map_err(|source| ClientError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }
}

#[async_trait]
impl ProvenanceApi for HttpApi {
    async fn list_records(&self) -> Result<Vec<Record>, ClientError> {
        let url = self.endpoint(&["records"])?;
        let resp = self.send::<()>(Method::GET, url, None).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        self.read_json("/records", resp).await
    }

    async fn add_record(&self, data: &str, user: &str) -> Result<(), ClientError> {
        let url = self.endpoint(&["add"])?;
        let resp = self
            .send(Method::POST, url, Some(&RecordBody { data, user }))
            .await?;
        self.expect_success("/add", resp).await
    }

    async fn update_record(
        &self,
        id: &RecordId,
        data: &str,
        user: &str,
    ) -> Result<(), ClientError> {
        let url = self.endpoint(&["update", id.as_str()])?;
        let resp = self
            .send(Method::PUT, url, Some(&RecordBody { data, user }))
            .await?;
        self.expect_success("/update", resp).await
    }

    async fn delete_record(&self, id: &RecordId, user: &str) -> Result<(), ClientError> {
        let url = self.endpoint(&["delete", id.as_str()])?;
        let resp = self
            .send(Method::DELETE, url, Some(&UserBody { user }))
            .await?;
        self.expect_success("/delete", resp).await
    }

    async fn verify_record(&self, id: &RecordId) -> Result<Verification, ClientError> {
        let url = self.endpoint(&["verify", id.as_str()])?;
        let resp = self.send::<()>(Method::GET, url, None).await?;
        let status = resp.status();
        let text = resp.text().await.map_err(ClientError::Transport)?;

        match serde_json::from_str::<Verification>(&text) {
            Ok(Verification::Failed(mut failure)) => {
                failure.http_status = Some(status.as_u16());
                Ok(Verification::Failed(failure))
            }
            Ok(report) => Ok(report),
            Err(_) if !status.is_success() => Err(ClientError::Status {
                status: status.as_u16(),
                message: error_message(&text),
            }),
            Err(source) => Err(ClientError::Decode {
                endpoint: "/verify".to_string(),
                source,
            }),
        }
    }

    async fn fetch_history(&self, id: &RecordId) -> Result<HistoryPage, ClientError> {
        let url = self.endpoint(&["history", id.as_str()])?;
        let resp = self.send::<()>(Method::GET, url, None).await?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            let text = resp.text().await.unwrap_or_default();
            debug!(record = %id, "no history on backend");
            let mut page = serde_json::from_str::<HistoryPage>(&text).unwrap_or_default();
            page.history = None;
            return Ok(page);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(record = %id, %status, "history lookup failed");
            return Err(ClientError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        self.read_json("/history", resp).await
    }

    async fn reset(&self) -> Result<(), ClientError> {
        let url = self.endpoint(&["reset_db"])?;
        let resp = self.send::<()>(Method::DELETE, url, None).await?;
        self.expect_success("/reset_db", resp).await
    }
}

/// Pulls `error` or `message` out of a JSON error body, else the raw text.
fn error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    parsed
        .as_ref()
        .and_then(|v| v.get("error").or_else(|| v.get("message")))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}
