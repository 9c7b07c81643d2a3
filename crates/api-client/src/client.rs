//! reqwest-backed session API client.
//!
//! One HTTP call per trait method, errors mapped to
//! [`TransferError::Transport`]. Per-call deadlines and cancellation
//! are layered on by the engine, so the client itself only bounds the
//! connect phase.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use mediadrop_protocol::{
    CreateSessionResponse, FinalizeResponse, SaveThumbnailRequest, SaveThumbnailResponse,
    SessionDescriptor, SessionInfo, UploadChunkRequest, UploadChunkResponse,
};
use mediadrop_transfer::{ApiFuture, SessionApi, TransferError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error-body excerpt carried into a [`TransferError`].
const ERROR_BODY_LIMIT: usize = 256;

/// Client for the MediaDrop upload session endpoints.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Creates a client for `base_url`, optionally sending `auth_token`
    /// as a bearer token on every request.
    pub fn new(base_url: &str, auth_token: Option<String>) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransferError::Transport(format!("http client init: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn sessions_url(&self) -> String {
        format!("{}/api/uploads/sessions", self.base_url)
    }

    fn session_url(&self, token: &str) -> String {
        format!("{}/{token}", self.sessions_url())
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, TransferError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .authorize(self.http.post(url))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        parse_json(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, url: &str) -> Result<T, TransferError> {
        let resp = self
            .authorize(self.http.post(url))
            .send()
            .await
            .map_err(transport)?;
        parse_json(resp).await
    }

    async fn post_no_content(&self, url: &str) -> Result<(), TransferError> {
        let resp = self
            .authorize(self.http.post(url))
            .send()
            .await
            .map_err(transport)?;
        check_status(resp).await.map(|_| ())
    }

    async fn delete(&self, url: &str) -> Result<(), TransferError> {
        let resp = self
            .authorize(self.http.delete(url))
            .send()
            .await
            .map_err(transport)?;
        check_status(resp).await.map(|_| ())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, TransferError> {
        let resp = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(transport)?;
        parse_json(resp).await
    }
}

impl SessionApi for ApiClient {
    fn create_session<'a>(
        &'a self,
        descriptor: &'a SessionDescriptor,
    ) -> ApiFuture<'a, CreateSessionResponse> {
        Box::pin(async move {
            debug!(file = %descriptor.filename, size = descriptor.file_size, "creating session");
            self.post_json(&self.sessions_url(), descriptor).await
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        session_token: &'a str,
        chunk_index: u32,
        data: Vec<u8>,
    ) -> ApiFuture<'a, UploadChunkResponse> {
        Box::pin(async move {
            let url = format!("{}/chunks/{chunk_index}", self.session_url(session_token));
            let body = UploadChunkRequest { chunk_index, data };
            self.post_json(&url, &body).await
        })
    }

    fn finalize_upload<'a>(&'a self, session_token: &'a str) -> ApiFuture<'a, FinalizeResponse> {
        Box::pin(async move {
            let url = format!("{}/finalize", self.session_url(session_token));
            self.post(&url).await
        })
    }

    fn pause_session<'a>(&'a self, session_token: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            let url = format!("{}/pause", self.session_url(session_token));
            self.post_no_content(&url).await
        })
    }

    fn cancel_session<'a>(&'a self, session_token: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(async move { self.delete(&self.session_url(session_token)).await })
    }

    fn list_active_sessions(&self) -> ApiFuture<'_, Vec<SessionInfo>> {
        Box::pin(async move { self.get_json(&self.sessions_url()).await })
    }

    fn save_thumbnail<'a>(
        &'a self,
        session_token: &'a str,
        thumbnail_base64: &'a str,
    ) -> ApiFuture<'a, SaveThumbnailResponse> {
        Box::pin(async move {
            let url = format!("{}/thumbnail", self.session_url(session_token));
            let body = SaveThumbnailRequest {
                thumbnail: thumbnail_base64.to_string(),
            };
            self.post_json(&url, &body).await
        })
    }
}

fn transport(e: reqwest::Error) -> TransferError {
    TransferError::Transport(e.to_string())
}

async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, TransferError> {
    check_status(resp).await?.json().await.map_err(transport)
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, TransferError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TransferError::Transport(format!(
        "HTTP {status}: {}",
        excerpt(&body)
    )))
}

fn excerpt(body: &str) -> String {
    body.chars().take(ERROR_BODY_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_from_base() {
        let client = ApiClient::new("https://media.example", None).unwrap();
        assert_eq!(
            client.sessions_url(),
            "https://media.example/api/uploads/sessions"
        );
        assert_eq!(
            client.session_url("tok-1"),
            "https://media.example/api/uploads/sessions/tok-1"
        );
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let client = ApiClient::new("https://media.example/", None).unwrap();
        assert_eq!(
            client.sessions_url(),
            "https://media.example/api/uploads/sessions"
        );
    }

    #[test]
    fn excerpt_bounds_error_bodies() {
        let long = "x".repeat(10_000);
        assert_eq!(excerpt(&long).len(), ERROR_BODY_LIMIT);
        assert_eq!(excerpt("short"), "short");
    }

    #[tokio::test]
    async fn json_bodies_are_parsed_on_success() {
        let resp = http::Response::builder()
            .status(200)
            .body(r#"{"fileId":"file-9","url":"https://cdn.example/file-9"}"#)
            .unwrap();
        let parsed: FinalizeResponse = parse_json(reqwest::Response::from(resp)).await.unwrap();
        assert_eq!(parsed.file_id, "file-9");
        assert_eq!(parsed.url, "https://cdn.example/file-9");
        assert!(parsed.video_id.is_none());
    }

    #[tokio::test]
    async fn error_status_maps_to_transport_with_body() {
        let resp = http::Response::builder()
            .status(507)
            .body("insufficient storage")
            .unwrap();
        let err = parse_json::<FinalizeResponse>(reqwest::Response::from(resp))
            .await
            .unwrap_err();
        match err {
            TransferError::Transport(msg) => {
                assert!(msg.contains("507"));
                assert!(msg.contains("insufficient storage"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn connection_failure_maps_to_transport() {
        // Unroutable port on localhost: fails fast without a server.
        let client = ApiClient::new("http://127.0.0.1:1", None).unwrap();
        let err = client
            .list_active_sessions()
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Transport(_)));
    }
}
