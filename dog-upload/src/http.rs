//! HTTP collaborators: a JSON signing endpoint, signed-URL `PUT`, and a
//! JSON delete endpoint.
//!
//! Both endpoints answer with the `{ ok, data }` / `{ ok: false, error }`
//! envelope.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    Destination, DestinationRequest, FileDescriptor, ObjectDeleter, ProgressSink,
    SignedUrlIssuer, UploadError, UploadResult, UploadTransport,
};

const SIGN_PATH: &str = "/api/uploads/sign";
const DELETE_PATH: &str = "/api/uploads/delete";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    data: Option<T>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedUpload {
    signed_url: String,
    storage_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest<'a> {
    storage_path: &'a str,
}

/// Unwrap an envelope, falling back to `fallback` when the server gave no message
async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
    fallback: &str,
) -> Result<T, String> {
    let status = response.status();
    let envelope = match response.json::<Envelope<T>>().await {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(status = %status, error = %e, "Unreadable response envelope");
            return Err(fallback.to_string());
        }
    };

    match envelope {
        Envelope {
            ok: true,
            data: Some(data),
            ..
        } => Ok(data),
        Envelope {
            error: Some(error), ..
        } => {
            debug!(status = %status, code = %error.code, "Endpoint declined");
            Err(error.message)
        }
        _ => Err(fallback.to_string()),
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Requests destinations from `POST {base}/api/uploads/sign`
#[derive(Debug, Clone)]
pub struct HttpUrlIssuer {
    client: Client,
    url: String,
}

impl HttpUrlIssuer {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            url: endpoint(base_url, SIGN_PATH),
        }
    }
}

#[async_trait]
impl SignedUrlIssuer for HttpUrlIssuer {
    async fn issue(&self, request: &DestinationRequest) -> UploadResult<Destination> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Signing endpoint unreachable");
                UploadError::destination_rejected("Failed to get upload URL")
            })?;

        let signed: SignedUpload = read_envelope(response, "Failed to get upload URL")
            .await
            .map_err(UploadError::destination_rejected)?;

        Ok(Destination::new(signed.signed_url, signed.storage_path))
    }
}

/// Streams the file to the signed URL with `PUT`
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UploadTransport for HttpTransport {
    async fn put(
        &self,
        destination: &Destination,
        descriptor: &FileDescriptor,
        progress: ProgressSink,
    ) -> UploadResult<()> {
        let total = descriptor.size;
        let mut source = descriptor.source.open();

        let counted = async_stream::stream! {
            let mut sent = 0u64;
            while let Some(chunk) = source.next().await {
                if let Ok(bytes) = &chunk {
                    sent += bytes.len() as u64;
                    progress.report(sent, total);
                }
                yield chunk;
            }
        };

        let response = self
            .client
            .put(&destination.write_target)
            .header(header::CONTENT_TYPE, descriptor.effective_content_type())
            .header(header::CONTENT_LENGTH, total)
            .body(reqwest::Body::wrap_stream(counted))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Upload request failed");
                UploadError::transfer_failed("Network error during upload")
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(UploadError::HttpStatus {
                status: status.as_u16(),
            })
        }
    }
}

/// Removes objects through `DELETE {base}/api/uploads/delete`
#[derive(Debug, Clone)]
pub struct HttpObjectDeleter {
    client: Client,
    url: String,
}

impl HttpObjectDeleter {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            url: endpoint(base_url, DELETE_PATH),
        }
    }
}

#[async_trait]
impl ObjectDeleter for HttpObjectDeleter {
    async fn delete(&self, storage_path: &str) -> UploadResult<()> {
        let response = self
            .client
            .delete(&self.url)
            .json(&DeleteRequest { storage_path })
            .send()
            .await
            .map_err(UploadError::backend)?;

        // submitted tracks are protected server-side
        if response.status() == StatusCode::FORBIDDEN {
            return Err(UploadError::HttpStatus { status: 403 });
        }

        read_envelope::<serde_json::Value>(response, "Failed to delete file from storage")
            .await
            .map(|_| ())
            .map_err(|message| UploadError::backend(std::io::Error::other(message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_without_double_slash() {
        assert_eq!(
            endpoint("https://demo.example/", SIGN_PATH),
            "https://demo.example/api/uploads/sign"
        );
        assert_eq!(
            endpoint("http://localhost:3000", DELETE_PATH),
            "http://localhost:3000/api/uploads/delete"
        );
    }

    #[test]
    fn sign_envelope_parses_both_shapes() {
        let ok: Envelope<SignedUpload> = serde_json::from_str(
            r#"{"ok":true,"data":{"signedUrl":"https://s/put?t=1","storagePath":"submissions/u.mp3","token":"t"}}"#,
        )
        .unwrap();
        let data = ok.data.unwrap();
        assert_eq!(data.signed_url, "https://s/put?t=1");
        assert_eq!(data.storage_path, "submissions/u.mp3");

        let declined: Envelope<SignedUpload> = serde_json::from_str(
            r#"{"ok":false,"error":{"code":"BAD_REQUEST","message":"Invalid file type. Allowed: .mp3"}}"#,
        )
        .unwrap();
        assert!(!declined.ok);
        assert_eq!(declined.error.unwrap().message, "Invalid file type. Allowed: .mp3");
    }

    #[test]
    fn delete_request_uses_camel_case() {
        let body = serde_json::to_value(DeleteRequest {
            storage_path: "submissions/a.mp3",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "storagePath": "submissions/a.mp3" }));
    }
}
