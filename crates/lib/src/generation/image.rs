//! Image style-transfer backend client.
//!
//! The source image travels base64-encoded inside a `media_info_list` envelope; the generated
//! image comes back the same way in `media_info_list[0].media_data`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;

use super::GenerationError;
use crate::config::DEFAULT_IMAGE_ENDPOINT;

/// Format hint for both the uploaded source and the requested result.
pub const OUTPUT_FORMAT: &str = "jpg";

/// Encode an artifact to its text-safe form.
pub fn encode_artifact(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode an artifact from its text-safe form.
pub fn decode_artifact(encoded: &str) -> Result<Vec<u8>, GenerationError> {
    Ok(STANDARD.decode(encoded)?)
}

/// Request envelope: `{ parameter, extra, media_info_list }`.
#[derive(Debug, Clone, Serialize)]
pub struct ImageGenerationRequest {
    pub parameter: RequestParameter,
    /// Backend-specific extras; always empty.
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub media_info_list: Vec<MediaInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestParameter {
    /// Format of the generated image.
    pub rsp_media_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaInfo {
    /// Base64 source image.
    pub media_data: String,
    pub media_profiles: MediaProfiles,
    pub media_extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaProfiles {
    /// Format of `media_data`.
    pub media_data_type: String,
}

impl ImageGenerationRequest {
    /// Single-image request with the given output format and no extra parameters.
    pub fn new(source: &[u8], format: &str) -> Self {
        Self {
            parameter: RequestParameter {
                rsp_media_type: format.to_string(),
            },
            extra: serde_json::Map::new(),
            media_info_list: vec![MediaInfo {
                media_data: encode_artifact(source),
                media_profiles: MediaProfiles {
                    media_data_type: format.to_string(),
                },
                media_extra: serde_json::Map::new(),
            }],
        }
    }
}

/// Pull `media_info_list[0].media_data` out of a response body.
fn extract_media_data(body: &serde_json::Value) -> Result<&str, GenerationError> {
    let first = body
        .get("media_info_list")
        .and_then(|v| v.as_array())
        .and_then(|list| list.first())
        .ok_or_else(|| {
            GenerationError::Format(
                "media_info_list field is missing or has an invalid format".to_string(),
            )
        })?;
    first
        .get("media_data")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            GenerationError::Format(
                "media_data field is missing or has an invalid format".to_string(),
            )
        })
}

/// Client for the image backend. Credentials go in the query string.
#[derive(Clone)]
pub struct ImageBackendClient {
    endpoint: String,
    api_key: String,
    api_secret: String,
    client: reqwest::Client,
}

impl ImageBackendClient {
    pub fn new(endpoint: Option<String>, api_key: String, api_secret: String) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, api_key, api_secret)
    }

    pub fn with_client(
        client: reqwest::Client,
        endpoint: Option<String>,
        api_key: String,
        api_secret: String,
    ) -> Self {
        let endpoint = endpoint
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_IMAGE_ENDPOINT.to_string());
        Self {
            endpoint,
            api_key,
            api_secret,
            client,
        }
    }

    /// POST the source image and return the generated image bytes.
    pub async fn generate(&self, source: &[u8]) -> Result<Vec<u8>, GenerationError> {
        if source.is_empty() {
            return Err(GenerationError::EmptySource);
        }
        let body = ImageGenerationRequest::new(source, OUTPUT_FORMAT);
        let res = self
            .client
            .post(&self.endpoint)
            .query(&[
                ("api_key", self.api_key.as_str()),
                ("api_secret", self.api_secret.as_str()),
            ])
            .json(&body)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            log::debug!("image backend returned status {}", status);
        }
        let bytes = res.bytes().await?;
        let data: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
            GenerationError::Format(format!("image backend returned {}: {}", status, e))
        })?;
        decode_artifact(extract_media_data(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    const SOURCE: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x01, 0x02, 0x03];

    fn client_for(server: &mockito::Server) -> ImageBackendClient {
        ImageBackendClient::new(
            Some(format!("{}/v1/stable_diffusion_anime", server.url())),
            "key".to_string(),
            "secret".to_string(),
        )
    }

    #[test]
    fn artifact_encoding_round_trips() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(decode_artifact(&encode_artifact(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn request_envelope_shape() {
        let v = serde_json::to_value(ImageGenerationRequest::new(b"abc", OUTPUT_FORMAT)).unwrap();
        assert_eq!(
            v,
            json!({
                "parameter": { "rsp_media_type": "jpg" },
                "extra": {},
                "media_info_list": [{
                    "media_data": "YWJj",
                    "media_profiles": { "media_data_type": "jpg" },
                    "media_extra": {}
                }]
            })
        );
    }

    #[tokio::test]
    async fn generate_decodes_media_data() {
        let mut server = mockito::Server::new_async().await;
        let generated = vec![0xFF, 0xD8, 0xFF, 0xDB, 9, 9, 9];
        let mock = server
            .mock("POST", "/v1/stable_diffusion_anime")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("api_key".into(), "key".into()),
                Matcher::UrlEncoded("api_secret".into(), "secret".into()),
            ]))
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(
                serde_json::to_value(ImageGenerationRequest::new(SOURCE, OUTPUT_FORMAT)).unwrap(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "media_info_list": [{ "media_data": encode_artifact(&generated) }] })
                    .to_string(),
            )
            .create_async()
            .await;

        let out = client_for(&server).generate(SOURCE).await.unwrap();
        assert_eq!(out, generated);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_media_info_list_is_format_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .with_status(200)
            .with_body(r#"{"error_code":20001,"error_msg":"invalid image"}"#)
            .create_async()
            .await;
        let err = client_for(&server).generate(SOURCE).await.unwrap_err();
        assert!(
            matches!(err, GenerationError::Format(ref m) if m.contains("media_info_list")),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn empty_media_info_list_is_format_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .with_status(200)
            .with_body(r#"{"media_info_list":[]}"#)
            .create_async()
            .await;
        let err = client_for(&server).generate(SOURCE).await.unwrap_err();
        assert!(matches!(err, GenerationError::Format(_)), "{err:?}");
    }

    #[tokio::test]
    async fn media_data_of_wrong_shape_is_format_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .with_status(200)
            .with_body(r#"{"media_info_list":[{"media_data":42}]}"#)
            .create_async()
            .await;
        let err = client_for(&server).generate(SOURCE).await.unwrap_err();
        assert!(
            matches!(err, GenerationError::Format(ref m) if m.contains("media_data")),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn non_json_body_is_format_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .with_status(502)
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;
        let err = client_for(&server).generate(SOURCE).await.unwrap_err();
        assert!(matches!(err, GenerationError::Format(_)), "{err:?}");
    }

    #[tokio::test]
    async fn malformed_base64_is_decode_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", Matcher::Any)
            .with_status(200)
            .with_body(r#"{"media_info_list":[{"media_data":"not*base64!"}]}"#)
            .create_async()
            .await;
        let err = client_for(&server).generate(SOURCE).await.unwrap_err();
        assert!(matches!(err, GenerationError::Decode(_)), "{err:?}");
    }

    #[tokio::test]
    async fn unreachable_backend_is_transport_error_without_credentials() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = ImageBackendClient::new(
            Some(format!("http://127.0.0.1:{}/anime", port)),
            "MYKEY".to_string(),
            "TOPSECRET".to_string(),
        );
        let err = client.generate(SOURCE).await.unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)), "{err:?}");
        let shown = err.to_string();
        assert!(shown.contains("error sending request"), "{shown}");
        assert!(!shown.contains("MYKEY"), "{shown}");
        assert!(!shown.contains("TOPSECRET"), "{shown}");
        assert!(!shown.contains("api_key"), "{shown}");
    }

    #[tokio::test]
    async fn empty_source_is_rejected_without_a_request() {
        let client = ImageBackendClient::new(
            Some("http://127.0.0.1:9/x".to_string()),
            String::new(),
            String::new(),
        );
        let err = client.generate(&[]).await.unwrap_err();
        assert!(matches!(err, GenerationError::EmptySource));
    }
}
