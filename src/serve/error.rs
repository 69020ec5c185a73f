use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Error codes from the distribution spec's error table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OciErrorCode {
    BlobUnknown,
    BlobUploadInvalid,
    BlobUploadUnknown,
    DigestInvalid,
    ManifestBlobUnknown,
    ManifestInvalid,
    ManifestUnknown,
    NameInvalid,
    NameUnknown,
    Unsupported,
}

impl OciErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            OciErrorCode::BlobUnknown => "BLOB_UNKNOWN",
            OciErrorCode::BlobUploadInvalid => "BLOB_UPLOAD_INVALID",
            OciErrorCode::BlobUploadUnknown => "BLOB_UPLOAD_UNKNOWN",
            OciErrorCode::DigestInvalid => "DIGEST_INVALID",
            OciErrorCode::ManifestBlobUnknown => "MANIFEST_BLOB_UNKNOWN",
            OciErrorCode::ManifestInvalid => "MANIFEST_INVALID",
            OciErrorCode::ManifestUnknown => "MANIFEST_UNKNOWN",
            OciErrorCode::NameInvalid => "NAME_INVALID",
            OciErrorCode::NameUnknown => "NAME_UNKNOWN",
            OciErrorCode::Unsupported => "UNSUPPORTED",
        }
    }

    fn at(self, status: StatusCode, message: impl Into<String>) -> OciError {
        OciError {
            status,
            code: self,
            message: message.into(),
        }
    }
}

/// A protocol-level failure. Rendered on the wire as the OCI error envelope,
/// `{"errors":[{"code":"...","message":"..."}]}`, with a matching status.
#[derive(Debug)]
pub struct OciError {
    status: StatusCode,
    code: OciErrorCode,
    message: String,
}

impl OciError {
    pub fn digest_invalid(message: impl Into<String>) -> Self {
        OciErrorCode::DigestInvalid.at(StatusCode::BAD_REQUEST, message)
    }

    pub fn name_invalid(message: impl Into<String>) -> Self {
        OciErrorCode::NameInvalid.at(StatusCode::BAD_REQUEST, message)
    }

    pub fn manifest_invalid(message: impl Into<String>) -> Self {
        OciErrorCode::ManifestInvalid.at(StatusCode::BAD_REQUEST, message)
    }

    pub fn manifest_blob_unknown(message: impl Into<String>) -> Self {
        OciErrorCode::ManifestBlobUnknown.at(StatusCode::BAD_REQUEST, message)
    }

    pub fn blob_unknown(message: impl Into<String>) -> Self {
        OciErrorCode::BlobUnknown.at(StatusCode::NOT_FOUND, message)
    }

    pub fn blob_upload_unknown(message: impl Into<String>) -> Self {
        OciErrorCode::BlobUploadUnknown.at(StatusCode::NOT_FOUND, message)
    }

    pub fn manifest_unknown(message: impl Into<String>) -> Self {
        OciErrorCode::ManifestUnknown.at(StatusCode::NOT_FOUND, message)
    }

    pub fn name_unknown(message: impl Into<String>) -> Self {
        OciErrorCode::NameUnknown.at(StatusCode::NOT_FOUND, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        OciErrorCode::Unsupported.at(StatusCode::NOT_FOUND, message)
    }

    /// Internal failure in an upload operation.
    pub fn internal_upload(message: impl Into<String>) -> Self {
        OciErrorCode::BlobUploadInvalid.at(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Internal failure in a manifest operation.
    pub fn internal_manifest(message: impl Into<String>) -> Self {
        OciErrorCode::ManifestInvalid.at(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Internal failure in a blob read operation.
    pub fn internal_blob(message: impl Into<String>) -> Self {
        OciErrorCode::BlobUnknown.at(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for OciError {
    fn into_response(self) -> Response {
        let envelope = json!({
            "errors": [{
                "code": self.code.as_str(),
                "message": self.message,
            }]
        });
        (
            self.status,
            [
                ("Content-Type", "application/json"),
                ("Docker-Distribution-API-Version", "registry/2.0"),
            ],
            envelope.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn envelope_carries_code_and_message() {
        use http_body_util::BodyExt;

        let response = OciError::manifest_unknown("no such manifest").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["errors"][0]["code"], "MANIFEST_UNKNOWN");
        assert_eq!(parsed["errors"][0]["message"], "no such manifest");
    }

    #[test]
    fn status_codes_match_the_error_table() {
        assert_eq!(
            OciError::digest_invalid("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            OciError::manifest_blob_unknown("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            OciError::blob_upload_unknown("x").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            OciError::internal_upload("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
