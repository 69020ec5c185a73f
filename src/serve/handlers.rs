use std::collections::HashMap;
use std::sync::LazyLock;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use regex::Regex;
use serde::Serialize;
use tokio_util::io::{ReaderStream, StreamReader};

use crate::error::RegistryError;
use crate::oci::digest::Digest;
use crate::oci::{is_digest_reference, DEFAULT_MANIFEST_CONTENT_TYPE};
use crate::serve::error::OciError;
use crate::serve::state::AppState;

const API_VERSION_HEADER: &str = "Docker-Distribution-API-Version";
const API_VERSION: &str = "registry/2.0";

/// Repository name grammar from the distribution spec. Rejecting anything
/// else also keeps request-supplied names from escaping the storage root.
static REPOSITORY_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+([._-][a-z0-9]+)*(/[a-z0-9]+([._-][a-z0-9]+)*)*$")
        .expect("repository name regex")
});

static TAG_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").expect("tag regex"));

#[derive(Clone, Debug)]
enum OciRoute {
    Manifest { name: String, reference: String },
    Blob { name: String, digest: String },
    BlobUploadStart { name: String },
    BlobUpload { name: String, uuid: String },
    TagsList { name: String },
}

impl OciRoute {
    fn name(&self) -> &str {
        match self {
            OciRoute::Manifest { name, .. }
            | OciRoute::Blob { name, .. }
            | OciRoute::BlobUploadStart { name }
            | OciRoute::BlobUpload { name, .. }
            | OciRoute::TagsList { name } => name,
        }
    }
}

/// Classify the path remainder after `/v2/` by its trailing segments; the
/// repository name is whatever precedes them, slashes included. Operands
/// (digest, reference, upload id) are single segments, so anything with
/// extra structure falls out as unroutable.
fn parse_oci_path(path: &str) -> Option<OciRoute> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let mut segments: Vec<&str> = path.split('/').collect();
    // upload initiation is routed with and without its trailing slash
    if segments.last() == Some(&"") {
        segments.pop();
    }

    let name_before = |tail_len: usize| -> Option<String> {
        let name = segments[..segments.len() - tail_len].join("/");
        (!name.is_empty()).then_some(name)
    };

    match segments.as_slice() {
        [.., "blobs", "uploads"] => Some(OciRoute::BlobUploadStart {
            name: name_before(2)?,
        }),
        [.., "blobs", "uploads", uuid] if !uuid.is_empty() => Some(OciRoute::BlobUpload {
            name: name_before(3)?,
            uuid: uuid.to_string(),
        }),
        [.., "tags", "list"] => Some(OciRoute::TagsList {
            name: name_before(2)?,
        }),
        [.., "blobs", digest] if !digest.is_empty() => Some(OciRoute::Blob {
            name: name_before(2)?,
            digest: digest.to_string(),
        }),
        [.., "manifests", reference] if !reference.is_empty() => Some(OciRoute::Manifest {
            name: name_before(2)?,
            reference: reference.to_string(),
        }),
        _ => None,
    }
}

pub async fn v2_base() -> impl IntoResponse {
    (StatusCode::OK, [(API_VERSION_HEADER, API_VERSION)], "")
}

pub async fn oci_dispatch(
    method: Method,
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, OciError> {
    let route = match parse_oci_path(&path) {
        Some(route) => route,
        None => return Err(OciError::name_unknown("not found")),
    };
    let request_method = method.clone();
    let request_path = path.clone();
    tracing::debug!(method = %request_method, path = %request_path, "oci request");

    if !REPOSITORY_NAME_RE.is_match(route.name()) {
        return Err(OciError::name_invalid(format!(
            "invalid repository name {:?}",
            route.name()
        )));
    }

    let deadline = state.request_deadline;
    let handler = async {
        match route.clone() {
            OciRoute::Manifest { name, reference } => match method {
                Method::GET | Method::HEAD => {
                    get_manifest(method, state, name, reference).await
                }
                Method::PUT => put_manifest(state, name, reference, headers, body).await,
                _ => Err(OciError::unsupported("method not allowed")),
            },
            OciRoute::Blob { name, digest } => match method {
                Method::GET | Method::HEAD => get_blob(method, state, name, digest).await,
                _ => Err(OciError::unsupported("method not allowed")),
            },
            OciRoute::BlobUploadStart { name } => match method {
                Method::POST => start_upload(state, name, params, body).await,
                _ => Err(OciError::unsupported("method not allowed")),
            },
            OciRoute::BlobUpload { name, uuid } => match method {
                Method::GET => get_upload_status(state, name, uuid).await,
                Method::PATCH => patch_upload(state, name, uuid, body).await,
                Method::PUT => put_upload(state, name, uuid, params, headers, body).await,
                Method::DELETE => delete_upload(state, uuid).await,
                _ => Err(OciError::unsupported("method not allowed")),
            },
            OciRoute::TagsList { name } => match method {
                Method::GET => tags_list(state, name).await,
                _ => Err(OciError::unsupported("method not allowed")),
            },
        }
    };

    match tokio::time::timeout(deadline, handler).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(
                method = %request_method,
                path = %request_path,
                ?deadline,
                "request deadline exceeded"
            );
            Err(deadline_exceeded(&route))
        }
    }
}

fn deadline_exceeded(route: &OciRoute) -> OciError {
    match route {
        OciRoute::Manifest { .. } | OciRoute::TagsList { .. } => {
            OciError::internal_manifest("request deadline exceeded")
        }
        OciRoute::Blob { .. } => OciError::internal_blob("request deadline exceeded"),
        OciRoute::BlobUploadStart { .. } | OciRoute::BlobUpload { .. } => {
            OciError::internal_upload("request deadline exceeded")
        }
    }
}

fn map_upload_error(err: RegistryError) -> OciError {
    match err {
        RegistryError::UploadNotFound => OciError::blob_upload_unknown("upload not found"),
        RegistryError::InvalidDigest(s) => {
            OciError::digest_invalid(format!("invalid digest format: {s:?}"))
        }
        RegistryError::DigestMismatch { expected, actual } => {
            OciError::digest_invalid(format!("digest mismatch: expected {expected}, got {actual}"))
        }
        other => {
            tracing::error!(error = %other, "upload operation failed");
            OciError::internal_upload("failed to process upload")
        }
    }
}

fn map_blob_error(err: RegistryError) -> OciError {
    match err {
        RegistryError::BlobNotFound => OciError::blob_unknown("blob not found"),
        RegistryError::InvalidDigest(s) => {
            OciError::digest_invalid(format!("invalid digest format: {s:?}"))
        }
        other => {
            tracing::error!(error = %other, "blob operation failed");
            OciError::internal_blob("failed to read blob")
        }
    }
}

fn map_manifest_error(err: RegistryError) -> OciError {
    match err {
        RegistryError::ManifestNotFound => OciError::manifest_unknown("manifest not found"),
        RegistryError::InvalidDigest(s) => {
            OciError::digest_invalid(format!("invalid digest format: {s:?}"))
        }
        RegistryError::ManifestBlobUnknown(digest) => OciError::manifest_blob_unknown(format!(
            "manifest references blob {digest} which is not known to the registry"
        )),
        other => {
            tracing::error!(error = %other, "manifest operation failed");
            OciError::internal_manifest("failed to process manifest")
        }
    }
}

/// Adapt a request body into the `AsyncRead` the engine consumes.
fn body_reader(body: Body) -> impl tokio::io::AsyncRead + Send + Unpin {
    StreamReader::new(body.into_data_stream().map_err(std::io::Error::other))
}

async fn get_manifest(
    method: Method,
    state: AppState,
    name: String,
    reference: String,
) -> Result<Response, OciError> {
    // A reference that is neither a digest nor a well-formed tag cannot name
    // a stored manifest, and must not reach the path layout.
    if !is_digest_reference(&reference) && !TAG_NAME_RE.is_match(&reference) {
        return Err(OciError::manifest_unknown("manifest not found"));
    }

    if method == Method::HEAD {
        let info = state
            .registry
            .manifest_exists(&name, &reference)
            .await
            .map_err(map_manifest_error)?;

        let headers = [
            (API_VERSION_HEADER, API_VERSION.to_string()),
            ("Docker-Content-Digest", info.digest.to_string()),
            ("Content-Type", info.content_type),
            ("Content-Length", info.size.to_string()),
        ];
        return Ok((StatusCode::OK, headers, Body::empty()).into_response());
    }

    let (data, digest, content_type) = state
        .registry
        .get_manifest(&name, &reference)
        .await
        .map_err(map_manifest_error)?;

    let headers = [
        (API_VERSION_HEADER, API_VERSION.to_string()),
        ("Docker-Content-Digest", digest.to_string()),
        ("Content-Type", content_type),
        ("Content-Length", data.len().to_string()),
    ];
    Ok((StatusCode::OK, headers, Body::from(data)).into_response())
}

async fn put_manifest(
    state: AppState,
    name: String,
    reference: String,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, OciError> {
    if !is_digest_reference(&reference) && !TAG_NAME_RE.is_match(&reference) {
        return Err(OciError::manifest_invalid(format!(
            "invalid tag name {reference:?}"
        )));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_MANIFEST_CONTENT_TYPE)
        .to_string();

    let data = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| OciError::manifest_invalid("failed to read manifest"))?;

    let digest = state
        .registry
        .put_manifest(&name, &reference, &content_type, &data)
        .await
        .map_err(map_manifest_error)?;

    let headers = [
        (API_VERSION_HEADER, API_VERSION.to_string()),
        ("Location", format!("/v2/{name}/manifests/{digest}")),
        ("Docker-Content-Digest", digest.to_string()),
    ];
    Ok((StatusCode::CREATED, headers, Body::empty()).into_response())
}

async fn get_blob(
    method: Method,
    state: AppState,
    _name: String,
    digest_str: String,
) -> Result<Response, OciError> {
    let digest = Digest::parse(&digest_str).map_err(map_blob_error)?;

    let info = state
        .registry
        .get_blob_info(&digest)
        .await
        .map_err(map_blob_error)?;

    if method == Method::HEAD {
        let headers = [
            (API_VERSION_HEADER, API_VERSION.to_string()),
            ("Docker-Content-Digest", info.digest.to_string()),
            ("Content-Length", info.size.to_string()),
        ];
        return Ok((StatusCode::OK, headers, Body::empty()).into_response());
    }

    let reader = state
        .registry
        .get_blob(&digest)
        .await
        .map_err(map_blob_error)?;

    let headers = [
        (API_VERSION_HEADER, API_VERSION.to_string()),
        ("Docker-Content-Digest", info.digest.to_string()),
        ("Content-Length", info.size.to_string()),
        ("Content-Type", "application/octet-stream".to_string()),
    ];
    let body = Body::from_stream(ReaderStream::new(reader));
    Ok((StatusCode::OK, headers, body).into_response())
}

async fn start_upload(
    state: AppState,
    name: String,
    params: HashMap<String, String>,
    body: Body,
) -> Result<Response, OciError> {
    if let Some(digest_param) = params.get("digest") {
        return monolithic_upload(state, name, digest_param, body).await;
    }

    let uuid = state
        .registry
        .initiate_upload(&name)
        .await
        .map_err(map_upload_error)?;

    let headers = [
        (API_VERSION_HEADER, API_VERSION.to_string()),
        ("Location", format!("/v2/{name}/blobs/uploads/{uuid}")),
        ("Docker-Upload-UUID", uuid),
        ("Range", "0-0".to_string()),
        ("Content-Length", "0".to_string()),
    ];
    Ok((StatusCode::ACCEPTED, headers, Body::empty()).into_response())
}

/// POST with `?digest=`: initiate, write the body as a single chunk, and
/// complete, all in one request.
async fn monolithic_upload(
    state: AppState,
    name: String,
    digest_param: &str,
    body: Body,
) -> Result<Response, OciError> {
    let expected = Digest::parse(digest_param).map_err(map_upload_error)?;

    let uuid = state
        .registry
        .initiate_upload(&name)
        .await
        .map_err(map_upload_error)?;

    let mut reader = body_reader(body);
    state
        .registry
        .write_upload_chunk(&uuid, &mut reader)
        .await
        .map_err(map_upload_error)?;

    let digest = state
        .registry
        .complete_upload(&uuid, &expected)
        .await
        .map_err(map_upload_error)?;

    let headers = [
        (API_VERSION_HEADER, API_VERSION.to_string()),
        ("Location", format!("/v2/{name}/blobs/{digest}")),
        ("Docker-Content-Digest", digest.to_string()),
    ];
    Ok((StatusCode::CREATED, headers, Body::empty()).into_response())
}

async fn get_upload_status(
    state: AppState,
    name: String,
    uuid: String,
) -> Result<Response, OciError> {
    let session = state
        .registry
        .upload_status(&uuid)
        .await
        .map_err(map_upload_error)?;

    let headers = [
        (API_VERSION_HEADER, API_VERSION.to_string()),
        ("Location", format!("/v2/{name}/blobs/uploads/{uuid}")),
        ("Docker-Upload-UUID", uuid),
        ("Range", range_header(session.bytes_written)),
        ("Content-Length", "0".to_string()),
    ];
    Ok((StatusCode::NO_CONTENT, headers, Body::empty()).into_response())
}

async fn patch_upload(
    state: AppState,
    name: String,
    uuid: String,
    body: Body,
) -> Result<Response, OciError> {
    let mut reader = body_reader(body);
    let total_size = state
        .registry
        .write_upload_chunk(&uuid, &mut reader)
        .await
        .map_err(map_upload_error)?;

    let headers = [
        (API_VERSION_HEADER, API_VERSION.to_string()),
        ("Location", format!("/v2/{name}/blobs/uploads/{uuid}")),
        ("Docker-Upload-UUID", uuid),
        ("Range", range_header(total_size)),
    ];
    Ok((StatusCode::ACCEPTED, headers, Body::empty()).into_response())
}

async fn put_upload(
    state: AppState,
    name: String,
    uuid: String,
    params: HashMap<String, String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, OciError> {
    let digest_param = params
        .get("digest")
        .ok_or_else(|| OciError::digest_invalid("digest query parameter required"))?;
    let expected = Digest::parse(digest_param).map_err(map_upload_error)?;

    // A missing Content-Length means chunked encoding; any bytes present are
    // written as the final chunk, an empty body is a no-op.
    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    if declared_length != Some(0) {
        let mut reader = body_reader(body);
        state
            .registry
            .write_upload_chunk(&uuid, &mut reader)
            .await
            .map_err(map_upload_error)?;
    }

    let digest = state
        .registry
        .complete_upload(&uuid, &expected)
        .await
        .map_err(map_upload_error)?;

    let response_headers = [
        (API_VERSION_HEADER, API_VERSION.to_string()),
        ("Location", format!("/v2/{name}/blobs/{digest}")),
        ("Docker-Content-Digest", digest.to_string()),
    ];
    Ok((StatusCode::CREATED, response_headers, Body::empty()).into_response())
}

async fn delete_upload(state: AppState, uuid: String) -> Result<Response, OciError> {
    state
        .registry
        .cancel_upload(&uuid)
        .await
        .map_err(map_upload_error)?;

    let headers = [(API_VERSION_HEADER, API_VERSION.to_string())];
    Ok((StatusCode::NO_CONTENT, headers, Body::empty()).into_response())
}

#[derive(Serialize)]
struct TagsListResponse {
    name: String,
    tags: Vec<String>,
}

async fn tags_list(state: AppState, name: String) -> Result<Response, OciError> {
    let mut tags = state.registry.list_tags(&name).await.map_err(|err| {
        tracing::error!(error = %err, "failed to list tags");
        OciError::internal_manifest("failed to list tags")
    })?;
    tags.sort();

    let body = serde_json::to_string(&TagsListResponse { name, tags })
        .map_err(|e| OciError::internal_manifest(format!("failed to encode tags list: {e}")))?;

    let headers = [
        (API_VERSION_HEADER, API_VERSION.to_string()),
        ("Content-Type", "application/json".to_string()),
    ];
    Ok((StatusCode::OK, headers, body).into_response())
}

fn range_header(bytes_written: u64) -> String {
    format!("0-{}", bytes_written.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_routes_with_nested_names() {
        match parse_oci_path("myorg/myimage/manifests/latest") {
            Some(OciRoute::Manifest { name, reference }) => {
                assert_eq!(name, "myorg/myimage");
                assert_eq!(reference, "latest");
            }
            other => panic!("unexpected route {other:?}"),
        }

        match parse_oci_path("myorg/myimage/blobs/sha256:abcd") {
            Some(OciRoute::Blob { name, digest }) => {
                assert_eq!(name, "myorg/myimage");
                assert_eq!(digest, "sha256:abcd");
            }
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn parse_upload_routes() {
        assert!(matches!(
            parse_oci_path("repo/blobs/uploads/"),
            Some(OciRoute::BlobUploadStart { .. })
        ));
        assert!(matches!(
            parse_oci_path("repo/blobs/uploads"),
            Some(OciRoute::BlobUploadStart { .. })
        ));

        match parse_oci_path("repo/blobs/uploads/some-uuid") {
            Some(OciRoute::BlobUpload { name, uuid }) => {
                assert_eq!(name, "repo");
                assert_eq!(uuid, "some-uuid");
            }
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn parse_tags_list_route() {
        match parse_oci_path("myorg/myimage/tags/list") {
            Some(OciRoute::TagsList { name }) => assert_eq!(name, "myorg/myimage"),
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_incomplete_paths() {
        assert!(parse_oci_path("").is_none());
        assert!(parse_oci_path("just-a-name").is_none());
        assert!(parse_oci_path("/blobs/uploads/").is_none());
        assert!(parse_oci_path("repo/manifests/").is_none());
    }

    #[test]
    fn parse_rejects_multi_segment_operands() {
        // references, digests, and upload ids are single path segments
        assert!(parse_oci_path("repo/manifests/a/b").is_none());
        assert!(parse_oci_path("repo/blobs/sha256:aa/extra").is_none());
    }

    #[test]
    fn repository_name_grammar() {
        for name in ["myrepo", "myorg/myimage", "a/b/c", "my-repo.v2_x"] {
            assert!(REPOSITORY_NAME_RE.is_match(name), "{name} should be valid");
        }
        for name in ["MyRepo", "repo/", "/repo", "re..po", "repo//img", "../etc"] {
            assert!(!REPOSITORY_NAME_RE.is_match(name), "{name} should be invalid");
        }
    }

    #[test]
    fn range_header_spans_written_bytes() {
        assert_eq!(range_header(0), "0-0");
        assert_eq!(range_header(21), "0-20");
    }
}
