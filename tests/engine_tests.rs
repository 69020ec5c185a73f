use std::sync::Arc;
use std::time::Duration;

use cargohold::oci::digest::{Digest, VerifyingReader};
use cargohold::oci::path::upload_data_path;
use cargohold::oci::OciStorage;
use cargohold::storage::{BlobStore, LocalStore};
use cargohold::RegistryError;
use tokio::io::AsyncReadExt;

async fn engine() -> (Arc<OciStorage>, Arc<LocalStore>, tempfile::TempDir) {
    engine_with_timeout(Duration::from_secs(60)).await
}

async fn engine_with_timeout(
    timeout: Duration,
) -> (Arc<OciStorage>, Arc<LocalStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(LocalStore::new(dir.path()).await.unwrap());
    let engine = Arc::new(OciStorage::new(store.clone(), timeout));
    (engine, store, dir)
}

async fn read_blob(engine: &OciStorage, digest: &Digest) -> Vec<u8> {
    let mut reader = engine.get_blob(digest).await.unwrap();
    let mut data = Vec::new();
    reader.read_to_end(&mut data).await.unwrap();
    data
}

async fn upload_blob(engine: &OciStorage, data: &[u8]) -> Digest {
    let uuid = engine.initiate_upload("testrepo").await.unwrap();
    let mut chunk = data;
    engine.write_upload_chunk(&uuid, &mut chunk).await.unwrap();
    engine
        .complete_upload(&uuid, &Digest::sha256_of(data))
        .await
        .unwrap()
}

#[tokio::test]
async fn chunked_upload_round_trips() {
    let (engine, _store, _dir) = engine().await;
    let data = b"hello world blob data".to_vec();

    // the same payload pushed under several chunk partitionings
    let partitionings: Vec<Vec<&[u8]>> = vec![
        vec![&data[..]],
        vec![&data[..5], &data[5..]],
        vec![&data[..1], &data[1..2], &data[2..]],
        vec![&data[..0], &data[..]],
    ];

    for chunks in partitionings {
        let uuid = engine.initiate_upload("myrepo").await.unwrap();
        let mut expected_total = 0u64;
        for chunk in chunks {
            let mut reader = chunk;
            let total = engine.write_upload_chunk(&uuid, &mut reader).await.unwrap();
            expected_total += chunk.len() as u64;
            assert_eq!(total, expected_total);
        }

        let digest = engine
            .complete_upload(&uuid, &Digest::sha256_of(&data))
            .await
            .unwrap();
        assert_eq!(digest, Digest::sha256_of(&data));
        assert!(engine.blob_exists(&digest).await.unwrap());
        assert_eq!(read_blob(&engine, &digest).await, data);
    }
}

#[tokio::test]
async fn complete_with_wrong_digest_keeps_scratch_for_retry() {
    let (engine, store, _dir) = engine().await;
    let data = b"some data";

    let uuid = engine.initiate_upload("myrepo").await.unwrap();
    let mut reader = &data[..];
    engine.write_upload_chunk(&uuid, &mut reader).await.unwrap();

    let wrong =
        Digest::parse("sha256:0000000000000000000000000000000000000000000000000000000000000000")
            .unwrap();
    assert!(matches!(
        engine.complete_upload(&uuid, &wrong).await,
        Err(RegistryError::DigestMismatch { .. })
    ));

    // scratch and session survive the failed attempt
    assert!(store.exists(&upload_data_path(&uuid)).await.unwrap());
    let digest = engine
        .complete_upload(&uuid, &Digest::sha256_of(data))
        .await
        .unwrap();
    assert_eq!(read_blob(&engine, &digest).await, data);
    assert!(!store.exists(&upload_data_path(&uuid)).await.unwrap());
}

#[tokio::test]
async fn cancel_invalidates_every_subsequent_operation() {
    let (engine, store, _dir) = engine().await;

    let uuid = engine.initiate_upload("myrepo").await.unwrap();
    engine.cancel_upload(&uuid).await.unwrap();
    assert!(!store.exists(&upload_data_path(&uuid)).await.unwrap());

    let mut reader = &b"late"[..];
    assert!(matches!(
        engine.write_upload_chunk(&uuid, &mut reader).await,
        Err(RegistryError::UploadNotFound)
    ));
    assert!(matches!(
        engine
            .complete_upload(&uuid, &Digest::sha256_of(b"late"))
            .await,
        Err(RegistryError::UploadNotFound)
    ));
    assert!(matches!(
        engine.cancel_upload(&uuid).await,
        Err(RegistryError::UploadNotFound)
    ));
}

#[tokio::test]
async fn expired_upload_is_gone_and_sweeper_reclaims_scratch() {
    let (engine, store, _dir) = engine_with_timeout(Duration::from_millis(20)).await;

    let uuid = engine.initiate_upload("myrepo").await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    let mut reader = &b"x"[..];
    assert!(matches!(
        engine.write_upload_chunk(&uuid, &mut reader).await,
        Err(RegistryError::UploadNotFound)
    ));

    // the get path dropped the session but the scratch survives until swept
    let another = engine.initiate_upload("myrepo").await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(store.exists(&upload_data_path(&another)).await.unwrap());
    let removed = engine.sweep_expired_uploads().await;
    assert_eq!(removed, 1);
    assert!(!store.exists(&upload_data_path(&another)).await.unwrap());
}

#[tokio::test]
async fn get_blob_info_reports_size() {
    let (engine, _store, _dir) = engine().await;
    let data = b"monolithic blob data";
    let digest = upload_blob(&engine, data).await;

    let info = engine.get_blob_info(&digest).await.unwrap();
    assert_eq!(info.size, data.len() as u64);
    assert_eq!(info.digest, digest);
}

#[tokio::test]
async fn missing_blob_is_blob_not_found() {
    let (engine, _store, _dir) = engine().await;
    let digest = Digest::sha256_of(b"never uploaded");

    assert!(!engine.blob_exists(&digest).await.unwrap());
    assert!(matches!(
        engine.get_blob(&digest).await,
        Err(RegistryError::BlobNotFound)
    ));
    assert!(matches!(
        engine.get_blob_info(&digest).await,
        Err(RegistryError::BlobNotFound)
    ));
}

#[tokio::test]
async fn manifest_round_trips_by_tag_and_digest() {
    let (engine, _store, _dir) = engine().await;
    let manifest = br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json"}"#;
    let content_type = "application/vnd.oci.image.manifest.v1+json";

    let digest = engine
        .put_manifest("myorg/myimage", "latest", content_type, manifest)
        .await
        .unwrap();
    assert_eq!(digest, Digest::sha256_of(manifest));

    let (data, got_digest, got_ct) = engine
        .get_manifest("myorg/myimage", "latest")
        .await
        .unwrap();
    assert_eq!(data, manifest);
    assert_eq!(got_digest, digest);
    assert_eq!(got_ct, content_type);

    let (data, got_digest, got_ct) = engine
        .get_manifest("myorg/myimage", &digest.to_string())
        .await
        .unwrap();
    assert_eq!(data, manifest);
    assert_eq!(got_digest, digest);
    assert_eq!(got_ct, content_type);

    let info = engine
        .manifest_exists("myorg/myimage", "latest")
        .await
        .unwrap();
    assert_eq!(info.size, manifest.len() as u64);
    assert_eq!(info.digest, digest);
}

#[tokio::test]
async fn put_by_digest_reference_skips_tag_link() {
    let (engine, _store, _dir) = engine().await;
    let manifest = br#"{"schemaVersion":2}"#;
    let digest = Digest::sha256_of(manifest);

    engine
        .put_manifest("myrepo", &digest.to_string(), "application/foo", manifest)
        .await
        .unwrap();

    assert!(engine.list_tags("myrepo").await.unwrap().is_empty());
    let (data, _, _) = engine
        .get_manifest("myrepo", &digest.to_string())
        .await
        .unwrap();
    assert_eq!(data, manifest);
}

#[tokio::test]
async fn empty_content_type_defaults_on_read() {
    let (engine, _store, _dir) = engine().await;
    let manifest = b"opaque manifest bytes";

    engine
        .put_manifest("myrepo", "latest", "", manifest)
        .await
        .unwrap();
    let (_, _, content_type) = engine.get_manifest("myrepo", "latest").await.unwrap();
    assert_eq!(content_type, "application/vnd.oci.image.manifest.v1+json");
}

#[tokio::test]
async fn tag_overwrite_is_last_writer_wins() {
    let (engine, _store, _dir) = engine().await;

    let first = b"first revision";
    let second = b"second revision";
    engine
        .put_manifest("myrepo", "latest", "application/foo", first)
        .await
        .unwrap();
    engine
        .put_manifest("myrepo", "latest", "application/foo", second)
        .await
        .unwrap();

    let (data, digest, _) = engine.get_manifest("myrepo", "latest").await.unwrap();
    assert_eq!(data, second);
    assert_eq!(digest, Digest::sha256_of(second));

    // the first revision stays reachable by digest
    let (data, _, _) = engine
        .get_manifest("myrepo", &Digest::sha256_of(first).to_string())
        .await
        .unwrap();
    assert_eq!(data, first);
}

#[tokio::test]
async fn missing_manifest_is_manifest_not_found() {
    let (engine, _store, _dir) = engine().await;

    assert!(matches!(
        engine.get_manifest("myrepo", "latest").await,
        Err(RegistryError::ManifestNotFound)
    ));
    let absent = Digest::sha256_of(b"absent");
    assert!(matches!(
        engine.get_manifest("myrepo", &absent.to_string()).await,
        Err(RegistryError::ManifestNotFound)
    ));
}

#[tokio::test]
async fn manifest_with_unknown_referenced_blob_is_rejected() {
    let (engine, _store, _dir) = engine().await;

    let config_data = b"container config";
    let layer_data = b"layer tarball";
    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "config": { "digest": Digest::sha256_of(config_data).to_string(), "size": config_data.len() },
        "layers": [
            { "digest": Digest::sha256_of(layer_data).to_string(), "size": layer_data.len() },
        ],
    });
    let manifest_bytes = serde_json::to_vec(&manifest).unwrap();

    let err = engine
        .put_manifest("myrepo", "latest", "application/vnd.oci.image.manifest.v1+json", &manifest_bytes)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ManifestBlobUnknown(_)));

    // once the referenced blobs exist the manifest is accepted
    upload_blob(&engine, config_data).await;
    upload_blob(&engine, layer_data).await;
    engine
        .put_manifest("myrepo", "latest", "application/vnd.oci.image.manifest.v1+json", &manifest_bytes)
        .await
        .unwrap();
}

#[tokio::test]
async fn list_tags_for_known_and_unknown_repositories() {
    let (engine, _store, _dir) = engine().await;

    engine
        .put_manifest("myrepo", "v1.0", "application/foo", b"one")
        .await
        .unwrap();
    engine
        .put_manifest("myrepo", "v2.0", "application/foo", b"two")
        .await
        .unwrap();

    let mut tags = engine.list_tags("myrepo").await.unwrap();
    tags.sort();
    assert_eq!(tags, vec!["v1.0", "v2.0"]);

    assert!(engine.list_tags("ghost/repo").await.unwrap().is_empty());
}

#[tokio::test]
async fn verifying_reader_matches_direct_hash() {
    let data = b"stream me through the hasher".to_vec();
    let mut reader = VerifyingReader::new(&data[..]);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();

    assert_eq!(reader.size(), data.len() as u64);
    assert_eq!(reader.digest(), Digest::sha256_of(&data));
}
