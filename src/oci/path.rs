//! Storage path layout, compatible with the Docker Registry reference
//! implementation so existing tooling can inspect the tree. All paths use
//! forward slashes; the blob store translates to native separators.

use crate::oci::digest::Digest;

/// Data file for a content-addressed blob.
/// Layout: `v2/blobs/<algorithm>/<first-2-hex>/<full-hex>/data`
pub fn blob_data_path(digest: &Digest) -> String {
    format!(
        "v2/blobs/{}/{}/{}/data",
        digest.algorithm,
        digest.short_hex(),
        digest.hex
    )
}

/// Revision link recording the content type of a stored manifest.
/// Layout: `v2/repositories/<name>/_manifests/revisions/<algorithm>/<hex>/link`
pub fn manifest_revision_link_path(name: &str, digest: &Digest) -> String {
    format!(
        "v2/repositories/{}/_manifests/revisions/{}/{}/link",
        name, digest.algorithm, digest.hex
    )
}

/// Current link recording the digest a tag points to.
/// Layout: `v2/repositories/<name>/_manifests/tags/<tag>/current/link`
pub fn manifest_tag_current_link_path(name: &str, tag: &str) -> String {
    format!("v2/repositories/{name}/_manifests/tags/{tag}/current/link")
}

/// Directory holding one child per tag of a repository.
pub fn manifest_tags_dir(name: &str) -> String {
    format!("v2/repositories/{name}/_manifests/tags")
}

/// Scratch data file for an in-progress upload.
pub fn upload_data_path(uuid: &str) -> String {
    format!("v2/uploads/{uuid}/data")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest() -> Digest {
        Digest::parse("sha256:abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789")
            .unwrap()
    }

    #[test]
    fn blob_path_is_sharded_by_hex_prefix() {
        assert_eq!(
            blob_data_path(&digest()),
            "v2/blobs/sha256/ab/abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789/data"
        );
    }

    #[test]
    fn manifest_link_paths() {
        assert_eq!(
            manifest_revision_link_path("myorg/myimage", &digest()),
            "v2/repositories/myorg/myimage/_manifests/revisions/sha256/abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789/link"
        );
        assert_eq!(
            manifest_tag_current_link_path("myorg/myimage", "v1.0"),
            "v2/repositories/myorg/myimage/_manifests/tags/v1.0/current/link"
        );
        assert_eq!(
            manifest_tags_dir("myorg/myimage"),
            "v2/repositories/myorg/myimage/_manifests/tags"
        );
    }

    #[test]
    fn upload_path_is_keyed_by_uuid() {
        assert_eq!(
            upload_data_path("0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9"),
            "v2/uploads/0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9/data"
        );
    }
}
