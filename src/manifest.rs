use serde::Deserialize;

/// Accept header for manifest requests: OCI index first, then OCI manifest.
pub const MANIFEST_ACCEPT: &str =
    "application/vnd.oci.image.index.v1+json,application/vnd.oci.image.manifest.v1+json";

/// A manifest as returned by `/v2/{repo}/manifests/{tag}`.
///
/// Only the fields needed to find layers are decoded. Legacy docker schema 1
/// manifests carry `fsLayers`, schema 2 and OCI manifests carry `layers`, and
/// an OCI index carries `manifests` instead of either.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: Option<u8>,
    pub media_type: Option<String>,
    pub fs_layers: Option<Vec<FsLayer>>,
    pub layers: Option<Vec<Descriptor>>,
    pub manifests: Option<Vec<Descriptor>>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FsLayer {
    pub blob_sum: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: Option<String>,
    pub size: Option<u64>,
    pub digest: String,
}

impl Manifest {
    /// True for an image index that points at other manifests but has no layers of its own.
    pub fn is_index(&self) -> bool {
        self.fs_layers.is_none() && self.layers.is_none() && self.manifests.is_some()
    }
}

/// Ordered layer digests of a manifest: every `fsLayers[].blobSum`, then
/// every `layers[].digest`, both in document order.
pub fn resolve_digests(manifest: &Manifest) -> Vec<String> {
    let legacy = manifest
        .fs_layers
        .iter()
        .flatten()
        .map(|layer| layer.blob_sum.clone());

    let oci = manifest
        .layers
        .iter()
        .flatten()
        .map(|layer| layer.digest.clone());

    legacy.chain(oci).collect()
}
