use std::collections::HashMap;

pub use oci_spec::image::{Arch, Descriptor, Digest, ImageIndex, ImageManifest, MediaType, Os, Platform};

pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Media types accepted when asking a registry for "whatever this tag is".
pub const MANIFEST_ACCEPT: &[&str] = &[
    MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST,
    MEDIA_TYPE_OCI_MANIFEST,
    MEDIA_TYPE_DOCKER_MANIFEST,
];

/// Media types accepted when an index is required.
pub const INDEX_ACCEPT: &[&str] = &[MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_DOCKER_MANIFEST_LIST];

pub type Annotations = HashMap<String, String>;

pub fn is_index_media_type(media_type: &str) -> bool {
    INDEX_ACCEPT.contains(&media_type)
}

/// `os/architecture` with no variant or OS version.
pub fn platform(os: &str, architecture: &str) -> Platform {
    let mut platform = Platform::default();
    platform.set_os(Os::from(os)).set_architecture(Arch::from(architecture));
    platform
}

/// Architecture and OS agree; variant is ignored.
pub fn platform_matches(a: &Platform, b: &Platform) -> bool {
    a.architecture() == b.architecture() && a.os() == b.os()
}

/// `linux/arm64/v8` style label.
pub fn platform_label(platform: &Platform) -> String {
    let mut label = format!("{}/{}", platform.os(), platform.architecture());
    if let Some(variant) = platform.variant() {
        label.push('/');
        label.push_str(variant);
    }
    label
}

pub fn find_platform<'a>(index: &'a ImageIndex, platform: &Platform) -> Option<&'a Descriptor> {
    index
        .manifests()
        .iter()
        .find(|m| m.platform().as_ref().is_some_and(|p| platform_matches(p, platform)))
}
