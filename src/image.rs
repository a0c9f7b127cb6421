use std::collections::HashMap;

use crate::report::{self, Node};
use crate::runtime::ImageSummary;

pub const IMAGE_ID: &str = "docker_image_id";
pub const IMAGE_NAME: &str = "docker_image_name";
pub const IMAGE_TAG: &str = "docker_image_tag";
pub const IMAGE_SIZE: &str = "docker_image_size";
pub const IMAGE_LABEL_PREFIX: &str = "docker_image_label_";

const DIGEST_SCHEME: &str = "sha256:";

/// Strips the `sha256:` scheme from an image digest.
pub fn trim_image_id(id: &str) -> &str {
    id.strip_prefix(DIGEST_SCHEME).unwrap_or(id)
}

/// A container image known to the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub size: u64,
    pub labels: HashMap<String, String>,
}

impl Image {
    pub fn node(&self) -> Node {
        let mut node = Node::new(
            report::make_container_image_node_id(&self.id),
            report::CONTAINER_IMAGE,
        )
        .with_latest(IMAGE_ID, self.id.as_str())
        .with_latest(IMAGE_NAME, self.name.as_str())
        .with_latest(IMAGE_SIZE, self.size.to_string())
        .with_prefixed_latests(IMAGE_LABEL_PREFIX, &self.labels);
        if !self.tags.is_empty() {
            node = node.with_set(IMAGE_TAG, self.tags.iter().cloned());
        }
        node
    }
}

impl From<ImageSummary> for Image {
    fn from(summary: ImageSummary) -> Self {
        let id = trim_image_id(&summary.id).to_owned();
        let name = summary
            .repo_tags
            .first()
            .or_else(|| summary.repo_digests.first())
            .cloned()
            .unwrap_or_else(|| id.clone());

        Self {
            id,
            name,
            tags: summary.repo_tags,
            size: summary.size,
            labels: summary.annotations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_image_id() {
        assert_eq!(trim_image_id("sha256:abc"), "abc");
        assert_eq!(trim_image_id("abc"), "abc");
    }

    #[test]
    fn test_image_name_fallbacks() {
        let tagged = Image::from(ImageSummary {
            id: "sha256:f00".to_owned(),
            repo_tags: vec!["nginx:1.27".to_owned()],
            repo_digests: vec!["nginx@sha256:aaa".to_owned()],
            size: 42,
            ..ImageSummary::default()
        });
        assert_eq!(tagged.id, "f00");
        assert_eq!(tagged.name, "nginx:1.27");

        let digest_only = Image::from(ImageSummary {
            id: "sha256:f00".to_owned(),
            repo_digests: vec!["nginx@sha256:aaa".to_owned()],
            ..ImageSummary::default()
        });
        assert_eq!(digest_only.name, "nginx@sha256:aaa");

        let bare = Image::from(ImageSummary {
            id: "sha256:f00".to_owned(),
            ..ImageSummary::default()
        });
        assert_eq!(bare.name, "f00");
    }

    #[test]
    fn test_image_node() {
        let image = Image::from(ImageSummary {
            id: "sha256:f00".to_owned(),
            repo_tags: vec!["nginx:1.27".to_owned(), "nginx:latest".to_owned()],
            size: 1024,
            annotations: HashMap::from([("vendor".to_owned(), "acme".to_owned())]),
            ..ImageSummary::default()
        });
        let node = image.node();
        assert_eq!(node.id, "f00;<container_image>");
        assert_eq!(node.latest(IMAGE_SIZE), Some("1024"));
        assert_eq!(node.latest("docker_image_label_vendor"), Some("acme"));
        assert_eq!(node.set(IMAGE_TAG).map(|tags| tags.len()), Some(2));
    }
}
