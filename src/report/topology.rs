use std::collections::BTreeMap;

use super::Node;

/// Describes how a node property is presented to the user.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MetadataTemplate {
    pub id: String,
    pub label: String,
    pub priority: u32,
}

impl MetadataTemplate {
    pub fn new(id: &str, label: &str, priority: u32) -> Self {
        Self {
            id: id.to_owned(),
            label: label.to_owned(),
            priority,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Topology {
    pub label: String,
    nodes: BTreeMap<String, Node>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    metadata_templates: BTreeMap<String, MetadataTemplate>,
}

impl Topology {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_metadata_templates(
        mut self,
        templates: impl IntoIterator<Item = MetadataTemplate>,
    ) -> Self {
        for template in templates {
            self.metadata_templates.insert(template.id.clone(), template);
        }
        self
    }

    /// Adds `node`, merging it into an existing node with the same ID.
    pub fn add_node(&mut self, node: Node) {
        match self.nodes.remove(&node.id) {
            Some(existing) => {
                let merged = existing.merge(&node);
                self.nodes.insert(merged.id.clone(), merged);
            }
            None => {
                self.nodes.insert(node.id.clone(), node);
            }
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn metadata_templates(&self) -> impl Iterator<Item = &MetadataTemplate> {
        self.metadata_templates.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn merge(mut self, other: &Topology) -> Self {
        if self.label.is_empty() {
            self.label = other.label.clone();
        }
        for node in other.nodes.values() {
            self.add_node(node.clone());
        }
        self.metadata_templates.extend(
            other
                .metadata_templates
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self
    }
}
