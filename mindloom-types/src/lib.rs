//! Core document model for Mindloom.
//!
//! A [`MindMap`] is the unit of persistence and sync: a tree of
//! [`MapNode`]s under a single fixed root, plus document metadata.
//! The root node id is fixed and the root is never deletable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed identifier of every map's root node.
pub const ROOT_NODE_ID: &str = "root";

/// A mind-map document — the unit of persistence and sync.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MindMap {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub root: MapNode,
    #[serde(default)]
    pub settings: MapSettings,
}

/// A single node in the map tree.
///
/// Children are ordered; `id` is unique within its document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapNode {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub style: NodeStyle,
    #[serde(default)]
    pub children: Vec<MapNode>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default)]
    pub note: Option<String>,
}

/// Canvas position of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Visual attributes of a node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStyle {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub font_size: Option<u32>,
    #[serde(default)]
    pub shape: Option<String>,
}

/// A file attached to a node. The engine only tracks metadata; the
/// attachment bytes live behind the remote file sub-resource endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// Per-document editor settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapSettings {
    #[serde(default = "default_true")]
    pub auto_layout: bool,
    #[serde(default)]
    pub layout_direction: LayoutDirection,
}

fn default_true() -> bool {
    true
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            auto_layout: true,
            layout_direction: LayoutDirection::default(),
        }
    }
}

/// Layout direction for auto-arranged maps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutDirection {
    #[default]
    Radial,
    Right,
    Down,
}

impl MapNode {
    /// Creates a leaf node with the given id and text.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            position: Position::default(),
            style: NodeStyle::default(),
            children: Vec::new(),
            attachments: Vec::new(),
            collapsed: false,
            note: None,
        }
    }

    /// Depth-first search for a node by id.
    pub fn find(&self, id: &str) -> Option<&MapNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// Depth-first search returning a mutable reference.
    pub fn find_mut(&mut self, id: &str) -> Option<&mut MapNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Removes the child subtree rooted at `id`. Returns the removed node,
    /// or `None` if the id is not in this subtree. The node this is called
    /// on is never removed — callers invoke it on the root, which makes the
    /// root non-deletable.
    pub fn remove_descendant(&mut self, id: &str) -> Option<MapNode> {
        if let Some(idx) = self.children.iter().position(|c| c.id == id) {
            return Some(self.children.remove(idx));
        }
        self.children
            .iter_mut()
            .find_map(|c| c.remove_descendant(id))
    }

    /// Total node count of this subtree, including self.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(MapNode::count).sum::<usize>()
    }
}

impl MindMap {
    /// Creates an empty map with a fresh id and the fixed root node.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        let title = title.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            root: MapNode::new(ROOT_NODE_ID, title.clone()),
            title,
            category: None,
            theme: None,
            created_at: now,
            updated_at: now,
            settings: MapSettings::default(),
        }
    }

    /// The default template used when neither the mirror nor the remote
    /// store has any data for a user.
    pub fn with_default_template() -> Self {
        let mut map = Self::new("My Mind Map");
        map.root.children = vec![
            MapNode::new(uuid::Uuid::new_v4().to_string(), "Idea 1"),
            MapNode::new(uuid::Uuid::new_v4().to_string(), "Idea 2"),
            MapNode::new(uuid::Uuid::new_v4().to_string(), "Idea 3"),
        ];
        map
    }

    /// Stamps `updated_at`. Every node mutation goes through this.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Adds a child under `parent_id`, stamping `updated_at`.
    /// Returns false if the parent does not exist.
    pub fn add_node(&mut self, parent_id: &str, node: MapNode) -> bool {
        match self.root.find_mut(parent_id) {
            Some(parent) => {
                parent.children.push(node);
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Removes a node subtree. The root node is never removed.
    pub fn remove_node(&mut self, id: &str) -> Option<MapNode> {
        if id == ROOT_NODE_ID {
            return None;
        }
        let removed = self.root.remove_descendant(id);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    /// Updates the text of a node, stamping `updated_at` on success.
    pub fn set_node_text(&mut self, id: &str, text: impl Into<String>) -> bool {
        match self.root.find_mut(id) {
            Some(node) => {
                node.text = text.into();
                self.touch();
                true
            }
            None => false,
        }
    }
}
