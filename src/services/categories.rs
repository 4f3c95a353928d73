//! Category tree management on top of NDR nodes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::auth::RequestMeta;
use crate::clients::NdrClient;
use crate::clients::ndr::{CreateNodeRequest, Node};
use crate::error::{ServiceError, ServiceResult};

/// Category with its live children, in position order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CategoryTreeNode {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub position: i32,
    pub path: Option<String>,
    #[schema(no_recursion)]
    pub children: Vec<CategoryTreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateCategoryRequest {
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

fn sort_siblings(nodes: &mut [Node]) {
    nodes.sort_by_key(|node| (node.position, node.id));
}

/// Build a forest of live nodes from a flat node list. Nodes whose parent is
/// unknown become roots; descendants of deleted nodes are dropped.
pub fn build_tree(mut nodes: Vec<Node>) -> Vec<CategoryTreeNode> {
    sort_siblings(&mut nodes);
    let known: HashSet<i64> = nodes.iter().map(|node| node.id).collect();

    let mut by_parent: HashMap<Option<i64>, Vec<Node>> = HashMap::new();
    for node in nodes.into_iter().filter(|node| !node.is_deleted()) {
        let parent = node.parent_id.filter(|parent| known.contains(parent));
        by_parent.entry(parent).or_default().push(node);
    }

    fn attach(
        parent: Option<i64>,
        by_parent: &mut HashMap<Option<i64>, Vec<Node>>,
    ) -> Vec<CategoryTreeNode> {
        let Some(nodes) = by_parent.remove(&parent) else {
            return Vec::new();
        };
        nodes
            .into_iter()
            .map(|node| CategoryTreeNode {
                children: attach(Some(node.id), by_parent),
                id: node.id,
                name: node.name,
                parent_id: node.parent_id,
                position: node.position,
                path: node.path,
            })
            .collect()
    }

    attach(None, &mut by_parent)
}

pub struct CategoryService {
    ndr: Arc<dyn NdrClient>,
}

impl CategoryService {
    pub fn new(ndr: Arc<dyn NdrClient>) -> Self {
        Self { ndr }
    }

    pub async fn tree(&self, meta: &RequestMeta) -> ServiceResult<Vec<CategoryTreeNode>> {
        let nodes = self
            .ndr
            .list_nodes(meta, true)
            .await
            .map_err(ServiceError::ndr)?;
        Ok(build_tree(nodes))
    }

    /// Create a category as the last child of its parent.
    #[instrument(skip(self, meta, request), fields(parent_id = ?request.parent_id))]
    pub async fn create(
        &self,
        meta: &RequestMeta,
        request: CreateCategoryRequest,
    ) -> ServiceResult<Node> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ServiceError::validation("category name must not be empty"));
        }

        let siblings = match request.parent_id {
            Some(parent_id) => {
                let parent = self
                    .ndr
                    .get_node(meta, parent_id)
                    .await
                    .map_err(ServiceError::ndr)?;
                if parent.is_deleted() {
                    return Err(ServiceError::validation(format!(
                        "parent category {} is deleted",
                        parent_id
                    )));
                }
                self.ndr
                    .list_children(meta, parent_id)
                    .await
                    .map_err(ServiceError::ndr)?
            }
            None => self
                .ndr
                .list_nodes(meta, false)
                .await
                .map_err(ServiceError::ndr)?
                .into_iter()
                .filter(|node| node.parent_id.is_none())
                .collect(),
        };

        let position = siblings
            .iter()
            .filter(|node| !node.is_deleted())
            .map(|node| node.position)
            .max()
            .unwrap_or(0)
            + 1;

        let node = self
            .ndr
            .create_node(
                meta,
                &CreateNodeRequest {
                    name: name.to_string(),
                    parent_id: request.parent_id,
                    position: Some(position),
                },
            )
            .await
            .map_err(ServiceError::ndr)?;

        info!(node_id = node.id, position, "Category created");
        Ok(node)
    }

    /// Soft delete a category.
    #[instrument(skip(self, meta))]
    pub async fn delete(&self, meta: &RequestMeta, node_id: i64) -> ServiceResult<()> {
        let node = self
            .ndr
            .get_node(meta, node_id)
            .await
            .map_err(ServiceError::ndr)?;
        if node.is_deleted() {
            return Err(ServiceError::validation(format!(
                "category {} is already deleted",
                node_id
            )));
        }

        self.ndr
            .delete_node(meta, node_id)
            .await
            .map_err(ServiceError::ndr)?;
        info!(node_id, "Category moved to trash");
        Ok(())
    }

    /// Deleted categories, most recently deleted first.
    pub async fn trash(&self, meta: &RequestMeta) -> ServiceResult<Vec<Node>> {
        let mut deleted: Vec<Node> = self
            .ndr
            .list_nodes(meta, true)
            .await
            .map_err(ServiceError::ndr)?
            .into_iter()
            .filter(Node::is_deleted)
            .collect();
        deleted.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at).then(a.id.cmp(&b.id)));
        Ok(deleted)
    }

    #[instrument(skip(self, meta))]
    pub async fn restore(&self, meta: &RequestMeta, node_id: i64) -> ServiceResult<Node> {
        let node = self
            .ndr
            .get_node(meta, node_id)
            .await
            .map_err(ServiceError::ndr)?;
        if !node.is_deleted() {
            return Err(ServiceError::validation(format!(
                "category {} is not deleted",
                node_id
            )));
        }

        if let Some(parent_id) = node.parent_id {
            let parent = self
                .ndr
                .get_node(meta, parent_id)
                .await
                .map_err(ServiceError::ndr)?;
            if parent.is_deleted() {
                return Err(ServiceError::validation(format!(
                    "restore parent category {} first",
                    parent_id
                )));
            }
        }

        let restored = self
            .ndr
            .restore_node(meta, node_id)
            .await
            .map_err(ServiceError::ndr)?;
        info!(node_id, "Category restored");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, parent_id: Option<i64>, position: i32) -> Node {
        Node {
            id,
            name: format!("node-{}", id),
            parent_id,
            position,
            path: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_build_tree_orders_siblings_by_position() {
        let tree = build_tree(vec![
            node(3, Some(1), 2),
            node(1, None, 1),
            node(2, Some(1), 1),
            node(4, None, 2),
            node(5, Some(2), 1),
        ]);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].id, 1);
        assert_eq!(tree[1].id, 4);
        let children: Vec<i64> = tree[0].children.iter().map(|child| child.id).collect();
        assert_eq!(children, vec![2, 3]);
        assert_eq!(tree[0].children[0].children[0].id, 5);
    }

    #[test]
    fn test_deleted_subtrees_are_hidden() {
        let mut deleted = node(2, Some(1), 1);
        deleted.deleted_at = Some(chrono::Utc::now());

        let tree = build_tree(vec![node(1, None, 1), deleted, node(3, Some(2), 1)]);

        assert_eq!(tree.len(), 1);
        assert!(tree[0].children.is_empty());
    }

    #[test]
    fn test_orphans_become_roots() {
        let tree = build_tree(vec![node(7, Some(99), 1)]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, 7);
        assert_eq!(tree[0].parent_id, Some(99));
    }
}
