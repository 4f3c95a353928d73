//! Subtree collection and node skip policies shared by the batch services.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::auth::RequestMeta;
use crate::clients::NdrClient;
use crate::clients::ndr::{Document, Node, NodeDocumentsQuery, SourceDocument};
use crate::error::{ServiceError, ServiceResult};

const DOCUMENT_PAGE_SIZE: u32 = 100;
const MAX_DOCUMENT_PAGES: u32 = 1000;

/// A node reached by [`collect_nodes`], with its depth below the root
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedNode {
    pub node: Node,
    pub depth: u32,
}

/// Depth-first, pre-order collection of `root_id` and (optionally) its live
/// descendants. Siblings are visited in position order.
pub async fn collect_nodes(
    ndr: &dyn NdrClient,
    meta: &RequestMeta,
    root_id: i64,
    include_descendants: bool,
) -> ServiceResult<Vec<CollectedNode>> {
    let root = ndr.get_node(meta, root_id).await.map_err(ServiceError::ndr)?;
    if root.is_deleted() {
        return Err(ServiceError::validation(format!(
            "node {} is deleted",
            root_id
        )));
    }

    let mut collected = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![CollectedNode {
        node: root,
        depth: 0,
    }];

    while let Some(current) = stack.pop() {
        if !seen.insert(current.node.id) {
            continue;
        }

        if include_descendants {
            let mut children = ndr
                .list_children(meta, current.node.id)
                .await
                .map_err(ServiceError::ndr)?;
            children.retain(|child| !child.is_deleted());
            children.sort_by_key(|child| (child.position, child.id));

            // Reversed so the first sibling is popped first
            for child in children.into_iter().rev() {
                stack.push(CollectedNode {
                    node: child,
                    depth: current.depth + 1,
                });
            }
        }

        collected.push(current);
    }

    debug!(root_id, count = collected.len(), "Collected nodes");
    Ok(collected)
}

/// Every live document bound directly to the node, across all pages.
pub async fn list_direct_documents(
    ndr: &dyn NdrClient,
    meta: &RequestMeta,
    node_id: i64,
) -> ServiceResult<Vec<Document>> {
    let mut documents = Vec::new();
    let mut query = NodeDocumentsQuery::direct(DOCUMENT_PAGE_SIZE);

    while query.page <= MAX_DOCUMENT_PAGES {
        let page = ndr
            .list_node_documents(meta, node_id, &query)
            .await
            .map_err(ServiceError::ndr)?;
        let fetched = page.items.len();
        documents.extend(page.items);

        if fetched < query.size as usize || documents.len() as i64 >= page.total {
            break;
        }
        query.page += 1;
    }

    documents.retain(|doc| doc.deleted_at.is_none());
    Ok(documents)
}

/// Direct documents of the node that are not among its sources: the documents
/// a node workflow writes.
pub async fn output_documents(
    ndr: &dyn NdrClient,
    meta: &RequestMeta,
    node_id: i64,
    source_ids: &[i64],
) -> ServiceResult<Vec<Document>> {
    let sources: HashSet<i64> = source_ids.iter().copied().collect();
    let mut documents = list_direct_documents(ndr, meta, node_id).await?;
    documents.retain(|doc| !sources.contains(&doc.id));
    Ok(documents)
}

/// Independently togglable rules for skipping nodes in a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SkipPolicy {
    /// Skip nodes whose name contains any of these substrings
    #[serde(default)]
    pub skip_name_patterns: Vec<String>,
    /// Skip nodes without source documents
    #[serde(default)]
    pub skip_no_source: bool,
    /// Skip nodes without output documents
    #[serde(default)]
    pub skip_no_output: bool,
    /// Skip nodes with a source document of one of these types
    #[serde(default)]
    pub exclude_source_types: Vec<String>,
}

/// Result of applying a [`SkipPolicy`] to one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEvaluation {
    pub sources: Vec<SourceDocument>,
    pub skip_reason: Option<String>,
}

impl NodeEvaluation {
    pub fn source_ids(&self) -> Vec<i64> {
        self.sources.iter().map(|doc| doc.document_id).collect()
    }
}

impl SkipPolicy {
    /// Name-only check, needing no NDR calls.
    pub fn name_skip_reason(&self, node: &Node) -> Option<String> {
        self.skip_name_patterns
            .iter()
            .filter(|pattern| !pattern.is_empty())
            .find(|pattern| node.name.contains(pattern.as_str()))
            .map(|pattern| format!("name matches pattern \"{}\"", pattern))
    }

    /// Apply every enabled rule. Source documents are always loaded because
    /// callers pass them on to the workflow trigger.
    pub async fn evaluate(
        &self,
        ndr: &dyn NdrClient,
        meta: &RequestMeta,
        node: &Node,
    ) -> ServiceResult<NodeEvaluation> {
        let sources = ndr
            .list_source_documents(meta, node.id)
            .await
            .map_err(ServiceError::ndr)?;

        if let Some(reason) = self.name_skip_reason(node) {
            return Ok(NodeEvaluation {
                sources,
                skip_reason: Some(reason),
            });
        }

        if self.skip_no_source && sources.is_empty() {
            return Ok(NodeEvaluation {
                sources,
                skip_reason: Some("no source documents".to_string()),
            });
        }

        if let Some(excluded) = sources.iter().find(|doc| {
            self.exclude_source_types
                .iter()
                .any(|doc_type| doc_type == &doc.doc_type)
        }) {
            let reason = format!("source document type \"{}\" excluded", excluded.doc_type);
            return Ok(NodeEvaluation {
                sources,
                skip_reason: Some(reason),
            });
        }

        if self.skip_no_output {
            let source_ids: Vec<i64> = sources.iter().map(|doc| doc.document_id).collect();
            let outputs = output_documents(ndr, meta, node.id, &source_ids).await?;
            if outputs.is_empty() {
                return Ok(NodeEvaluation {
                    sources,
                    skip_reason: Some("no output documents".to_string()),
                });
            }
        }

        Ok(NodeEvaluation {
            sources,
            skip_reason: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> Node {
        Node {
            id: 1,
            name: name.to_string(),
            parent_id: None,
            position: 1,
            path: None,
            deleted_at: None,
        }
    }

    #[test]
    fn test_name_pattern_matches_substring() {
        let policy = SkipPolicy {
            skip_name_patterns: vec!["".to_string(), "草稿".to_string()],
            ..SkipPolicy::default()
        };

        assert_eq!(
            policy.name_skip_reason(&node("第一章 草稿")).as_deref(),
            Some("name matches pattern \"草稿\"")
        );
        assert!(policy.name_skip_reason(&node("第一章")).is_none());
    }

    #[test]
    fn test_skip_policy_deserializes_with_defaults() {
        let policy: SkipPolicy = serde_json::from_str(r#"{"skip_no_source": true}"#).unwrap();
        assert!(policy.skip_no_source);
        assert!(!policy.skip_no_output);
        assert!(policy.skip_name_patterns.is_empty());
    }
}
