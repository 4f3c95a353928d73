//! Integration tests for category management and document references.

use serde_json::json;

use ydms::error::ServiceError;
use ydms::services::categories::CreateCategoryRequest;
use ydms::services::documents::{REFERENCES_KEY, parse_references};

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{TestContext, admin};

fn create(name: &str, parent_id: Option<i64>) -> CreateCategoryRequest {
    CreateCategoryRequest {
        name: name.to_string(),
        parent_id,
    }
}

#[tokio::test]
async fn test_created_categories_append_to_their_parent() {
    let ctx = TestContext::new().await;
    let categories = &ctx.state.categories;

    let unit = categories.create(&admin(), create("第一单元", None)).await.unwrap();
    let first = categories
        .create(&admin(), create("  第一课 ", Some(unit.id)))
        .await
        .unwrap();
    let second = categories
        .create(&admin(), create("第二课", Some(unit.id)))
        .await
        .unwrap();

    assert_eq!(first.name, "第一课");
    assert_eq!(first.position, 1);
    assert_eq!(second.position, 2);

    let tree = categories.tree(&admin()).await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].id, unit.id);
    let children: Vec<i64> = tree[0].children.iter().map(|child| child.id).collect();
    assert_eq!(children, vec![first.id, second.id]);
}

#[tokio::test]
async fn test_child_category_round_trips_through_trash() {
    let ctx = TestContext::new().await;
    let categories = &ctx.state.categories;

    let root = categories.create(&admin(), create("Root", None)).await.unwrap();
    let child = categories
        .create(&admin(), create("Child", Some(root.id)))
        .await
        .unwrap();
    assert_eq!(child.parent_id, Some(root.id));
    assert_eq!(child.position, 1);

    categories.delete(&admin(), child.id).await.unwrap();

    let tree = categories.tree(&admin()).await.unwrap();
    assert_eq!(tree.len(), 1);
    assert!(tree[0].children.is_empty());

    let trash = categories.trash(&admin()).await.unwrap();
    assert_eq!(trash.len(), 1);
    assert_eq!(trash[0].id, child.id);
    assert!(trash[0].deleted_at.is_some());

    categories.restore(&admin(), child.id).await.unwrap();

    assert!(categories.trash(&admin()).await.unwrap().is_empty());
    let tree = categories.tree(&admin()).await.unwrap();
    assert_eq!(tree[0].children[0].id, child.id);
}

#[tokio::test]
async fn test_create_rejects_blank_names_and_deleted_parents() {
    let ctx = TestContext::new().await;
    let categories = &ctx.state.categories;

    let err = categories.create(&admin(), create("   ", None)).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let unit = ctx.ndr.add_node("第一单元", None);
    ctx.ndr.soft_delete_node(unit);
    let err = categories
        .create(&admin(), create("第一课", Some(unit)))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let err = categories
        .create(&admin(), create("第一课", Some(404)))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn test_delete_moves_subtree_to_trash_and_restore_brings_it_back() {
    let ctx = TestContext::new().await;
    let categories = &ctx.state.categories;
    let unit = ctx.ndr.add_node("第一单元", None);
    let lesson = ctx.ndr.add_node("第一课", Some(unit));
    let other = ctx.ndr.add_node("第二单元", None);

    categories.delete(&admin(), unit).await.unwrap();

    let tree = categories.tree(&admin()).await.unwrap();
    let roots: Vec<i64> = tree.iter().map(|node| node.id).collect();
    assert_eq!(roots, vec![other]);

    let trash = categories.trash(&admin()).await.unwrap();
    assert_eq!(trash.len(), 1);
    assert_eq!(trash[0].id, unit);
    assert!(trash[0].deleted_at.is_some());

    let err = categories.delete(&admin(), unit).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let restored = categories.restore(&admin(), unit).await.unwrap();
    assert!(restored.deleted_at.is_none());

    let tree = categories.tree(&admin()).await.unwrap();
    assert_eq!(tree.len(), 2);
    assert_eq!(tree[0].children[0].id, lesson);
    assert!(categories.trash(&admin()).await.unwrap().is_empty());

    let err = categories.restore(&admin(), unit).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
}

#[tokio::test]
async fn test_restore_requires_live_parent() {
    let ctx = TestContext::new().await;
    let categories = &ctx.state.categories;
    let unit = ctx.ndr.add_node("第一单元", None);
    let lesson = ctx.ndr.add_node("第一课", Some(unit));

    categories.delete(&admin(), lesson).await.unwrap();
    categories.delete(&admin(), unit).await.unwrap();

    let err = categories.restore(&admin(), lesson).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(message) if message.contains("restore parent")));

    categories.restore(&admin(), unit).await.unwrap();
    categories.restore(&admin(), lesson).await.unwrap();
}

#[tokio::test]
async fn test_versions_are_listed_newest_first() {
    let ctx = TestContext::new().await;
    let node = ctx.ndr.add_node("第一课", None);
    let plan = ctx.ndr.add_document(node, "教案", "lesson_plan", json!({}));
    let outline = ctx.ndr.add_document(node, "提纲", "outline", json!({}));

    // Each reference change writes a version
    ctx.state
        .documents
        .add_reference(&admin(), plan, outline)
        .await
        .unwrap();

    let versions = ctx.state.documents.list_versions(&admin(), plan).await.unwrap();
    let numbers: Vec<i64> = versions.iter().map(|v| v.version_number).collect();
    assert_eq!(numbers, vec![2, 1]);

    for listed in &versions {
        let fetched = ctx
            .state
            .documents
            .get_version(&admin(), plan, listed.version_number)
            .await
            .unwrap();
        assert_eq!(fetched.version_number, listed.version_number);
        assert_eq!(fetched.title, listed.title);
    }

    let first = ctx.state.documents.get_version(&admin(), plan, 1).await.unwrap();
    assert_eq!(first.title, "教案");

    let err = ctx
        .state
        .documents
        .get_version(&admin(), plan, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));

    let err = ctx
        .state
        .documents
        .get_version(&admin(), plan, 9)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn test_references_are_added_once_and_removed_cleanly() {
    let ctx = TestContext::new().await;
    let documents = &ctx.state.documents;
    let node = ctx.ndr.add_node("第一课", None);
    let plan = ctx.ndr.add_document(node, "教案", "lesson_plan", json!({ "grade": 3 }));
    let outline = ctx.ndr.add_document(node, "提纲", "outline", json!({}));
    let slides = ctx.ndr.add_document(node, "课件", "slides", json!({}));

    documents.add_reference(&admin(), plan, outline).await.unwrap();
    let updated = documents.add_reference(&admin(), plan, slides).await.unwrap();

    let references = parse_references(&updated.metadata);
    assert_eq!(references.len(), 2);
    assert_eq!(references[0].document_id, outline);
    assert_eq!(references[0].title, "提纲");
    assert_eq!(updated.metadata["grade"], json!(3));

    let err = documents.add_reference(&admin(), plan, outline).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
    let err = documents.add_reference(&admin(), plan, plan).await.unwrap_err();
    assert!(matches!(err, ServiceError::Validation(_)));
    let err = documents.add_reference(&admin(), plan, 9_999).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    documents.remove_reference(&admin(), plan, outline).await.unwrap();
    let updated = documents.remove_reference(&admin(), plan, slides).await.unwrap();
    assert!(!updated.metadata.contains_key(REFERENCES_KEY));
    assert_eq!(updated.metadata["grade"], json!(3));

    let err = documents
        .remove_reference(&admin(), plan, slides)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}
