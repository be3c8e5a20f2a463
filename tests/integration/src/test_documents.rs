//! Versioned document integration tests.

#[cfg(test)]
mod tests {
    use s3vfs_core::{SaveDecision, VfsError};
    use serde_json::{Value, json};

    use crate::{cleanup_bucket, create_versioned_bucket, s3_client, test_documents};

    const PATH: &str = "work/analysis.ipynb";

    fn notebook(source: &str) -> Value {
        json!({
            "cells": [{"cell_type": "code", "source": source, "metadata": {}, "outputs": []}],
            "metadata": {},
            "nbformat": 4,
            "nbformat_minor": 5
        })
    }

    fn parse(content: &str) -> Value {
        serde_json::from_str(content).expect("notebook JSON")
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_list_versions_newest_first() {
        let client = s3_client();
        let bucket = create_versioned_bucket(&client, "docver").await;
        let docs = test_documents(&bucket, "").await;

        let first = docs.save(PATH, notebook("1")).await.expect("save 1");
        let second = docs.save(PATH, notebook("2")).await.expect("save 2");

        let versions = docs.vfs().get_versions(PATH).await.expect("versions");
        assert_eq!(versions.len(), 2);
        assert_eq!(Some(versions[0].version_id.clone()), second.version_id);
        assert_eq!(Some(versions[1].version_id.clone()), first.version_id);
        assert!(versions[0].is_latest);

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_read_pinned_version_and_reject_stale_edit() {
        let client = s3_client();
        let bucket = create_versioned_bucket(&client, "docpin").await;
        let docs = test_documents(&bucket, "team").await;

        let first = docs.save(PATH, notebook("old")).await.expect("save");
        docs.save(PATH, notebook("new")).await.expect("save");
        let first = first.version_id.expect("versioned bucket");

        let content = docs.open_version(PATH, &first).await.expect("open version");
        let mut doc = parse(&content.content);
        assert_eq!(doc["cells"][0]["source"], "old");
        assert_eq!(doc["metadata"]["s3_current_version"], first.as_str());

        doc["cells"][0]["source"] = json!("old, edited");
        let err = docs.save(PATH, doc).await.expect_err("stale edit");
        assert!(matches!(err, VfsError::OverwriteRejected { .. }));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_fall_back_when_pinned_version_is_deleted() {
        let client = s3_client();
        let bucket = create_versioned_bucket(&client, "docgone").await;
        let docs = test_documents(&bucket, "").await;

        let first = docs.save(PATH, notebook("old")).await.expect("save");
        docs.save(PATH, notebook("new")).await.expect("save");
        let first = first.version_id.expect("versioned bucket");
        docs.pins().set(PATH, Some(first.as_str()));

        client
            .delete_object()
            .bucket(&bucket)
            .key(PATH)
            .version_id(&first)
            .send()
            .await
            .expect("purge version");

        let content = docs.open(PATH, None).await.expect("open");
        assert_eq!(parse(&content.content)["cells"][0]["source"], "new");
        assert!(docs.pins().is_empty());

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_tag_release_on_new_version() {
        let client = s3_client();
        let bucket = create_versioned_bucket(&client, "docrel").await;
        let docs = test_documents(&bucket, "").await;

        docs.save(PATH, notebook("draft")).await.expect("save");
        let mut doc = parse(&docs.open(PATH, None).await.expect("open").content);
        doc["metadata"]["s3_create_release"] = json!("v1.0");
        let outcome = docs.save(PATH, doc).await.expect("release");

        assert!(matches!(outcome.decision, SaveDecision::LatestPath { .. }));
        assert_eq!(outcome.release_tag, Some(0));

        let tagging = client
            .get_object_tagging()
            .bucket(&bucket)
            .key(PATH)
            .version_id(outcome.version_id.expect("versioned bucket"))
            .send()
            .await
            .expect("get tagging");
        let tags: Vec<_> = tagging
            .tag_set()
            .iter()
            .map(|t| (t.key().to_owned(), t.value().to_owned()))
            .collect();
        assert!(tags.contains(&("s3_release".to_owned(), "v1.0".to_owned())));
        assert!(tags.contains(&("s3_release_tag".to_owned(), "0".to_owned())));

        cleanup_bucket(&client, &bucket).await;
    }
}
