//! File system integration tests.

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use s3vfs_core::{ContentFormat, PinnedVersions, VfsError};

    use crate::{cleanup_bucket, create_test_bucket, s3_client, test_vfs};

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_initialize_root_marker() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "vfsinit").await;
        let vfs = test_vfs(&bucket, "home/user").await;

        vfs.init().await.expect("init");

        let resp = client
            .head_object()
            .bucket(&bucket)
            .key("home/user/.s3keep")
            .send()
            .await
            .expect("head marker");
        assert_eq!(resp.content_length(), Some(0));
        assert!(vfs.is_directory("").await.expect("is_directory"));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_write_read_and_list() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "vfsrw").await;
        let vfs = test_vfs(&bucket, "").await;
        let pins = PinnedVersions::new();

        vfs.make_directory("docs").await.expect("mkdir");
        vfs.write("docs/readme.md", "# hello", "text")
            .await
            .expect("write text");
        let blob = STANDARD.encode([0_u8, 159, 146, 150]);
        vfs.write("docs/blob.bin", &blob, "base64")
            .await
            .expect("write base64");
        vfs.write("docs/sub/inner.txt", "inner", "text")
            .await
            .expect("write nested");

        let listing = vfs.list("docs").await.expect("list");
        assert_eq!(
            listing,
            vec!["docs/.s3keep", "docs/blob.bin", "docs/readme.md", "docs/sub"]
        );

        let text = vfs.read("docs/readme.md", None, &pins).await.expect("read");
        assert_eq!(text.content, "# hello");
        assert_eq!(text.format, ContentFormat::Text);

        let binary = vfs.read("docs/blob.bin", None, &pins).await.expect("read");
        assert_eq!(binary.content, blob);
        assert_eq!(binary.format, ContentFormat::Base64);

        assert!(vfs.stat("docs/readme.md").await.expect("stat").modified.is_some());
        assert!(vfs.stat("docs").await.expect("stat").modified.is_some());
        assert!(vfs.stat("docs/nope").await.expect("stat").modified.is_none());

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_copy_move_and_remove_directories() {
        let client = s3_client();
        let bucket = create_test_bucket(&client, "vfscp").await;
        let vfs = test_vfs(&bucket, "root").await;

        vfs.make_directory("src").await.expect("mkdir");
        vfs.write("src/a.txt", "a", "text").await.expect("write");
        vfs.write("src/nested dir/b.txt", "b", "text")
            .await
            .expect("write");

        vfs.copy("src", "copy").await.expect("copy");
        assert!(vfs.is_file("copy/a.txt").await.expect("is_file"));
        assert!(vfs.is_file("copy/nested dir/b.txt").await.expect("is_file"));
        assert!(vfs.is_file("src/a.txt").await.expect("is_file"));

        vfs.rename("copy", "moved").await.expect("move");
        assert!(!vfs.is_directory("copy").await.expect("is_directory"));
        assert!(vfs.is_file("moved/nested dir/b.txt").await.expect("is_file"));

        vfs.remove("moved").await.expect("remove");
        vfs.remove("src/a.txt").await.expect("remove file");
        assert!(!vfs.is_directory("moved").await.expect("is_directory"));
        assert!(!vfs.is_file("src/a.txt").await.expect("is_file"));

        let err = vfs.remove("moved").await.expect_err("already removed");
        assert!(matches!(err, VfsError::NotFound { .. }));

        cleanup_bucket(&client, &bucket).await;
    }

    #[tokio::test]
    #[ignore = "requires running server"]
    async fn test_should_report_missing_bucket_as_error() {
        let vfs = test_vfs("test-missing-bucket-s3vfs", "").await;
        let err = vfs.init().await.expect_err("missing bucket");
        assert!(err.status_code() >= 400);
    }
}
