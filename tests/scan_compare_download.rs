//! Integration tests for the full sync pipeline.
//!
//! A mock site is scanned into the inventory, compared against the local
//! library, downloaded through the orchestrator, and compared again.

use std::sync::Arc;
use std::time::Duration;

use docsync_core::download::{ClientOptions, HttpClient};
use docsync_core::inventory::{
    DownloadHistory, DownloadStatus, LocalInventory, LocalScanner, NewLocalFile, NewSite,
    RemoteInventory, SiteStore,
};
use docsync_core::scraper::builtin_registry;
use docsync_core::{
    Database, DownloadOrchestrator, FileComparisonEngine, FileValidator, OrchestratorConfig,
    QueueSelection, SiteScanner, SqliteInventory, DEFAULT_PRIORITY,
};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MINIMAL_PDF: &[u8] = b"%PDF-1.4\n\
1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n\
2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n\
3 0 obj << /Type /Page /Parent 2 0 R >> endobj\n\
trailer << /Root 1 0 R >>\n\
%%EOF\n";

struct Harness {
    server: MockServer,
    store: Arc<SqliteInventory>,
    validator: Arc<FileValidator>,
    client: HttpClient,
    site_id: i64,
}

impl Harness {
    async fn new() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/docs/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html><body>
                    <a href="guide.pdf">Guide</a>
                    <a href="notes.txt">notes.txt</a>
                    <a href="index.html">Home</a>
                </body></html>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/docs/guide.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(MINIMAL_PDF))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/docs/notes.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("release notes\n"))
            .mount(&server)
            .await;

        let store = Arc::new(SqliteInventory::new(
            Database::new_in_memory().await.expect("database"),
        ));
        let site_id = store
            .add_site(&NewSite {
                name: "Docs".to_string(),
                url: format!("{}/docs/", server.uri()),
                scraper_type: "generic".to_string(),
            })
            .await
            .expect("add site");

        Self {
            server,
            store,
            validator: Arc::new(FileValidator::default()),
            client: HttpClient::new(&ClientOptions::default()).expect("client"),
            site_id,
        }
    }

    fn scanner(&self) -> SiteScanner {
        SiteScanner::new(
            self.store.clone(),
            self.store.clone(),
            Arc::new(builtin_registry(&[])),
            self.client.clone(),
            vec![".pdf".to_string(), ".txt".to_string()],
        )
    }

    fn engine(&self) -> FileComparisonEngine {
        FileComparisonEngine::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            Arc::clone(&self.validator),
        )
    }

    fn orchestrator(&self, dir: &TempDir) -> DownloadOrchestrator {
        let config = OrchestratorConfig {
            max_workers: 2,
            retry_count: 0,
            retry_delay: Duration::from_millis(10),
            download_dir: dir.path().to_path_buf(),
            poll_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(5),
            ..OrchestratorConfig::default()
        };
        let history: Arc<dyn DownloadHistory> = self.store.clone();
        DownloadOrchestrator::new(
            config,
            self.client.clone(),
            Arc::clone(&self.validator),
            Some(history),
        )
        .expect("valid config")
    }

    async fn download_all(&self, dir: &TempDir, selection: QueueSelection) -> usize {
        let specs = self
            .engine()
            .build_download_queue(Some(self.site_id), selection)
            .await
            .expect("queue");
        let count = specs.len();
        let orch = self.orchestrator(dir);
        for spec in specs {
            orch.enqueue(spec, DEFAULT_PRIORITY).expect("enqueue");
        }
        orch.start();
        orch.wait_idle().await;
        orch.stop().await;
        count
    }
}

#[tokio::test]
async fn test_scan_finds_only_document_links() {
    let harness = Harness::new().await;
    let report = harness.scanner().scan_site(harness.site_id).await.expect("scan");

    assert_eq!(report.categories_found, 1);
    assert_eq!(report.files_found, 2);
    assert_eq!(report.files_added, 2);

    let again = harness.scanner().scan_site(harness.site_id).await.expect("rescan");
    assert_eq!(again.files_added, 0);
    assert_eq!(again.files_removed, 0);

    let site = harness
        .store
        .get_site(harness.site_id)
        .await
        .expect("read site")
        .expect("site exists");
    assert!(site.last_scan_at.is_some());
}

#[tokio::test]
async fn test_download_turns_new_files_into_ok_files() {
    let harness = Harness::new().await;
    harness.scanner().scan_site(harness.site_id).await.expect("scan");

    let before = harness.engine().compare(Some(harness.site_id)).await.expect("compare");
    assert_eq!(before.new_files.len(), 2);
    assert!(before.ok_files.is_empty());

    let dir = TempDir::new().expect("temp dir");
    let queued = harness.download_all(&dir, QueueSelection::default()).await;
    assert_eq!(queued, 2);
    assert!(dir.path().join("Default").join("Guide.pdf").is_file());
    assert!(dir.path().join("Default").join("notes.txt").is_file());

    let history = harness.store.recent(10).await.expect("history");
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.status() == DownloadStatus::Completed));
    assert!(history.iter().all(|r| r.remote_file_id.is_some()));

    let after = harness.engine().compare(Some(harness.site_id)).await.expect("compare");
    assert!(after.new_files.is_empty());
    assert!(after.updated_files.is_empty());
    assert!(after.corrupted_files.is_empty());
    assert_eq!(after.ok_files.len(), 2);

    let linked = harness.store.list_local().await.expect("local files");
    assert_eq!(linked.len(), 2);
    assert!(linked.iter().all(|file| file.linked_remote_id.is_some()));
}

#[tokio::test]
async fn test_damaged_download_is_reported_and_requeued() {
    let harness = Harness::new().await;
    harness.scanner().scan_site(harness.site_id).await.expect("scan");
    let dir = TempDir::new().expect("temp dir");
    harness.download_all(&dir, QueueSelection::default()).await;

    let pdf = dir.path().join("Default").join("Guide.pdf");
    std::fs::write(&pdf, b"%PDF-1.4\ntruncated").expect("overwrite");

    let result = harness.engine().compare(Some(harness.site_id)).await.expect("compare");
    assert_eq!(result.corrupted_files.len(), 1);
    assert_eq!(result.corrupted_files[0].remote.name, "Guide");
    assert_eq!(result.ok_files.len(), 1);

    let only_corrupted = QueueSelection {
        include_new: false,
        include_updated: false,
        include_corrupted: true,
    };
    let requeued = harness.download_all(&dir, only_corrupted).await;
    assert_eq!(requeued, 1);
    assert_eq!(std::fs::read(&pdf).expect("read"), MINIMAL_PDF);

    let result = harness.engine().compare(Some(harness.site_id)).await.expect("compare");
    assert!(result.corrupted_files.is_empty());
    assert_eq!(result.ok_files.len(), 2);
}

#[tokio::test]
async fn test_redownload_replaces_damaged_library_copy() {
    let harness = Harness::new().await;
    harness.scanner().scan_site(harness.site_id).await.expect("scan");
    let guide_id = harness
        .store
        .list_by_site(harness.site_id)
        .await
        .expect("remote files")
        .into_iter()
        .find(|file| file.name == "Guide")
        .expect("guide listed")
        .id;

    let library = TempDir::new().expect("temp dir");
    let damaged = library.path().join("Guide.pdf");
    std::fs::write(&damaged, b"%PDF-1.4\ntruncated").expect("write");
    let library_id = harness
        .store
        .upsert_local(&NewLocalFile {
            path: damaged.to_string_lossy().into_owned(),
            size: 18,
            file_type: Some("pdf".to_string()),
        })
        .await
        .expect("upsert");
    harness.engine().link(library_id, guide_id).await.expect("link");

    let before = harness.engine().compare(Some(harness.site_id)).await.expect("compare");
    assert_eq!(before.corrupted_files.len(), 1);

    let only_corrupted = QueueSelection {
        include_new: false,
        include_updated: false,
        include_corrupted: true,
    };
    let downloads = TempDir::new().expect("temp dir");
    assert_eq!(harness.download_all(&downloads, only_corrupted).await, 1);

    let after = harness.engine().compare(Some(harness.site_id)).await.expect("compare");
    assert!(after.corrupted_files.is_empty());
    assert_eq!(after.ok_files.len(), 1);
    assert_eq!(after.ok_files[0].remote.id, guide_id);
    assert!(after.ok_files[0].local.path.starts_with(&*downloads.path().to_string_lossy()));

    let library_row = harness
        .store
        .get_local(library_id)
        .await
        .expect("read")
        .expect("row kept");
    assert_eq!(library_row.linked_remote_id, None);
}

#[tokio::test]
async fn test_local_scan_proposes_links_for_existing_library() {
    let harness = Harness::new().await;
    harness.scanner().scan_site(harness.site_id).await.expect("scan");

    let library = TempDir::new().expect("temp dir");
    std::fs::write(library.path().join("notes.txt"), "release notes\n").expect("write");
    let scanner = LocalScanner::new(harness.store.clone(), Arc::clone(&harness.validator));
    let stats = scanner.scan(library.path()).await.expect("local scan");
    assert_eq!(stats.scanned, 1);

    let engine = harness.engine();
    let result = engine.compare(Some(harness.site_id)).await.expect("compare");
    assert_eq!(result.new_files.len(), 2);
    assert_eq!(result.proposed_links.len(), 1);

    let applied = engine.apply_links(&result).await.expect("apply");
    assert_eq!(applied, 1);
    let result = engine.compare(Some(harness.site_id)).await.expect("compare");
    assert_eq!(result.new_files.len(), 1);
    assert_eq!(result.ok_files.len(), 1);
}

#[tokio::test]
async fn test_site_removed_from_listing_is_dropped_on_rescan() {
    let harness = Harness::new().await;
    harness.scanner().scan_site(harness.site_id).await.expect("scan");

    harness.server.reset().await;
    Mock::given(method("GET"))
        .and(path("/docs/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<html><body><a href="guide.pdf">Guide</a></body></html>"#),
        )
        .mount(&harness.server)
        .await;

    let report = harness.scanner().scan_site(harness.site_id).await.expect("rescan");
    assert_eq!(report.files_removed, 1);
    let result = harness.engine().compare(Some(harness.site_id)).await.expect("compare");
    assert_eq!(result.new_files.len(), 1);
}
