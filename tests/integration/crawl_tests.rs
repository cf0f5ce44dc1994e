//! Integration tests for the crawler
//!
//! These tests use wiremock to serve listing, detail, comment and image
//! fixtures and run the full crawl cycle end-to-end against a SQLite file.

use gallery_crawler::config::{ArchiveConfig, Config, GalleryConfig, OutputConfig, RequestConfig};
use gallery_crawler::crawler::{Coordinator, CrawlService, StopSignal};
use gallery_crawler::extract::{
    CommentPage, Document, Extractor, HtmlExtractor, PostDetail, PostStub,
};
use gallery_crawler::storage::{CrawlStatus, ProgressRecord, SqliteStorage, Storage};
use gallery_crawler::{CrawlState, ExtractError, GalleryError};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LISTING_PATH: &str = "/board/lists/";
const DETAIL_PATH: &str = "/board/view/";

/// One listing row: (number, title, views, votes)
type Row<'a> = (u64, &'a str, i64, i64);

/// Creates a test configuration crawling the mock server
fn create_test_config(server_uri: &str, dir: &Path, max_pages: u32, min_post_id: u64) -> Config {
    Config {
        gallery: GalleryConfig {
            base_url: format!("{}{}?id=test", server_uri, LISTING_PATH),
            max_pages,
            min_post_id,
        },
        request: RequestConfig {
            user_agent: "TestCrawler/1.0".to_string(),
            referer: String::new(),
            timeout_secs: 5,
            delay_min_ms: 0,
            delay_max_ms: 0,
            min_interval_ms: 0,
        },
        output: OutputConfig {
            database_path: dir.join("crawl.db").display().to_string(),
            images_dir: dir.join("images").display().to_string(),
            archive_dir: dir.join("archive").display().to_string(),
        },
        archive: ArchiveConfig::default(),
    }
}

fn open_storage(dir: &Path) -> Arc<Mutex<SqliteStorage>> {
    let storage = SqliteStorage::new(&dir.join("crawl.db")).expect("Failed to open database");
    Arc::new(Mutex::new(storage))
}

fn coordinator(
    config: &Config,
    storage: &Arc<Mutex<SqliteStorage>>,
    extractor: Arc<dyn Extractor>,
    stop: StopSignal,
) -> Coordinator {
    Coordinator::new(config.clone(), Arc::clone(storage), extractor, stop)
        .expect("Failed to create coordinator")
}

fn listing_html(rows: &[Row<'_>]) -> String {
    let rows: String = rows
        .iter()
        .map(|(number, title, views, votes)| {
            format!(
                r#"<tr class="ub-content">
                    <td class="gall_num">{number}</td>
                    <td class="gall_tit"><a href="{DETAIL_PATH}?id=test&no={number}">{title}</a></td>
                    <td class="gall_writer" data-nick="writer{number}" data-uid="uid{number}" data-ip="">writer{number}</td>
                    <td class="gall_date" title="2024-05-01 12:00:00">05.01</td>
                    <td class="gall_count">{views}</td>
                    <td class="gall_recommend">{votes}</td>
                </tr>"#
            )
        })
        .collect();

    format!(
        r#"<html><body><table class="gall_list"><tbody>
        <tr class="ub-content"><td class="gall_num">공지</td><td class="gall_tit"><a href="/notice">Rules</a></td></tr>
        {rows}
        </tbody></table></body></html>"#
    )
}

fn detail_html(body: &str, images: &[&str], comments: &[(&str, &str)], next_comments: Option<&str>) -> String {
    let images: String = images
        .iter()
        .map(|src| format!(r#"<img src="{}">"#, src))
        .collect();
    format!(
        r#"<html><body>
        <div class="writing_view_box"><p>{body}</p>{images}</div>
        {}
        </body></html>"#,
        comments_html(comments, next_comments)
    )
}

fn comments_html(comments: &[(&str, &str)], next: Option<&str>) -> String {
    let items: String = comments
        .iter()
        .map(|(author, content)| {
            format!(
                r#"<li class="ub-content"><span class="nick">{author}</span><p class="comment">{content}</p><span class="date_time">05.01 13:00:00</span></li>"#
            )
        })
        .collect();
    let pagination = next
        .map(|href| format!(r#"<div class="pagination"><a class="page_next" href="{}">next</a></div>"#, href))
        .unwrap_or_default();
    format!(
        r#"<div class="comment_wrap"><ul class="comment_list">{items}</ul>{pagination}</div>"#
    )
}

async fn mount_listing(server: &MockServer, page: u32, rows: &[Row<'_>]) {
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .and(query_param("page", page.to_string().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(rows)))
        .mount(server)
        .await;
}

async fn mount_detail(server: &MockServer, number: u64, html: String) {
    Mock::given(method("GET"))
        .and(path(DETAIL_PATH))
        .and(query_param("no", number.to_string().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(server)
        .await;
}

async fn mount_plain_detail(server: &MockServer, number: u64) {
    mount_detail(server, number, detail_html(&format!("body {}", number), &[], &[], None)).await;
}

async fn mount_image(server: &MockServer, image_path: &str, bytes: &[u8]) {
    Mock::given(method("GET"))
        .and(path(image_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes.to_vec()))
        .mount(server)
        .await;
}

/// Mounts a single listing page with two posts: 101 (plain) and 102 (two images, two comments)
async fn mount_basic_gallery(server: &MockServer, views: i64) {
    mount_listing(server, 1, &[(102, "Second", views, 1), (101, "First", views, 0)]).await;
    mount_plain_detail(server, 101).await;
    mount_detail(
        server,
        102,
        detail_html(
            "Hello gallery",
            &["/img/102_a.png", "/img/102_b.jpg"],
            &[("alice", "nice"), ("bob", "agree")],
            None,
        ),
    )
    .await;
    mount_image(server, "/img/102_a.png", b"png-a").await;
    mount_image(server, "/img/102_b.jpg", b"jpg-b").await;
}

fn progress(storage: &Arc<Mutex<SqliteStorage>>) -> ProgressRecord {
    storage
        .lock()
        .unwrap()
        .get_progress()
        .unwrap()
        .expect("Progress should be recorded")
}

#[tokio::test]
async fn test_full_crawl_single_page() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_basic_gallery(&server, 10).await;

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());
    let mut coordinator = coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new());

    let summary = coordinator.run().await.expect("Crawl failed");

    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.status, CrawlStatus::Completed);
    assert_eq!(coordinator.state(), CrawlState::Completed);

    let storage_guard = storage.lock().unwrap();
    assert_eq!(storage_guard.count_posts().unwrap(), 2);

    let post = storage_guard.get_post_by_number("102").unwrap().unwrap();
    assert_eq!(post.title, "Second");
    assert_eq!(post.author, "writer102");
    assert_eq!(post.author_id, "uid102");
    assert_eq!(post.views, 10);
    assert_eq!(post.votes, 1);
    assert_eq!(post.date, "2024-05-01 12:00:00");
    assert_eq!(post.content, "Hello gallery");

    let detail = storage_guard.get_post(post.id).unwrap();
    assert_eq!(detail.comments.len(), 2);
    assert_eq!(detail.comments[0].author, "alice");
    assert_eq!(detail.images.len(), 2);
    assert_eq!(detail.images[0].file_path, "102_image_1.png");
    assert_eq!(detail.images[1].file_path, "102_image_2.jpg");
    assert_eq!(
        std::fs::read(dir.path().join("images").join("102_image_1.png")).unwrap(),
        b"png-a"
    );
    drop(storage_guard);

    let progress = progress(&storage);
    assert_eq!(progress.current_page, 1);
    assert_eq!(progress.total_pages, 1);
    assert_eq!(progress.total_processed, 2);
    assert_eq!(progress.status, CrawlStatus::Completed);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_basic_gallery(&server, 10).await;

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());

    coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new())
        .run()
        .await
        .unwrap();

    let (posts_before, comments_before, images_before, writes_before) = {
        let s = storage.lock().unwrap();
        (
            s.count_posts().unwrap(),
            s.count_all_comments().unwrap(),
            s.count_images().unwrap(),
            s.write_count(),
        )
    };

    let summary = coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.unchanged, 2);
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.updated, 0);

    let s = storage.lock().unwrap();
    assert_eq!(s.count_posts().unwrap(), posts_before);
    assert_eq!(s.count_all_comments().unwrap(), comments_before);
    assert_eq!(s.count_images().unwrap(), images_before);
    // Only the three progress writes: start, page 1, final status
    assert_eq!(s.write_count() - writes_before, 3);
}

#[tokio::test]
async fn test_changed_counters_update_post_without_duplicating_comments() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_basic_gallery(&server, 10).await;

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());
    coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new())
        .run()
        .await
        .unwrap();

    server.reset().await;
    mount_basic_gallery(&server, 15).await;

    let summary = coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new())
        .run()
        .await
        .unwrap();
    assert_eq!(summary.updated, 2);

    let s = storage.lock().unwrap();
    let post = s.get_post_by_number("102").unwrap().unwrap();
    assert_eq!(post.views, 15);
    assert_eq!(s.count_comments(post.id).unwrap(), 2);
    assert_eq!(s.count_images().unwrap(), 2);
    assert_eq!(s.get_post_images(post.id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_post_does_not_stop_page() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, 1, &[(3, "Three", 1, 0), (2, "Two", 1, 0), (1, "One", 1, 0)]).await;
    for number in 1..=3 {
        mount_plain_detail(&server, number).await;
    }

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());
    let extractor = Arc::new(HookedExtractor::new(&storage).fail_detail(2));
    let summary = coordinator(&config, &storage, extractor, StopSignal::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.failed, 1);

    {
        let s = storage.lock().unwrap();
        assert!(s.get_post_by_number("1").unwrap().is_some());
        assert!(s.get_post_by_number("2").unwrap().is_none());
        assert!(s.get_post_by_number("3").unwrap().is_some());
    }

    let progress = progress(&storage);
    assert_eq!(progress.current_page, 1);
    assert_eq!(progress.total_processed, 2);
}

#[tokio::test]
async fn test_post_without_body_is_stored() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, 1, &[(3, "Three", 1, 0), (2, "Two", 4, 0), (1, "One", 1, 0)]).await;
    mount_plain_detail(&server, 1).await;
    mount_plain_detail(&server, 3).await;
    // Post 2 was deleted: the page keeps its comments but has no body
    mount_detail(
        &server,
        2,
        format!(
            "<html><body><p>deleted</p>{}</body></html>",
            comments_html(&[("carol", "gone?")], None)
        ),
    )
    .await;

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());
    let summary = coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.inserted, 3);
    assert_eq!(summary.failed, 0);

    let s = storage.lock().unwrap();
    let post = s.get_post_by_number("2").unwrap().expect("Post 2 should be stored");
    assert_eq!(post.content, "");
    assert_eq!(post.views, 4);
    assert_eq!(s.count_comments(post.id).unwrap(), 1);
    assert!(s.get_post_images(post.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_detail_page_is_skipped() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, 1, &[(20, "Gone", 1, 0), (10, "Here", 1, 0)]).await;
    mount_plain_detail(&server, 10).await;
    Mock::given(method("GET"))
        .and(path(DETAIL_PATH))
        .and(query_param("no", "20"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());
    let summary = coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(storage.lock().unwrap().count_posts().unwrap(), 1);
}

#[tokio::test]
async fn test_failed_image_is_left_out() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, 1, &[(5, "Pictures", 1, 0)]).await;
    mount_detail(
        &server,
        5,
        detail_html("pics", &["/img/ok.png", "/img/broken.png"], &[], None),
    )
    .await;
    mount_image(&server, "/img/ok.png", b"ok").await;
    Mock::given(method("GET"))
        .and(path("/img/broken.png"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());
    let summary = coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.inserted, 1);
    let s = storage.lock().unwrap();
    let post = s.get_post_by_number("5").unwrap().unwrap();
    let images = s.get_post_images(post.id).unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].file_path, "5_image_1.png");
}

#[tokio::test]
async fn test_page_posts_sorted_descending() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, 1, &[(100, "a", 0, 0), (5000, "b", 0, 0), (9999, "c", 0, 0)]).await;
    for number in [100, 5000, 9999] {
        mount_plain_detail(&server, number).await;
    }

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());
    let mut coordinator = coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new());

    let report = coordinator.crawl_page(1).await.unwrap();
    let numbers: Vec<u64> = report.posts.iter().map(|p| p.number).collect();
    assert_eq!(numbers, vec![9999, 5000, 100]);
    assert!(!report.interrupted);
}

#[tokio::test]
async fn test_floor_excludes_old_posts() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, 1, &[(100, "a", 0, 0), (5000, "b", 0, 0), (9999, "c", 0, 0)]).await;

    let config = create_test_config(&server.uri(), dir.path(), 1, 4243000);
    let storage = open_storage(dir.path());
    let summary = coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.total_processed, 0);
    assert_eq!(storage.lock().unwrap().count_posts().unwrap(), 0);
}

#[tokio::test]
async fn test_image_dedup_across_posts() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, 1, &[(2, "Repost", 0, 0), (1, "Original", 0, 0)]).await;
    mount_detail(&server, 1, detail_html("original", &["/img/cat.png"], &[], None)).await;
    mount_detail(&server, 2, detail_html("repost", &["/mirror/cat-copy.png"], &[], None)).await;
    mount_image(&server, "/img/cat.png", b"the same cat").await;
    mount_image(&server, "/mirror/cat-copy.png", b"the same cat").await;

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());
    coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new())
        .run()
        .await
        .unwrap();

    let s = storage.lock().unwrap();
    assert_eq!(s.count_images().unwrap(), 1);

    let first = s.get_post_by_number("1").unwrap().unwrap();
    let second = s.get_post_by_number("2").unwrap().unwrap();
    let first_images = s.get_post_images(first.id).unwrap();
    let second_images = s.get_post_images(second.id).unwrap();
    assert_eq!(first_images, second_images);
    // Listing order processes post 2 first, so it owns the file
    assert_eq!(first_images[0].post_id, second.id);

    let files = std::fs::read_dir(dir.path().join("images")).unwrap().count();
    assert_eq!(files, 1);
}

#[tokio::test]
async fn test_comment_pages_are_followed_once() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, 1, &[(7, "Busy thread", 0, 0)]).await;
    mount_detail(
        &server,
        7,
        detail_html(
            "busy",
            &[],
            &[("alice", "first"), ("alice", "first")],
            Some("/board/comment/?no=7&cpage=2"),
        ),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/board/comment/"))
        .and(query_param("cpage", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "<html><body>{}</body></html>",
            comments_html(&[("bob", "second")], Some("/board/comment/?no=7&cpage=2"))
        )))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());
    coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new())
        .run()
        .await
        .unwrap();

    let s = storage.lock().unwrap();
    let post = s.get_post_by_number("7").unwrap().unwrap();
    let comments = s.get_comments(post.id).unwrap();
    let contents: Vec<&str> = comments.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second"]);
}

#[tokio::test]
async fn test_script_link_post_is_stored_from_listing() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    let listing = r#"<html><body><table class="gall_list"><tbody>
        <tr class="ub-content">
            <td class="gall_num">42</td>
            <td class="gall_tit"><a href="javascript:;">Survey</a></td>
            <td class="gall_writer" data-nick="op">op</td>
            <td class="gall_date" title="2024-05-01 09:00:00">09:00</td>
            <td class="gall_count">3</td>
        </tr></tbody></table></body></html>"#;
    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing))
        .mount(&server)
        .await;

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());
    let summary = coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.inserted, 1);
    let post = storage.lock().unwrap().get_post_by_number("42").unwrap().unwrap();
    assert_eq!(post.title, "Survey");
    assert_eq!(post.content, "");
    assert_eq!(post.votes, 0);
}

/// Wraps the HTML extractor and runs hooks at chosen points of a crawl
struct HookedExtractor {
    inner: HtmlExtractor,
    storage: Arc<Mutex<SqliteStorage>>,
    listing_page: Option<u32>,
    observe: bool,
    stop: Option<StopSignal>,
    drop_progress: Option<PathBuf>,
    stop_after_detail: Option<(u64, StopSignal)>,
    failing_detail: Option<u64>,
    observed: Mutex<Option<ProgressRecord>>,
}

impl HookedExtractor {
    fn new(storage: &Arc<Mutex<SqliteStorage>>) -> Self {
        Self {
            inner: HtmlExtractor::default(),
            storage: Arc::clone(storage),
            listing_page: None,
            observe: false,
            stop: None,
            drop_progress: None,
            stop_after_detail: None,
            failing_detail: None,
            observed: Mutex::new(None),
        }
    }

    /// Records the stored progress when `page` is parsed
    fn observe_at(mut self, page: u32) -> Self {
        self.listing_page = Some(page);
        self.observe = true;
        self
    }

    /// Requests a stop when `page` is parsed
    fn stop_at(mut self, page: u32, stop: StopSignal) -> Self {
        self.listing_page = Some(page);
        self.stop = Some(stop);
        self
    }

    /// Drops the progress table of `database` when `page` is parsed
    fn drop_progress_at(mut self, page: u32, database: PathBuf) -> Self {
        self.listing_page = Some(page);
        self.drop_progress = Some(database);
        self
    }

    /// Requests a stop while the detail page of post `number` is parsed
    fn stop_after_detail(mut self, number: u64, stop: StopSignal) -> Self {
        self.stop_after_detail = Some((number, stop));
        self
    }

    /// Makes the detail page of post `number` unparseable
    fn fail_detail(mut self, number: u64) -> Self {
        self.failing_detail = Some(number);
        self
    }
}

fn query_number(doc: &Document, key: &str) -> Option<u64> {
    doc.url
        .query_pairs()
        .find(|(name, _)| name == key)
        .and_then(|(_, value)| value.parse::<u64>().ok())
}

impl Extractor for HookedExtractor {
    fn parse_listing(&self, doc: &Document, min_post_id: u64) -> Result<Vec<PostStub>, ExtractError> {
        let page = query_number(doc, "page");

        if page.is_some() && page == self.listing_page.map(u64::from) {
            if self.observe {
                *self.observed.lock().unwrap() = self.storage.lock().unwrap().get_progress().unwrap();
            }
            if let Some(stop) = &self.stop {
                stop.request_stop();
            }
            if let Some(database) = &self.drop_progress {
                rusqlite::Connection::open(database)
                    .unwrap()
                    .execute_batch("DROP TABLE crawl_progress;")
                    .unwrap();
            }
        }

        self.inner.parse_listing(doc, min_post_id)
    }

    fn parse_detail(&self, doc: &Document) -> Result<PostDetail, ExtractError> {
        let number = query_number(doc, "no");

        if number.is_some() && number == self.failing_detail {
            return Err(ExtractError::InvalidDocument("truncated response".to_string()));
        }
        if let Some((target, stop)) = &self.stop_after_detail {
            if number == Some(*target) {
                stop.request_stop();
            }
        }

        self.inner.parse_detail(doc)
    }

    fn parse_comments(&self, doc: &Document) -> Result<CommentPage, ExtractError> {
        self.inner.parse_comments(doc)
    }
}

async fn mount_five_pages(server: &MockServer) {
    for page in 1..=5u32 {
        let number = u64::from(100 - page);
        mount_listing(server, page, &[(number, "post", 0, 0)]).await;
        mount_plain_detail(server, number).await;
    }
}

#[tokio::test]
async fn test_progress_after_three_of_five_pages() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_five_pages(&server).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 0);
    let storage = open_storage(dir.path());
    let extractor = Arc::new(HookedExtractor::new(&storage).observe_at(4));

    let summary = coordinator(&config, &storage, extractor.clone(), StopSignal::new())
        .run()
        .await
        .unwrap();

    let observed = extractor.observed.lock().unwrap().clone().expect("Page 4 was never parsed");
    assert_eq!(observed.current_page, 3);
    assert_eq!(observed.total_pages, 5);
    assert_eq!(observed.total_processed, 3);
    assert_eq!(observed.status, CrawlStatus::Running);

    assert_eq!(summary.pages_visited, 5);
    let progress = progress(&storage);
    assert_eq!(progress.current_page, 5);
    assert_eq!(progress.total_processed, 5);
    assert_eq!(progress.status, CrawlStatus::Completed);
}

#[tokio::test]
async fn test_stop_signal_ends_run_between_posts() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    mount_five_pages(&server).await;

    let config = create_test_config(&server.uri(), dir.path(), 5, 0);
    let storage = open_storage(dir.path());
    let stop = StopSignal::new();
    let extractor = Arc::new(HookedExtractor::new(&storage).stop_at(4, stop.clone()));

    let mut coordinator = coordinator(&config, &storage, extractor, stop);
    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.status, CrawlStatus::Stopped);
    assert_eq!(summary.total_processed, 3);
    assert_eq!(coordinator.state(), CrawlState::Stopped);
    assert_eq!(storage.lock().unwrap().count_posts().unwrap(), 3);

    let progress = progress(&storage);
    assert_eq!(progress.current_page, 3);
    assert_eq!(progress.status, CrawlStatus::Stopped);
}

#[tokio::test]
async fn test_unreachable_listing_page_is_skipped() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_listing(&server, 2, &[(11, "later", 0, 0)]).await;
    mount_plain_detail(&server, 11).await;

    let config = create_test_config(&server.uri(), dir.path(), 2, 0);
    let storage = open_storage(dir.path());
    let summary = coordinator(&config, &storage, Arc::new(HtmlExtractor::default()), StopSignal::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.pages_visited, 2);
    assert_eq!(summary.inserted, 1);
    assert_eq!(progress(&storage).current_page, 2);
}

#[tokio::test]
async fn test_progress_write_failure_aborts_run() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, 1, &[(20, "first", 0, 0)]).await;
    mount_listing(&server, 2, &[(19, "second", 0, 0)]).await;
    mount_plain_detail(&server, 20).await;
    mount_plain_detail(&server, 19).await;
    for page in 3..=5u32 {
        Mock::given(method("GET"))
            .and(path(LISTING_PATH))
            .and(query_param("page", page.to_string().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(&[])))
            .expect(0)
            .mount(&server)
            .await;
    }

    let config = create_test_config(&server.uri(), dir.path(), 5, 0);
    let storage = open_storage(dir.path());
    let extractor = Arc::new(HookedExtractor::new(&storage).drop_progress_at(2, dir.path().join("crawl.db")));

    let result = coordinator(&config, &storage, extractor, StopSignal::new())
        .run()
        .await;

    assert!(matches!(result, Err(GalleryError::Storage(_))));
    assert_eq!(storage.lock().unwrap().count_posts().unwrap(), 2);
    server.verify().await;
}

#[tokio::test]
async fn test_stop_after_last_post_still_completes() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    mount_listing(&server, 1, &[(2, "Two", 0, 0), (1, "One", 0, 0)]).await;
    mount_plain_detail(&server, 1).await;
    mount_plain_detail(&server, 2).await;

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());
    let stop = StopSignal::new();
    let extractor = Arc::new(HookedExtractor::new(&storage).stop_after_detail(1, stop.clone()));

    let mut coordinator = coordinator(&config, &storage, extractor, stop.clone());
    let summary = coordinator.run().await.unwrap();

    assert!(stop.is_stop_requested());
    assert_eq!(summary.total_processed, 2);
    assert_eq!(summary.status, CrawlStatus::Completed);
    assert_eq!(coordinator.state(), CrawlState::Completed);
    assert_eq!(progress(&storage).status, CrawlStatus::Completed);
}

#[tokio::test]
async fn test_service_runs_one_crawl_at_a_time() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path(LISTING_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing_html(&[(1, "slow", 0, 0)]))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    mount_plain_detail(&server, 1).await;

    let config = create_test_config(&server.uri(), dir.path(), 1, 0);
    let storage = open_storage(dir.path());
    let service = CrawlService::new(config, Arc::clone(&storage), Arc::new(HtmlExtractor::default()));
    let target = format!("{}{}?id=test", server.uri(), LISTING_PATH);

    let job = service.start_crawl(&target).unwrap();
    assert!(service.is_running());
    assert!(matches!(
        service.start_crawl(&target),
        Err(GalleryError::CrawlInProgress)
    ));

    let summary = job.handle.await.unwrap().unwrap();
    assert_eq!(summary.inserted, 1);
    assert!(!service.is_running());

    let progress = service.get_progress().unwrap().unwrap();
    assert_eq!(progress.target_url, target);
    assert_eq!(progress.status, CrawlStatus::Completed);

    let (posts, total) = service.list_posts(1, 10).unwrap();
    assert_eq!(total, 1);
    assert_eq!(posts[0].post.number, "1");
    assert_eq!(service.recent_posts(5).unwrap().len(), 1);

    let job = service.start_crawl(&target).unwrap();
    let summary = job.handle.await.unwrap().unwrap();
    assert_eq!(summary.unchanged, 1);
}
