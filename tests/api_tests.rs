use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use webtoon_scraper::api;
use webtoon_scraper::app_state::AppState;
use webtoon_scraper::config::Config;
use webtoon_scraper::db::{self, with_conn};
use webtoon_scraper::error::FetchError;
use webtoon_scraper::fetcher::{AcceptPage, PageFetcher, ResourceClass};
use webtoon_scraper::job::ScrapeJob;
use webtoon_scraper::metrics::MetricsTracker;
use webtoon_scraper::orchestrator::{Orchestrator, PipelineSettings};
use webtoon_scraper::scheduler::JobQueue;

/// Every fetch fails, after a pause long enough to catch jobs in flight
struct SlowFailingFetcher;

#[async_trait]
impl PageFetcher for SlowFailingFetcher {
    async fn fetch_html(
        &self,
        url: &str,
        _class: ResourceClass,
        _accept: &AcceptPage<'_>,
    ) -> Result<String, FetchError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Err(FetchError::Status { url: url.to_string(), status: 403 })
    }

    async fn fetch_bytes(&self, url: &str, _referer: Option<&str>) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Status { url: url.to_string(), status: 403 })
    }
}

fn state(config: Config) -> web::Data<AppState> {
    let db = db::shared(db::init_memory_db().unwrap());
    let media = std::env::temp_dir().join("webtoon_scraper_api_tests");
    let settings = PipelineSettings {
        media_root: media,
        ..PipelineSettings::from(&config)
    };
    let orchestrator = Orchestrator::new(db.clone(), Arc::new(SlowFailingFetcher), settings);
    let queue = JobQueue::start(Arc::new(orchestrator), 1);
    web::Data::new(AppState {
        db,
        config,
        metrics: Arc::new(MetricsTracker::new()),
        queue,
    })
}

macro_rules! app {
    ($data:expr) => {
        test::init_service(App::new().app_data($data.clone()).configure(api::configure)).await
    };
}

fn submit(url: &str, owner: Option<&str>) -> test::TestRequest {
    let req = test::TestRequest::post().uri("/scraper/").set_json(json!({ "url": url }));
    match owner {
        Some(owner) => req.insert_header((api::OWNER_HEADER, owner)),
        None => req,
    }
}

#[actix_web::test]
async fn test_submit_requires_owner_header() {
    let data = state(Config::default());
    let app = app!(data);

    let resp = test::call_service(&app, submit("https://site.test/manga/demo/", None).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = test::call_service(&app, submit("https://site.test/manga/demo/", Some("abc")).to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_submit_requires_scraper_access() {
    let mut config = Config::default();
    config.access.scraper_owners = vec![1];
    let data = state(config);
    let app = app!(data);

    let resp = test::call_service(&app, submit("https://site.test/manga/demo/", Some("2")).to_request()).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("scraper access"));

    let resp = test::call_service(&app, submit("https://site.test/manga/demo/", Some("1")).to_request()).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
}

#[actix_web::test]
async fn test_submit_rejects_bad_urls() {
    let data = state(Config::default());
    let app = app!(data);

    for bad in ["", "not a url", "ftp://site.test/manga/demo/"] {
        let resp = test::call_service(&app, submit(bad, Some("1")).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "url {:?}", bad);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());
    }

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/scraper/")
            .insert_header((api::OWNER_HEADER, "1"))
            .insert_header(("content-type", "application/json"))
            .set_payload("{\"link\": 3}")
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let jobs = with_conn(&data.db, |c| db::list_jobs_for_owner(c, 1, 10)).unwrap();
    assert!(jobs.is_empty());
}

#[actix_web::test]
async fn test_submit_then_poll_status() {
    let data = state(Config::default());
    let app = app!(data);

    let resp = test::call_service(&app, submit("https://site.test/manga/demo/", Some("1")).to_request()).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["status"], "pending");
    assert_eq!(created["url"], "https://site.test/manga/demo/");
    assert_eq!(created["chapters_scraped"], 0);
    let id = created["id"].as_i64().unwrap();

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/scraper/status/{}", id))
            .insert_header((api::OWNER_HEADER, "1"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let polled: Value = test::read_body_json(resp).await;
    assert_eq!(polled["id"], id);

    // another owner cannot see it
    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/scraper/status/{}", id))
            .insert_header((api::OWNER_HEADER, "2"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/scraper/status/9999")
            .insert_header((api::OWNER_HEADER, "1"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_history_is_newest_first_and_limited() {
    let data = state(Config::default());
    let app = app!(data);

    with_conn(&data.db, |c| {
        for (i, url) in ["https://a.test/1", "https://a.test/2", "https://a.test/3"].iter().enumerate() {
            let mut job = ScrapeJob::pending(1, url, 1_700_000_000 + i as i64);
            db::insert_job(c, &mut job)?;
        }
        let mut other = ScrapeJob::pending(2, "https://b.test/x", 1_800_000_000);
        db::insert_job(c, &mut other)?;
        Ok(())
    })
    .unwrap();

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/scraper/history?limit=2")
            .insert_header((api::OWNER_HEADER, "1"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let urls: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["url"].as_str().unwrap())
        .collect();
    assert_eq!(urls, vec!["https://a.test/3", "https://a.test/2"]);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/scraper/history")
            .insert_header((api::OWNER_HEADER, "1"))
            .to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[actix_web::test]
async fn test_cancel_in_flight_job() {
    let data = state(Config::default());
    let app = app!(data);

    let resp = test::call_service(&app, submit("https://site.test/manga/demo/", Some("1")).to_request()).await;
    let created: Value = test::read_body_json(resp).await;
    let id = created["id"].as_i64().unwrap();

    let cancel = |owner: &str, id: i64| {
        test::TestRequest::post()
            .uri(&format!("/scraper/cancel/{}", id))
            .insert_header((api::OWNER_HEADER, owner.to_string()))
            .to_request()
    };

    let resp = test::call_service(&app, cancel("2", id)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = test::call_service(&app, cancel("1", id)).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["cancel_requested"], true);

    let resp = test::call_service(&app, cancel("1", 424242)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // once finished it is no longer cancellable
    let mut finished = false;
    for _ in 0..100 {
        let job = with_conn(&data.db, |c| db::get_job(c, id)).unwrap().unwrap();
        if job.status.is_terminal() {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(finished);
    let resp = test::call_service(&app, cancel("1", id)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_metrics_endpoint() {
    let data = state(Config::default());
    data.metrics.record_success("direct", Duration::from_millis(120));
    let app = app!(data);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["total_strategies_tracked"], 1);
    assert_eq!(body["metrics"][0]["strategy"], "direct");
    assert_eq!(body["metrics"][0]["successful_requests"], 1);
}
