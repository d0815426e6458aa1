//! HTTP endpoints for submitting and following scrape jobs
//!
//! The caller is identified by the `X-Owner-Id` header. All `/scraper`
//! routes are owner-scoped and gated on the `scraper_access` feature.

use crate::app_state::AppState;
use crate::config::Config;
use crate::db::{self, with_conn};
use crate::error::ScrapeError;
use crate::job::{JobView, ScrapeJob};
use crate::models::{HistoryQuery, ScrapeRequest};
use actix_web::http::StatusCode;
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder, ResponseError};
use chrono::Utc;
use url::Url;

pub const OWNER_HEADER: &str = "X-Owner-Id";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing or invalid X-Owner-Id header")]
    Unauthorized,

    #[error("scraper access is not enabled for this account")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({ "error": self.to_string() }))
    }
}

impl From<ScrapeError> for ApiError {
    fn from(e: ScrapeError) -> Self {
        match e {
            ScrapeError::Validation(msg) => ApiError::Validation(msg),
            ScrapeError::NotFound => ApiError::NotFound("Job not found".to_string()),
            other => {
                log::error!("Request failed: {}", other);
                ApiError::Internal(other.to_string())
            }
        }
    }
}

fn owner_id(req: &HttpRequest) -> Result<i64, ApiError> {
    req.headers()
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or(ApiError::Unauthorized)
}

/// Resolve the caller and check they hold `scraper_access`
fn scraper_owner(req: &HttpRequest, config: &Config) -> Result<i64, ApiError> {
    let owner = owner_id(req)?;
    match config.scraper_owners() {
        Some(allowed) if !allowed.contains(&owner) => Err(ApiError::Forbidden),
        _ => Ok(owner),
    }
}

/// Only absolute http(s) URLs with a host are accepted
pub fn validate_url(raw: &str) -> Result<Url, ScrapeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScrapeError::Validation("url is required".to_string()));
    }
    let url = Url::parse(trimmed).map_err(|e| ScrapeError::Validation(format!("invalid url '{}': {}", trimmed, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ScrapeError::Validation(format!(
            "unsupported scheme '{}', expected http or https",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ScrapeError::Validation(format!("url '{}' has no host", trimmed)));
    }
    Ok(url)
}

fn view(data: &AppState, job: &ScrapeJob) -> Result<JobView, ScrapeError> {
    let series_title = match job.series_id {
        Some(id) => with_conn(&data.db, |c| db::get_series(c, id))?.map(|s| s.title),
        None => None,
    };
    Ok(JobView::new(job, series_title))
}

#[post("/scraper/")]
async fn submit_scrape(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<ScrapeRequest>,
) -> Result<HttpResponse, ApiError> {
    let owner = scraper_owner(&req, &data.config)?;
    let url = validate_url(&body.url)?;

    let mut job = ScrapeJob::pending(owner, url.as_str(), Utc::now().timestamp());
    with_conn(&data.db, |c| db::insert_job(c, &mut job))?;
    log::info!("Owner {} queued job {} for {}", owner, job.id, job.source_url);

    data.queue.submit(job.id);
    Ok(HttpResponse::Accepted().json(JobView::new(&job, None)))
}

#[get("/scraper/status/{id}")]
async fn scrape_status(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let owner = scraper_owner(&req, &data.config)?;
    let id = path.into_inner();
    let job = with_conn(&data.db, |c| db::get_job_for_owner(c, owner, id))?
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", id)))?;
    Ok(HttpResponse::Ok().json(view(&data, &job)?))
}

#[get("/scraper/history")]
async fn scrape_history(
    req: HttpRequest,
    data: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, ApiError> {
    let owner = scraper_owner(&req, &data.config)?;
    let history = &data.config.history;
    let limit = query
        .limit
        .unwrap_or(history.default_limit)
        .clamp(1, history.max_limit.max(1));

    let jobs = with_conn(&data.db, |c| db::list_jobs_for_owner(c, owner, limit))?;
    let views = jobs
        .iter()
        .map(|job| view(&data, job))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(HttpResponse::Ok().json(views))
}

#[post("/scraper/cancel/{id}")]
async fn cancel_scrape(
    req: HttpRequest,
    data: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let owner = scraper_owner(&req, &data.config)?;
    let id = path.into_inner();
    let job = with_conn(&data.db, |c| db::get_job_for_owner(c, owner, id))?
        .filter(|job| !job.status.is_terminal())
        .ok_or_else(|| ApiError::NotFound(format!("No active job {}", id)))?;

    if !data.queue.cancel(job.id) {
        return Err(ApiError::NotFound(format!("Job {} is not in flight", id)));
    }
    log::info!("Owner {} asked to cancel job {}", owner, id);
    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "id": job.id,
        "status": job.status,
        "cancel_requested": true
    })))
}

#[get("/metrics")]
async fn get_metrics(data: web::Data<AppState>) -> impl Responder {
    let all_metrics = data.metrics.get_all_metrics();

    let metrics_json: Vec<serde_json::Value> = all_metrics
        .iter()
        .map(|m| {
            serde_json::json!({
                "strategy": m.strategy,
                "success_rate": format!("{:.2}%", m.success_rate()),
                "total_requests": m.total_requests,
                "successful_requests": m.successful_requests,
                "failed_requests": m.failed_requests,
                "average_response_time_ms": format!("{:.2}", m.average_response_time_ms),
                "retry_count": m.retry_count,
                "rate_limit_hits": m.rate_limit_hits,
                "timeout_count": m.timeout_count,
                "last_success": m.last_success,
                "last_failure": m.last_failure,
                "last_error": m.last_error,
            })
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "metrics": metrics_json,
        "total_strategies_tracked": all_metrics.len()
    }))
}

/// Register every route; shared by the binary and the tests
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default().error_handler(|err, _req| ApiError::Validation(err.to_string()).into()),
    )
    .service(submit_scrape)
    .service(scrape_status)
    .service(scrape_history)
    .service(cancel_scrape)
    .service(get_metrics);
}
