use actix_web::{web, App, HttpServer};
use log::{error, info};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config as LogConfig, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::io;
use std::path::Path;
use std::sync::Arc;
use webtoon_scraper::app_state::AppState;
use webtoon_scraper::config::Config;
use webtoon_scraper::fetcher::StrategyChain;
use webtoon_scraper::metrics::MetricsTracker;
use webtoon_scraper::orchestrator::{Orchestrator, PipelineSettings};
use webtoon_scraper::rate_limiter::RateLimiter;
use webtoon_scraper::scheduler::{self, JobQueue};
use webtoon_scraper::{api, db};

fn init_logging() {
    let err = match log4rs::init_file("log4rs.yml", Default::default()) {
        Ok(()) => return,
        Err(e) => e,
    };

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {h({l})} {t} - {m}{n}")))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(log::LevelFilter::Info));
    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                eprintln!("Logging disabled: {}", e);
            }
        }
        Err(e) => eprintln!("Logging disabled: {}", e),
    }
    log::warn!("log4rs.yml not usable ({}), logging to console only", err);
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    init_logging();

    let cfg = Config::load();
    let conn = db::init_db(Path::new(&cfg.storage.database_path)).map_err(io::Error::other)?;
    let db = db::shared(conn);

    let metrics = Arc::new(MetricsTracker::new());
    let chain = StrategyChain::from_config(&cfg, metrics.clone()).map_err(io::Error::other)?;

    info!("Fetch strategies:");
    info!("  Series: {:?}", cfg.strategies.series);
    info!("  Chapters: {:?}", cfg.strategies.chapters);
    info!("  Images: {:?}", cfg.strategies.images);
    info!("  Proxy configured: {}", cfg.proxy.is_configured());
    info!("  Browser enabled: {}", cfg.fetch.enable_browser);

    let mut orchestrator = Orchestrator::new(db.clone(), Arc::new(chain), PipelineSettings::from(&cfg));
    if let Some(qps) = cfg.download.direct_qps {
        orchestrator = orchestrator.with_image_limiter(Arc::new(RateLimiter::new(qps)));
    }

    let queue = JobQueue::start(Arc::new(orchestrator), cfg.workers.count);
    if let Err(e) = scheduler::recover(&db, &queue) {
        error!("Recovery sweep failed: {}", e);
    }

    let host = cfg.server.host.clone();
    let (first_port, last_port) = (cfg.server.port, cfg.server.port_max.max(cfg.server.port));
    let data = web::Data::new(AppState {
        db,
        config: cfg,
        metrics,
        queue,
    });

    // Try to bind to an available port in the configured range
    let mut last_err: Option<io::Error> = None;
    for port in first_port..=last_port {
        let data_clone = data.clone();
        let addr = format!("{}:{}", host, port);
        match HttpServer::new(move || App::new().app_data(data_clone.clone()).configure(api::configure)).bind(&addr) {
            Ok(server) => {
                info!("Listening on {}", addr);
                return server.run().await;
            }
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("No available ports {}-{}", first_port, last_port),
        )
    }))
}
