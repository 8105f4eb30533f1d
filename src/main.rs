use actix_web::{get, post, web, App, HttpResponse, HttpServer};
use log::{error, info};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tankobon::app_state::AppState;
use tankobon::config::Config;
use tankobon::error::{ApiError, ApiResult};
use tankobon::metrics::MetricsTracker;
use tankobon::models::{
    ContentRating, Demographic, MangaStatus, PageVariant, SortDirection, SortKey, Source, TagQuery,
};
use tankobon::providers::{ComickProvider, MangaDexProvider, Provider, ProviderRegistry};
use tankobon::reader::ReaderProxy;
use tankobon::search::{self, SearchQuery};
use tankobon::store::{self, CandidateFilter};
use tankobon::sync::SyncEngine;
use tankobon::transport::RetryTransport;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

fn parse_source(raw: &str) -> ApiResult<Source> {
    Source::parse(raw).ok_or_else(|| ApiError::Validation(format!("unknown source '{}'", raw)))
}

#[get("/sync/{source}/status")]
async fn sync_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let source = parse_source(&path)?;
    let progress = data.engine.status(source)?;
    Ok(HttpResponse::Ok().json(progress))
}

#[post("/sync/{source}/full")]
async fn sync_full(data: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let source = parse_source(&path)?;
    data.engine.spawn_full_sync(source);
    let progress = data.engine.status(source)?;
    Ok(HttpResponse::Accepted().json(progress))
}

#[post("/sync/{source}/incremental")]
async fn sync_incremental(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let source = parse_source(&path)?;
    data.engine.spawn_incremental_sync(source);
    let progress = data.engine.status(source)?;
    Ok(HttpResponse::Accepted().json(progress))
}

fn split_list(raw: Option<&String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

fn search_query_from_params(params: &HashMap<String, String>) -> SearchQuery {
    let filter = CandidateFilter {
        status: params.get("status").map(|s| MangaStatus::from_upstream(s)),
        content_rating: params.get("rating").map(|s| ContentRating::from_upstream(s)),
        demographic: params.get("demographic").and_then(|s| Demographic::from_upstream(s)),
        original_language: params.get("lang").cloned(),
        min_chapters: params.get("min_chapters").and_then(|s| s.parse().ok()),
        year_min: params.get("year_min").and_then(|s| s.parse().ok()),
        year_max: params.get("year_max").and_then(|s| s.parse().ok()),
    };
    let tags = TagQuery {
        required: split_list(params.get("tags")),
        preferred: split_list(params.get("preferred_tags")),
        excluded: split_list(params.get("excluded_tags")),
    };
    SearchQuery {
        text: params.get("q").cloned().filter(|q| !q.is_empty()),
        tags,
        filter,
        sort: params.get("sort").map(|s| SortKey::parse(s)).unwrap_or_default(),
        direction: params
            .get("order")
            .map(|s| SortDirection::parse(s))
            .unwrap_or_default(),
        limit: params
            .get("limit")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LIMIT)
            .min(MAX_LIMIT),
        offset: params.get("offset").and_then(|s| s.parse().ok()).unwrap_or(0),
    }
}

#[get("/search")]
async fn search_catalog(
    data: web::Data<AppState>,
    params: web::Query<HashMap<String, String>>,
) -> ApiResult<HttpResponse> {
    let query = search_query_from_params(&params);
    let conn = data
        .db
        .lock()
        .map_err(|_| ApiError::SyncFailed("store lock poisoned".into()))?;
    let response = search::execute(&conn, &query)?;
    Ok(HttpResponse::Ok().json(response))
}

#[get("/manga/{id}")]
async fn get_manga(
    data: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<HashMap<String, String>>,
) -> ApiResult<HttpResponse> {
    let (provider, native_id) = data
        .registry
        .route(&path, params.get("source").map(String::as_str))?;
    let source = provider.source();

    {
        let conn = data
            .db
            .lock()
            .map_err(|_| ApiError::SyncFailed("store lock poisoned".into()))?;
        if let Some(manga) = store::get_manga(&conn, source, &native_id)? {
            return Ok(HttpResponse::Ok().json(manga));
        }
    }

    // Not in the store yet: fetch live and keep a copy.
    let manga = tankobon::metrics::track_request(
        &data.metrics,
        source.name(),
        provider.get_details(&native_id),
    )
    .await?;
    let mut conn = data
        .db
        .lock()
        .map_err(|_| ApiError::SyncFailed("store lock poisoned".into()))?;
    store::upsert_batch(&mut conn, std::slice::from_ref(&manga))?;
    Ok(HttpResponse::Ok().json(manga))
}

#[get("/manga/{id}/chapters")]
async fn get_chapters(
    data: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<HashMap<String, String>>,
) -> ApiResult<HttpResponse> {
    let (provider, native_id) = data
        .registry
        .route(&path, params.get("source").map(String::as_str))?;
    let chapters = tankobon::metrics::track_request(
        &data.metrics,
        provider.source().name(),
        provider.list_chapters(&native_id),
    )
    .await?;
    Ok(HttpResponse::Ok().json(chapters))
}

#[get("/reader/{chapter_id}/{page}")]
async fn reader_page(
    data: web::Data<AppState>,
    path: web::Path<(String, usize)>,
    params: web::Query<HashMap<String, String>>,
) -> ApiResult<HttpResponse> {
    let (chapter_id, page) = path.into_inner();
    let variant = params
        .get("variant")
        .map(|v| PageVariant::parse(v))
        .unwrap_or(PageVariant::Normal);
    let (bytes, content_type) = data.reader.resolve_page(&chapter_id, page, variant).await?;
    Ok(HttpResponse::Ok().content_type(content_type).body(bytes))
}

#[get("/metrics")]
async fn get_metrics(data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(data.metrics.get_all_metrics()))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    log4rs::init_file("log4rs.yml", Default::default()).unwrap();

    let config = Config::load();
    let conn = store::open(&config.database_path)
        .unwrap_or_else(|e| panic!("failed to open {}: {}", config.database_path, e));
    let db = Arc::new(Mutex::new(conn));

    let transport = RetryTransport::new(config.retry).expect("failed to build HTTP client");
    info!("Retry transport initialized:");
    info!("  Max attempts: {}", config.retry.max_attempts);
    info!("  Base delay: {}ms", config.retry.base_delay_ms);
    info!("  Timeout: {}s", config.retry.timeout_secs);

    let metrics = Arc::new(MetricsTracker::new());
    let registry = ProviderRegistry::new()
        .register(Arc::new(MangaDexProvider::new(
            transport
                .clone()
                .with_metrics(Arc::clone(&metrics), Source::MangaDex.name()),
            config.locale.clone(),
        )) as Arc<dyn Provider>)
        .register(Arc::new(ComickProvider::new(
            transport
                .clone()
                .with_metrics(Arc::clone(&metrics), Source::Comick.name()),
        )) as Arc<dyn Provider>);

    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&db),
        registry.clone(),
        config.sync.clone(),
        Arc::clone(&metrics),
    ));
    let reader = ReaderProxy::new(
        registry.clone(),
        transport.with_metrics(Arc::clone(&metrics), "reader"),
        config.reader.handle_ttl_secs,
        Arc::clone(&metrics),
    );

    tankobon::scheduler::spawn(
        Arc::clone(&engine),
        config.sync.catalogs.clone(),
        config.sync.schedule_interval_secs,
    );

    let host = config.server.host.clone();
    let (port_start, port_end) = (config.server.port_start, config.server.port_end);
    let data = web::Data::new(AppState {
        db,
        registry,
        engine,
        reader,
        metrics,
        config,
    });

    // Try to bind to an available port in the configured range
    let mut last_err: Option<std::io::Error> = None;
    for port in port_start..=port_end {
        let data_clone = data.clone();
        let addr = format!("{}:{}", host, port);
        match HttpServer::new(move || {
            App::new()
                .app_data(data_clone.clone())
                .service(sync_status)
                .service(sync_full)
                .service(sync_incremental)
                .service(search_catalog)
                .service(get_manga)
                .service(get_chapters)
                .service(reader_page)
                .service(get_metrics)
        })
        .bind(&addr)
        {
            Ok(server) => {
                info!("Listening on {}", addr);
                return server.run().await;
            }
            Err(e) => {
                error!("Failed to bind {}: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::AddrInUse, "no free port")))
}
