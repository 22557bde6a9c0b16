use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};
use http::{
    HeaderValue,
    header::{CONTENT_SECURITY_POLICY, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS},
};
use std::{path::PathBuf, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    services::{ServeDir, ServeFile},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::handlers;
use crate::storage::Storage;
use crate::upload::UploadConstraints;

/// Served with every response unless the inner service already set one.
const CONTENT_SECURITY_POLICY_VALUE: &str = "default-src 'self'; base-uri 'self'; \
    font-src 'self' https: data:; form-action 'self'; frame-ancestors 'self'; \
    img-src 'self' data:; object-src 'none'; script-src 'self'; script-src-attr 'none'; \
    style-src 'self' https: 'unsafe-inline'; upgrade-insecure-requests";

/// Everything a request handler may touch. Built once at startup, never mutated.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub constraints: Arc<UploadConstraints>,
}

impl AppState {
    pub fn new(storage: Arc<dyn Storage>, constraints: UploadConstraints) -> Self {
        Self {
            storage,
            constraints: Arc::new(constraints),
        }
    }
}

/// Filesystem content exposed next to the API.
#[derive(Debug, Clone, Default)]
pub struct Assets {
    /// Directory served under `/static`; its `index_page` is served at `/`.
    pub static_dir: Option<PathBuf>,
    pub index_page: String,
    /// Additional paths that serve the index page.
    pub index_aliases: Vec<String>,
    /// URL prefix and directory of locally stored uploads.
    pub uploads: Option<(String, PathBuf)>,
}

pub fn router(state: AppState, assets: &Assets) -> Router {
    let mut app = Router::new()
        .route("/api/upload", post(handlers::upload))
        .route("/api/files", get(handlers::list_files))
        .route("/api/delete/{*public_id}", delete(handlers::delete_file))
        // Size limits are enforced per part while streaming.
        .layer(DefaultBodyLimit::disable());

    if let Some(dir) = &assets.static_dir {
        let index = dir.join(&assets.index_page);
        app = app
            .route_service("/", ServeFile::new(&index))
            .nest_service("/static", ServeDir::new(dir));
        for alias in &assets.index_aliases {
            app = app.route_service(alias, ServeFile::new(&index));
        }
    }
    if let Some((prefix, dir)) = &assets.uploads {
        app = app.nest_service(prefix, ServeDir::new(dir));
    }

    app.fallback(handlers::route_not_found)
        .method_not_allowed_fallback(handlers::route_not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::if_not_present(
                    X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    X_FRAME_OPTIONS,
                    HeaderValue::from_static("SAMEORIGIN"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    REFERRER_POLICY,
                    HeaderValue::from_static("no-referrer"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    CONTENT_SECURITY_POLICY,
                    HeaderValue::from_static(CONTENT_SECURITY_POLICY_VALUE),
                ))
                .layer(CatchPanicLayer::custom(handlers::handle_panic)),
        )
        .with_state(state)
}
