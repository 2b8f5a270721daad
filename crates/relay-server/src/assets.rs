//! Compiled front-end: `/assets/*`, a few root files and the SPA fallback.

use std::path::Path;

use axum::Router;
use tower_http::services::{ServeDir, ServeFile};
use tracing::warn;

/// Root-level files served verbatim when present.
const ROOT_FILES: [&str; 2] = ["favicon.ico", "manifest.webmanifest"];

/// Mount static routes from `static_dir` onto `router`.
///
/// Unmatched paths serve `index.html`, or 404 when the build is missing.
pub fn mount<S>(router: Router<S>, static_dir: &Path) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    if !static_dir.join("index.html").is_file() {
        warn!(dir = %static_dir.display(), "index.html not found, front-end routes will 404");
    }

    let mut router = router.nest_service("/assets", ServeDir::new(static_dir.join("assets")));
    for name in ROOT_FILES {
        router = router.route_service(&format!("/{name}"), ServeFile::new(static_dir.join(name)));
    }
    router.fallback_service(ServeFile::new(static_dir.join("index.html")))
}
