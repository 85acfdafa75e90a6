use std::io;
use std::path::{Path, PathBuf};

use actix_files::NamedFile;
use actix_web::http::Method;
use futures_util::future::LocalBoxFuture;
use percent_encoding::percent_decode_str;

use crate::errors::AppError;
use crate::pipeline::{Exchange, Flow, Stage};

const INDEX_FILE: &str = "index.html";

/// Serves files below `root` for `GET`/`HEAD` requests whose path names one.
/// Anything else, including dotfiles and unresolvable paths, falls through
/// to the route table.
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Maps a request path onto the file system, or `None` when it must not
    /// be served from there.
    fn candidate(&self, request_path: &str) -> Option<PathBuf> {
        let mut path = self.root.clone();
        for segment in request_path.split('/').filter(|s| !s.is_empty()) {
            let decoded = percent_decode_str(segment).decode_utf8().ok()?;
            if decoded.starts_with('.') || decoded.contains(['/', '\\', '\0']) {
                return None;
            }
            path.push(&*decoded);
        }
        Some(path)
    }
}

async fn resolve_file(path: &Path) -> io::Result<Option<PathBuf>> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    if metadata.is_file() {
        return Ok(Some(path.to_path_buf()));
    }
    if metadata.is_dir() {
        let index = path.join(INDEX_FILE);
        return match tokio::fs::metadata(&index).await {
            Ok(m) if m.is_file() => Ok(Some(index)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        };
    }
    Ok(None)
}

impl Stage for StaticFiles {
    fn name(&self) -> &'static str {
        "static"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange) -> LocalBoxFuture<'a, Result<Flow, AppError>> {
        Box::pin(async move {
            let method = exchange.request().method();
            if method != Method::GET && method != Method::HEAD {
                return Ok(Flow::Continue);
            }

            let Some(candidate) = self.candidate(exchange.path()) else {
                return Ok(Flow::Continue);
            };

            let file = match resolve_file(&candidate).await {
                Ok(Some(file)) => file,
                Ok(None) => return Ok(Flow::Continue),
                Err(e) => {
                    log::error!("failed to stat {}: {}", candidate.display(), e);
                    return Err(AppError::Internal);
                }
            };

            let named = NamedFile::open_async(&file).await.map_err(|e| {
                log::error!("failed to open {}: {}", file.display(), e);
                AppError::Internal
            })?;
            Ok(Flow::Respond(named.into_response(exchange.request().request())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{body::to_bytes, http::StatusCode, test::TestRequest};

    fn public_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>DevCamper</h1>").unwrap();
        std::fs::create_dir(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("uploads").join("photo 1.jpg"), "JPEG").unwrap();
        std::fs::write(dir.path().join(".env"), "SECRET=1").unwrap();
        dir
    }

    async fn run(stage: &StaticFiles, req: TestRequest) -> Flow {
        let mut exchange = Exchange::new(req.to_srv_request());
        stage.process(&mut exchange).await.unwrap()
    }

    #[actix_web::test]
    async fn serves_existing_files() {
        let dir = public_dir();
        let stage = StaticFiles::new(dir.path());

        match run(&stage, TestRequest::get().uri("/uploads/photo%201.jpg")).await {
            Flow::Respond(res) => {
                assert_eq!(res.status(), StatusCode::OK);
                assert_eq!(to_bytes(res.into_body()).await.unwrap(), "JPEG");
            }
            Flow::Continue => panic!("file was not served"),
        }
    }

    #[actix_web::test]
    async fn serves_index_for_the_root() {
        let dir = public_dir();
        let stage = StaticFiles::new(dir.path());
        assert!(matches!(run(&stage, TestRequest::get().uri("/")).await, Flow::Respond(_)));
    }

    #[actix_web::test]
    async fn falls_through_for_everything_else() {
        let dir = public_dir();
        let stage = StaticFiles::new(dir.path());

        for uri in ["/api/v1/bootcamps", "/.env", "/uploads/../.env", "/uploads/%2e%2e/.env", "/uploads"] {
            assert!(
                matches!(run(&stage, TestRequest::get().uri(uri)).await, Flow::Continue),
                "{} should fall through",
                uri
            );
        }
        assert!(matches!(
            run(&stage, TestRequest::post().uri("/uploads/photo%201.jpg")).await,
            Flow::Continue
        ));
    }

    #[actix_web::test]
    async fn missing_root_falls_through() {
        let stage = StaticFiles::new("/definitely/not/here");
        assert!(matches!(run(&stage, TestRequest::get().uri("/index.html")).await, Flow::Continue));
    }
}
