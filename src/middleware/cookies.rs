use actix_web::{cookie::Cookie, http::header};
use futures_util::future::LocalBoxFuture;

use crate::errors::AppError;
use crate::pipeline::{Exchange, Flow, Stage};

/// Parses every `Cookie` header into name/value pairs. Pairs that do not
/// parse are skipped; the first occurrence of a name wins.
pub struct CookieParser;

impl Stage for CookieParser {
    fn name(&self) -> &'static str {
        "cookie-parser"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange) -> LocalBoxFuture<'a, Result<Flow, AppError>> {
        let raw: Vec<String> = exchange
            .request()
            .headers()
            .get_all(header::COOKIE)
            .filter_map(|value| value.to_str().ok())
            .map(str::to_owned)
            .collect();

        let cookies = exchange.cookies_mut();
        for pair in raw.iter().flat_map(|value| value.split(';')) {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            if let Ok(cookie) = Cookie::parse_encoded(pair) {
                cookies
                    .entry(cookie.name().to_string())
                    .or_insert_with(|| cookie.value().to_string());
            }
        }

        Box::pin(async { Ok(Flow::Continue) })
    }
}
