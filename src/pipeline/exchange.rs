use std::collections::HashMap;

use actix_web::{
    dev::{Payload, ServiceRequest},
    http::header::{self, HeaderMap, HeaderName, HeaderValue},
    web::Bytes,
    HttpMessage,
};
use serde_json::Value as JsonValue;
use url::form_urlencoded;
use uuid::Uuid;

use crate::api::extract::{Cookies, PollutedQuery, RequestBody, RequestId, UploadedFile, UploadedFiles};
use crate::errors::AppError;

/// Where the structured body came from. Only JSON bodies are written back
/// into the payload; multipart payloads are consumed by the upload stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySource {
    Json,
    Multipart,
}

/// An in-flight request together with everything the stages have parsed out
/// of it so far.
pub struct Exchange {
    req: ServiceRequest,
    request_id: String,
    body: Option<(BodySource, JsonValue)>,
    query: Vec<(String, String)>,
    query_dirty: bool,
    cookies: HashMap<String, String>,
    files: Vec<UploadedFile>,
    polluted: HashMap<String, Vec<String>>,
    response_headers: HeaderMap,
}

impl Exchange {
    pub fn new(req: ServiceRequest) -> Self {
        let query = form_urlencoded::parse(req.query_string().as_bytes())
            .into_owned()
            .collect();
        Self {
            req,
            request_id: Uuid::new_v4().to_string(),
            body: None,
            query,
            query_dirty: false,
            cookies: HashMap::new(),
            files: Vec::new(),
            polluted: HashMap::new(),
            response_headers: HeaderMap::new(),
        }
    }

    pub fn request(&self) -> &ServiceRequest {
        &self.req
    }

    pub fn request_mut(&mut self) -> &mut ServiceRequest {
        &mut self.req
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn path(&self) -> &str {
        self.req.path()
    }

    /// Identity used for per-client accounting: the peer IP.
    pub fn client_key(&self) -> String {
        self.req
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn take_payload(&mut self) -> Payload {
        self.req.take_payload()
    }

    pub fn body(&self) -> Option<&JsonValue> {
        self.body.as_ref().map(|(_, value)| value)
    }

    pub fn body_mut(&mut self) -> Option<&mut JsonValue> {
        self.body.as_mut().map(|(_, value)| value)
    }

    pub fn set_body(&mut self, source: BodySource, value: JsonValue) {
        self.body = Some((source, value));
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Mutable access marks the query string for rewriting on commit.
    pub fn query_mut(&mut self) -> &mut Vec<(String, String)> {
        self.query_dirty = true;
        &mut self.query
    }

    pub fn cookies_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.cookies
    }

    pub fn files_mut(&mut self) -> &mut Vec<UploadedFile> {
        &mut self.files
    }

    pub fn polluted_mut(&mut self) -> &mut HashMap<String, Vec<String>> {
        &mut self.polluted
    }

    /// Queues a header for whatever response finally leaves the pipeline.
    pub fn queue_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.append(name, value);
    }

    pub fn queued_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Writes the parsed state back into the request and returns it with the
    /// queued response headers.
    pub fn commit(self) -> Result<(ServiceRequest, HeaderMap), AppError> {
        let Exchange {
            mut req,
            request_id,
            body,
            query,
            query_dirty,
            cookies,
            files,
            polluted,
            response_headers,
        } = self;

        if query_dirty {
            rewrite_query(&mut req, &query)?;
        }

        let body = match body {
            Some((BodySource::Json, value)) => {
                let bytes = Bytes::from(serde_json::to_vec(&value)?);
                req.headers_mut()
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                req.set_payload(Payload::from(bytes));
                value
            }
            Some((BodySource::Multipart, value)) => value,
            None => JsonValue::Object(Default::default()),
        };

        {
            let mut extensions = req.extensions_mut();
            extensions.insert(RequestId(request_id));
            extensions.insert(RequestBody(body));
            extensions.insert(Cookies(cookies));
            extensions.insert(UploadedFiles(files));
            extensions.insert(PollutedQuery(polluted));
        }

        Ok((req, response_headers))
    }
}

fn rewrite_query(req: &mut ServiceRequest, query: &[(String, String)]) -> Result<(), AppError> {
    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter())
        .finish();

    let uri = req.uri().clone();
    let mut parts = uri.into_parts();
    let path = parts
        .path_and_query
        .as_ref()
        .map(|pq| pq.path().to_owned())
        .unwrap_or_else(|| "/".to_owned());
    let path_and_query = if encoded.is_empty() {
        path
    } else {
        format!("{}?{}", path, encoded)
    };
    parts.path_and_query = Some(
        path_and_query
            .parse()
            .map_err(|_| AppError::InvalidInput("Malformed query string".to_string()))?,
    );
    let uri = actix_web::http::Uri::from_parts(parts)
        .map_err(|_| AppError::InvalidInput("Malformed request uri".to_string()))?;

    req.match_info_mut().get_mut().update(&uri);
    req.head_mut().uri = uri;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn query_is_parsed_into_pairs() {
        let exchange = Exchange::new(TestRequest::with_uri("/x?a=1&b=two%20words&a=3").to_srv_request());
        assert_eq!(
            exchange.query(),
            &[
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two words".to_string()),
                ("a".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn untouched_query_is_not_rewritten() {
        let exchange = Exchange::new(TestRequest::with_uri("/x?a=%41").to_srv_request());
        let (req, _) = exchange.commit().unwrap();
        assert_eq!(req.query_string(), "a=%41");
    }

    #[test]
    fn rewritten_query_replaces_the_uri() {
        let mut exchange = Exchange::new(TestRequest::with_uri("/x/y?a=1&b=2").to_srv_request());
        exchange.query_mut().retain(|(k, _)| k != "a");
        let (req, _) = exchange.commit().unwrap();
        assert_eq!(req.path(), "/x/y");
        assert_eq!(req.query_string(), "b=2");
    }

    #[test]
    fn emptied_query_drops_the_question_mark() {
        let mut exchange = Exchange::new(TestRequest::with_uri("/x?a=1").to_srv_request());
        exchange.query_mut().clear();
        let (req, _) = exchange.commit().unwrap();
        assert_eq!(req.uri().to_string(), "/x");
    }

    #[test]
    fn commit_publishes_extensions() {
        let mut exchange = Exchange::new(TestRequest::default().to_srv_request());
        exchange.cookies_mut().insert("token".into(), "abc".into());
        let id = exchange.request_id().to_string();
        let (req, _) = exchange.commit().unwrap();

        let extensions = req.extensions();
        assert_eq!(extensions.get::<RequestId>().unwrap().0, id);
        assert_eq!(extensions.get::<Cookies>().unwrap().get("token"), Some("abc"));
        assert_eq!(extensions.get::<RequestBody>().unwrap().0, serde_json::json!({}));
    }
}
