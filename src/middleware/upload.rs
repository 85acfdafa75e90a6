use actix_multipart::Multipart;
use actix_web::{web::BytesMut, HttpMessage};
use futures_util::{future::LocalBoxFuture, StreamExt};
use serde_json::{Map, Value as JsonValue};

use crate::api::extract::UploadedFile;
use crate::errors::AppError;
use crate::pipeline::{BodySource, Exchange, Flow, Stage};

/// Decodes `multipart/form-data` bodies. File parts are kept in memory as
/// [`UploadedFile`]s, plain fields become string members of the body.
/// Both are bounded: files by `max_file_size`, fields by `max_field_size`.
pub struct FileUpload {
    max_file_size: usize,
    max_field_size: usize,
}

impl FileUpload {
    pub fn new(max_file_size: usize, max_field_size: usize) -> Self {
        Self {
            max_file_size,
            max_field_size,
        }
    }
}

impl Stage for FileUpload {
    fn name(&self) -> &'static str {
        "file-upload"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange) -> LocalBoxFuture<'a, Result<Flow, AppError>> {
        Box::pin(async move {
            if !exchange
                .request()
                .content_type()
                .eq_ignore_ascii_case("multipart/form-data")
            {
                return Ok(Flow::Continue);
            }

            let headers = exchange.request().headers().clone();
            let mut multipart = Multipart::new(&headers, exchange.take_payload());
            let mut fields = Map::new();
            let mut files = Vec::new();

            while let Some(item) = multipart.next().await {
                let mut field = item.map_err(|e| AppError::InvalidInput(format!("Malformed multipart body: {}", e)))?;
                let name = field.name().unwrap_or_default().to_string();
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .map(str::to_owned);
                let content_type = field.content_type().map(|mime| mime.to_string());

                let limit = if file_name.is_some() {
                    self.max_file_size
                } else {
                    self.max_field_size
                };
                let mut data = BytesMut::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk.map_err(|e| AppError::InvalidInput(format!("Malformed multipart body: {}", e)))?;
                    if data.len() + chunk.len() > limit {
                        return Err(AppError::PayloadTooLarge { limit });
                    }
                    data.extend_from_slice(&chunk);
                }

                if file_name.is_some() {
                    files.push(UploadedFile {
                        field: name,
                        file_name,
                        content_type,
                        data: data.freeze(),
                    });
                } else {
                    let value = String::from_utf8_lossy(&data).into_owned();
                    fields.insert(name, JsonValue::String(value));
                }
            }

            log::debug!(
                "request {} uploaded {} file(s) and {} field(s)",
                exchange.request_id(),
                files.len(),
                fields.len()
            );
            exchange.files_mut().extend(files);
            exchange.set_body(BodySource::Multipart, JsonValue::Object(fields));
            Ok(Flow::Continue)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::header, test::TestRequest};
    use serde_json::json;

    const BOUNDARY: &str = "XBOUNDARYX";

    fn multipart_body(photo: &str) -> String {
        multipart_body_with_title("Launch photo", photo)
    }

    fn multipart_body_with_title(title: &str, photo: &str) -> String {
        format!(
            "--{b}\r\n\
             Content-Disposition: form-data; name=\"title\"\r\n\r\n\
             {title}\r\n\
             --{b}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"photo.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n\
             {photo}\r\n\
             --{b}--\r\n",
            b = BOUNDARY,
            title = title,
            photo = photo
        )
    }

    fn upload_request(body: String) -> Exchange {
        Exchange::new(
            TestRequest::put()
                .uri("/api/v1/bootcamps/1/photo")
                .insert_header((
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                ))
                .set_payload(body)
                .to_srv_request(),
        )
    }

    #[actix_web::test]
    async fn splits_files_from_fields() {
        let mut exchange = upload_request(multipart_body("JPEGDATA"));
        FileUpload::new(1024, 1024).process(&mut exchange).await.unwrap();

        assert_eq!(exchange.body(), Some(&json!({"title": "Launch photo"})));
        let files = exchange.files_mut();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].field, "file");
        assert_eq!(files[0].file_name.as_deref(), Some("photo.jpg"));
        assert_eq!(files[0].content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(&files[0].data[..], b"JPEGDATA");
    }

    #[actix_web::test]
    async fn oversized_files_are_rejected() {
        let mut exchange = upload_request(multipart_body(&"x".repeat(64)));
        let err = FileUpload::new(16, 1024).process(&mut exchange).await.err().unwrap();
        assert!(matches!(err, AppError::PayloadTooLarge { limit: 16 }));
    }

    #[actix_web::test]
    async fn oversized_text_fields_are_rejected() {
        let title = "t".repeat(64 * 1024);
        let mut exchange = upload_request(multipart_body_with_title(&title, "JPEGDATA"));
        let err = FileUpload::new(16, 1024).process(&mut exchange).await.err().unwrap();
        assert!(matches!(err, AppError::PayloadTooLarge { limit: 1024 }));
    }

    #[actix_web::test]
    async fn other_content_types_pass_through() {
        let mut exchange = Exchange::new(TestRequest::get().to_srv_request());
        FileUpload::new(16, 16).process(&mut exchange).await.unwrap();
        assert!(exchange.body().is_none());
        assert!(exchange.files_mut().is_empty());
    }
}
