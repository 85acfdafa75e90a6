//! Request state published by the pipeline for route groups.
//!
//! Every value is inserted into the request extensions when the pipeline
//! commits, so extraction only fails when a handler is mounted outside it.

use std::collections::HashMap;

use actix_web::{dev::Payload, web::Bytes, FromRequest, HttpMessage, HttpRequest};
use futures_util::future::{ready, Ready};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// The sanitized structured body. `{}` when the request carried none.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestBody(pub JsonValue);

impl RequestBody {
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        Ok(serde_json::from_value(self.0.clone())?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies(pub HashMap<String, String>);

impl Cookies {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadedFiles(pub Vec<UploadedFile>);

impl UploadedFiles {
    /// First file uploaded under `field`.
    pub fn get(&self, field: &str) -> Option<&UploadedFile> {
        self.0.iter().find(|file| file.field == field)
    }
}

/// Every value of a query key that was collapsed to its last occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollutedQuery(pub HashMap<String, Vec<String>>);

fn from_extensions<T: Clone + 'static>(req: &HttpRequest) -> Ready<Result<T, AppError>> {
    ready(req.extensions().get::<T>().cloned().ok_or_else(|| {
        log::error!(
            "{} requested on {} outside the request pipeline",
            std::any::type_name::<T>(),
            req.path()
        );
        AppError::Internal
    }))
}

macro_rules! impl_from_extensions {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl FromRequest for $ty {
                type Error = AppError;
                type Future = Ready<Result<Self, Self::Error>>;

                fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
                    from_extensions::<Self>(req)
                }
            }
        )+
    };
}

impl_from_extensions!(RequestId, RequestBody, Cookies, UploadedFiles, PollutedQuery);
