//! Stages of the request pipeline, and the fixed order they run in.

pub mod body;
pub mod cookies;
pub mod cors;
pub mod hpp;
pub mod logger;
pub mod rate_limit;
pub mod sanitize;
pub mod security_headers;
pub mod static_files;
pub mod upload;
pub mod xss;

use std::sync::Arc;

use crate::config::Config;
use crate::pipeline::Pipeline;

pub use body::JsonBody;
pub use cookies::CookieParser;
pub use cors::Cors;
pub use hpp::ParameterPollution;
pub use logger::DevLogger;
pub use rate_limit::RateLimit;
pub use sanitize::OperatorSanitizer;
pub use security_headers::SecurityHeaders;
pub use static_files::StaticFiles;
pub use upload::FileUpload;
pub use xss::XssClean;

/// Assembles the request pipeline. Order matters: later stages see what
/// earlier ones parsed, and a rejection skips everything after it.
pub fn build_pipeline(config: &Config) -> Arc<Pipeline> {
    Pipeline::builder()
        .stage(JsonBody::new(config.json_limit))
        .stage(CookieParser)
        .stage_if(config.is_development(), DevLogger)
        .stage(FileUpload::new(config.max_file_upload, config.max_field_size))
        .stage(OperatorSanitizer)
        .stage(SecurityHeaders::new())
        .stage(XssClean)
        .stage(RateLimit::new(config.rate_limit_max, config.rate_limit_window()))
        .stage(ParameterPollution)
        .stage(Cors)
        .stage(StaticFiles::new(config.public_dir.clone()))
        .build()
}
