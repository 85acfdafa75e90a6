use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use actix_web::{
    body::to_bytes,
    http::{header, Method, StatusCode},
    test, web, HttpRequest, HttpResponse,
};
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};

use devcamper::api::extract::{Cookies, RequestBody};
use devcamper::api::{Resource, RouteTable};
use devcamper::app_state::{create_app, AppContext, AppState};
use devcamper::config::Config;
use devcamper::middleware::build_pipeline;
use devcamper::supervisor::Supervisor;

fn context(config: Config, routes: RouteTable) -> AppContext {
    let supervisor = Supervisor::new();
    AppContext {
        pipeline: build_pipeline(&config),
        state: web::Data::new(AppState {
            db: DatabaseConnection::default(),
            config,
        }),
        routes: Arc::new(routes),
        faults: supervisor.reporter(),
    }
}

fn bootcamps(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "",
        web::post().to(|body: RequestBody| async move { HttpResponse::Created().json(body.0) }),
    )
    .route(
        "",
        web::get().to(|req: HttpRequest| async move {
            HttpResponse::Ok().body(req.query_string().to_string())
        }),
    );
}

fn auth(cfg: &mut web::ServiceConfig) {
    cfg.route(
        "/me",
        web::get().to(|cookies: Cookies| async move {
            HttpResponse::Ok().body(cookies.get("token").unwrap_or("none").to_string())
        }),
    );
}

async fn crash() -> HttpResponse {
    panic!("review index corrupted");
}

fn reviews(cfg: &mut web::ServiceConfig) {
    cfg.route("/crash", web::get().to(crash));
}

fn routes() -> RouteTable {
    RouteTable::unmounted()
        .mount(Resource::Bootcamps, bootcamps)
        .mount(Resource::Auth, auth)
        .mount(Resource::Reviews, reviews)
}

#[actix_web::test]
async fn requests_reach_only_the_matching_group() {
    let app = test::init_service(create_app(&context(Config::default(), routes()))).await;

    let res = test::call_service(&app, test::TestRequest::get().uri("/api/v1/bootcamps").to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = test::call_service(&app, test::TestRequest::get().uri("/api/v1/courses/5").to_request()).await;
    assert_eq!(res.status(), StatusCode::NOT_IMPLEMENTED);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["code"], "NOT_IMPLEMENTED");

    let res = test::call_service(&app, test::TestRequest::get().uri("/api/v1/bootcampsx").to_request()).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn handlers_see_a_sanitized_escaped_body() {
    let app = test::init_service(create_app(&context(Config::default(), routes()))).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/bootcamps")
        .set_json(json!({
            "name": "Devworks",
            "description": "<script>alert(1)</script>",
            "$where": "sleep(1000)",
            "address.city": "Boston",
            "careers": { "$gt": "", "primary": "Web Development" }
        }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let body: Value = test::read_body_json(res).await;
    assert_eq!(
        body,
        json!({
            "name": "Devworks",
            "description": "&lt;script>alert(1)&lt;/script>",
            "careers": { "primary": "Web Development" }
        })
    );
}

#[actix_web::test]
async fn repeated_query_parameters_collapse_to_the_last() {
    let app = test::init_service(create_app(&context(Config::default(), routes()))).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/bootcamps?sort=name&sort=-createdAt")
        .to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, "sort=-createdAt");
}

#[actix_web::test]
async fn cookies_are_parsed_for_handlers() {
    let app = test::init_service(create_app(&context(Config::default(), routes()))).await;

    let req = test::TestRequest::get()
        .uri("/api/v1/auth/me")
        .insert_header((header::COOKIE, "theme=dark; token=abc123"))
        .to_request();
    let body = test::call_and_read_body(&app, req).await;
    assert_eq!(body, "abc123");
}

#[actix_web::test]
async fn oversized_json_is_rejected_before_routing() {
    let config = Config {
        json_limit: 1024,
        ..Config::default()
    };
    let app = test::init_service(create_app(&context(config, routes()))).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/bootcamps")
        .set_json(json!({ "description": "x".repeat(4096) }))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");
}

#[actix_web::test]
async fn the_twenty_sixth_request_is_limited_before_handlers_run() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let routes = RouteTable::unmounted().mount(Resource::Courses, move |cfg: &mut web::ServiceConfig| {
        let counter = Arc::clone(&counter);
        cfg.route(
            "",
            web::get().to(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    HttpResponse::Ok().finish()
                }
            }),
        );
    });
    let app = test::init_service(create_app(&context(Config::default(), routes))).await;

    for _ in 0..25 {
        let res = test::call_service(&app, test::TestRequest::get().uri("/api/v1/courses").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = test::call_service(&app, test::TestRequest::get().uri("/api/v1/courses").to_request()).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().contains_key(header::RETRY_AFTER));
    assert_eq!(res.headers().get("x-ratelimit-remaining").unwrap(), "0");
    assert_eq!(hits.load(Ordering::SeqCst), 25);
}

#[actix_web::test]
async fn static_files_are_served_without_reaching_the_routers() {
    let public = tempfile::tempdir().unwrap();
    std::fs::write(public.path().join("index.html"), "<h1>DevCamper API</h1>").unwrap();
    std::fs::create_dir(public.path().join("uploads")).unwrap();
    std::fs::write(public.path().join("uploads").join("photo.txt"), "bootcamp photo").unwrap();

    let config = Config {
        public_dir: public.path().to_path_buf(),
        ..Config::default()
    };
    let app = test::init_service(create_app(&context(config, routes()))).await;

    let res = test::call_service(&app, test::TestRequest::get().uri("/uploads/photo.txt").to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(test::read_body(res).await, "bootcamp photo");

    let body = test::call_and_read_body(&app, test::TestRequest::get().uri("/").to_request()).await;
    assert_eq!(body, "<h1>DevCamper API</h1>");

    let res = test::call_service(&app, test::TestRequest::get().uri("/uploads/../../etc/passwd").to_request()).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn unknown_routes_get_the_error_envelope_with_every_header() {
    let app = test::init_service(create_app(&context(Config::default(), routes()))).await;

    let req = test::TestRequest::get()
        .uri("/nowhere")
        .insert_header((header::ORIGIN, "https://devcamper.io"))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let headers = res.headers();
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    assert_eq!(headers.get(header::X_FRAME_OPTIONS).unwrap(), "SAMEORIGIN");
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "25");
    assert!(!headers.contains_key(header::CONTENT_SECURITY_POLICY));

    let body: Value = test::read_body_json(res).await;
    assert_eq!(body["code"], "NOT_FOUND");
    assert!(body["message"].as_str().unwrap().contains("/nowhere"));
    assert!(body["trace_id"].is_string());
}

#[actix_web::test]
async fn preflight_is_answered_without_a_route() {
    let app = test::init_service(create_app(&context(Config::default(), routes()))).await;

    let req = test::TestRequest::default()
        .method(Method::OPTIONS)
        .uri("/api/v1/reviews")
        .insert_header((header::ORIGIN, "https://devcamper.io"))
        .insert_header((header::ACCESS_CONTROL_REQUEST_METHOD, "DELETE"))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        res.headers().get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
        "GET,HEAD,PUT,PATCH,POST,DELETE"
    );
}

#[actix_web::test]
async fn bare_options_is_answered_without_a_route() {
    let app = test::init_service(create_app(&context(Config::default(), routes()))).await;

    let req = test::TestRequest::default()
        .method(Method::OPTIONS)
        .uri("/api/v1/bootcamps")
        .insert_header((header::ORIGIN, "https://devcamper.io"))
        .to_request();
    let res = test::call_service(&app, req).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
}

#[actix_web::test]
async fn routed_requests_keep_the_app_serving() {
    let app = test::init_service(create_app(&context(Config::default(), routes()))).await;

    for _ in 0..3 {
        let res = test::call_service(&app, test::TestRequest::get().uri("/api/v1/bootcamps?page=2").to_request()).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}

#[actix_web::test]
async fn a_panicking_handler_answers_500_with_trace_and_headers() {
    let app = test::init_service(create_app(&context(Config::default(), routes()))).await;

    let req = test::TestRequest::get().uri("/api/v1/reviews/crash").to_request();
    let err = match test::try_call_service(&app, req).await {
        Ok(res) => panic!("expected a failure, got {}", res.status()),
        Err(err) => err,
    };
    let res = err.error_response();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.headers().get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
    assert_eq!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");

    let body: Value = serde_json::from_slice(&to_bytes(res.into_body()).await.unwrap()).unwrap();
    assert_eq!(body["code"], "INTERNAL");
    assert!(body["trace_id"].is_string());
}
