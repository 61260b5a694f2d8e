//! End-to-end behavior of a built service, driven through `App::handle`
//! without a socket.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use courier::middleware::cors::{Cors, CorsOptions};
use courier::{
    handler_fn, App, Attrs, Config, ContentType, Context, CorrelationId, Encoder, Entity, Error,
    Handler, IdGenerator, Pipeline, Response, Scope, Service, StatusError, BoxFuture, X_REQUEST_ID,
};
use http::{header, HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use serde_json::{json, Value};

type Trail = Arc<Mutex<Vec<&'static str>>>;

fn mark(trail: &Trail, name: &'static str) -> impl Handler {
    let trail = Arc::clone(trail);
    handler_fn(move |rsp, ctx, next| {
        trail.lock().unwrap().push(name);
        Box::pin(async move { next.dispatch(rsp, ctx).await })
    })
}

fn reply(value: Value) -> impl Handler {
    handler_fn(move |_rsp, _ctx, _next| {
        let value = value.clone();
        Box::pin(async move { Ok(Some(Entity::json(value))) })
    })
}

fn request(method: Method, uri: &str) -> http::request::Builder {
    http::Request::builder().method(method).uri(uri)
}

async fn send(app: &App, req: http::request::Builder, body: &'static str) -> http::Response<Bytes> {
    let req = req.body(Full::new(Bytes::from_static(body.as_bytes()))).unwrap();
    let peer: SocketAddr = "10.0.0.9:41000".parse().unwrap();
    let (head, body) = app.handle(req, Some(peer)).await.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    http::Response::from_parts(head, body)
}

fn json_of(rsp: &http::Response<Bytes>) -> Value {
    serde_json::from_slice(rsp.body()).unwrap()
}

#[tokio::test]
async fn every_response_carries_a_time_ordered_request_id() {
    let app = Service::new(Config::default())
        .route(Method::GET, "/ok", reply(json!("ok")))
        .route(Method::GET, "/fail", handler_fn(|_rsp, _ctx, _next| Box::pin(async {
            Err(Error::opaque("boom"))
        })))
        .build();

    let mut seen = Vec::new();
    for uri in ["/ok", "/fail", "/missing"] {
        let rsp = send(&app, request(Method::GET, uri), "").await;
        let id: CorrelationId = rsp.headers()[X_REQUEST_ID].to_str().unwrap().parse().unwrap();
        assert_eq!(id.version(), 1);
        seen.push(id);
    }
    seen.dedup();
    assert_eq!(seen.len(), 3);
}

#[tokio::test]
async fn unknown_routes_are_404_in_json_or_html() {
    let app = Service::new(Config::default()).build();

    let rsp = send(&app, request(Method::GET, "/nowhere"), "").await;
    assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
    assert_eq!(rsp.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(json_of(&rsp), json!({"status": 404, "message": "No route for GET /nowhere"}));

    let browser = request(Method::GET, "/nowhere").header(header::ACCEPT, "text/html,*/*;q=0.8");
    let rsp = send(&app, browser, "").await;
    assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
    assert_eq!(rsp.headers()[header::CONTENT_TYPE], ContentType::Html.as_str());
    let page = std::str::from_utf8(rsp.body()).unwrap();
    assert!(page.contains("<h1>404 Not Found</h1>"));
    assert!(page.contains("No route for GET /nowhere"));
}

#[tokio::test]
async fn wildcard_accept_keeps_json() {
    let app = Service::new(Config::default()).build();
    let rsp = send(&app, request(Method::GET, "/x").header(header::ACCEPT, "*/*"), "").await;
    assert_eq!(rsp.headers()[header::CONTENT_TYPE], "application/json");
}

#[tokio::test]
async fn preflight_is_answered_before_routing() {
    let app = Service::new(Config::default())
        .with(Cors::new(CorsOptions {
            allowed_origins: vec!["https://*.example.com".into()],
            allowed_methods: vec!["GET".into(), "DELETE".into()],
            max_age: 600,
            ..CorsOptions::default()
        }))
        .route(Method::DELETE, "/users/{id}", reply(json!(null)))
        .build();

    let preflight = request(Method::OPTIONS, "/users/7")
        .header(header::ORIGIN, "https://app.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "delete")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type");
    let rsp = send(&app, preflight, "").await;

    assert_eq!(rsp.status(), StatusCode::OK);
    assert!(rsp.body().is_empty());
    let vary: Vec<&str> = rsp.headers().get_all(header::VARY).iter().map(|v| v.to_str().unwrap()).collect();
    assert_eq!(vary, ["Origin", "Access-Control-Request-Method", "Access-Control-Request-Headers"]);
    assert_eq!(rsp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://app.example.com");
    assert_eq!(rsp.headers()[header::ACCESS_CONTROL_ALLOW_METHODS], "DELETE");
    assert_eq!(rsp.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
    assert_eq!(rsp.headers()[header::ACCESS_CONTROL_MAX_AGE], "600");
    assert!(rsp.headers().contains_key(X_REQUEST_ID));
}

#[tokio::test]
async fn rejected_origins_never_reach_the_route() {
    let trail = Trail::default();
    let app = Service::new(Config::default())
        .with(Cors::new(CorsOptions {
            allowed_origins: vec!["https://app.example.com".into()],
            ..CorsOptions::default()
        }))
        .with(mark(&trail, "after-cors"))
        .route(Method::GET, "/", reply(json!("hi")))
        .build();

    let rsp = send(&app, request(Method::GET, "/").header(header::ORIGIN, "https://evil.test"), "").await;
    assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&rsp)["message"], "Origin is not permitted: https://evil.test");
    assert_eq!(rsp.headers()[header::VARY], "Origin");
    assert!(trail.lock().unwrap().is_empty());

    let rsp = send(&app, request(Method::GET, "/").header(header::ORIGIN, "https://APP.example.com"), "").await;
    assert_eq!(rsp.status(), StatusCode::OK);
    assert_eq!(rsp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://APP.example.com");
    assert_eq!(*trail.lock().unwrap(), ["after-cors"]);
}

#[tokio::test]
async fn finalized_requests_keep_the_handlers_own_response() {
    let app = Service::new(Config::default())
        .route(Method::GET, "/raw", handler_fn(|rsp, ctx, _next| Box::pin(async move {
            rsp.set_status(StatusCode::ACCEPTED);
            rsp.write(ContentType::Text, "queued");
            ctx.finalize();
            Err(Error::opaque("ignored once finalized"))
        })))
        .build();

    let rsp = send(&app, request(Method::GET, "/raw"), "").await;
    assert_eq!(rsp.status(), StatusCode::ACCEPTED);
    assert_eq!(rsp.body().as_ref(), b"queued");
    assert_eq!(rsp.headers()[header::CONTENT_TYPE], ContentType::Text.as_str());
    let id: CorrelationId = rsp.headers()[X_REQUEST_ID].to_str().unwrap().parse().unwrap();
    assert_eq!(id.version(), 1);
}

#[tokio::test]
async fn route_attrs_and_params_reach_the_handler() {
    let mut attrs = Attrs::new();
    attrs.insert("role".into(), json!("admin"));

    let echo = handler_fn(|_rsp, ctx, _next| Box::pin(async move {
        Ok(Some(Entity::json(json!({
            "id": ctx.param("id"),
            "role": ctx.attr("role"),
            "remote": ctx.remote_addr(),
        }))))
    }));
    let app = Service::new(Config::default())
        .mount(Scope::new("/users/").route_with(Method::GET, "/{id}", echo, attrs))
        .build();

    let rsp = send(&app, request(Method::GET, "/users/42"), "").await;
    assert_eq!(json_of(&rsp), json!({"id": "42", "role": "admin", "remote": "10.0.0.9:41000"}));

    let proxied = request(Method::GET, "/users/43").header("x-forwarded-for", "203.0.113.5");
    let rsp = send(&app, proxied, "").await;
    assert_eq!(json_of(&rsp)["remote"], "203.0.113.5");
}

#[tokio::test]
async fn service_stages_run_before_scope_stages() {
    let trail = Trail::default();
    let scope = Scope::new("/api")
        .route(Method::GET, "/a", mark(&trail, "a"))
        .with(mark(&trail, "scope"));
    let app = Service::new(Config::default())
        .with(mark(&trail, "service"))
        .mount(scope)
        .build();

    let rsp = send(&app, request(Method::GET, "/api/a"), "").await;
    // `mark` on the route forwards to an empty tail.
    assert_eq!(rsp.status(), StatusCode::OK);
    assert!(rsp.body().is_empty());
    assert_eq!(*trail.lock().unwrap(), ["service", "scope", "a"]);
}

#[tokio::test]
async fn appended_pipelines_are_spliced_not_nested() {
    let trail = Trail::default();
    let group = Pipeline::new().add(mark(&trail, "one")).add(mark(&trail, "two"));
    let app = Service::new(Config::default())
        .with(group)
        .with(mark(&trail, "three"))
        .route(Method::GET, "/", reply(json!("done")))
        .build();

    let rsp = send(&app, request(Method::GET, "/"), "").await;
    assert_eq!(json_of(&rsp), json!("done"));
    assert_eq!(*trail.lock().unwrap(), ["one", "two", "three"]);
}

#[tokio::test]
async fn request_entities_are_decoded_as_json() {
    #[derive(serde::Deserialize)]
    struct NewUser {
        name: String,
    }
    let create = handler_fn(|_rsp, ctx, _next| Box::pin(async move {
        let user: NewUser = ctx.json()?;
        Ok(Some(Entity::json(json!({ "created": user.name }))))
    }));
    let app = Service::new(Config::default()).route(Method::POST, "/users", create).build();

    let rsp = send(&app, request(Method::POST, "/users"), r#"{"name":"alice"}"#).await;
    assert_eq!(json_of(&rsp), json!({"created": "alice"}));

    let rsp = send(&app, request(Method::POST, "/users"), "{nope").await;
    assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
    let message = json_of(&rsp)["message"].as_str().unwrap().to_owned();
    assert!(message.starts_with("Could not unmarshal request entity"), "{message}");
}

#[tokio::test]
async fn structured_error_headers_reach_the_client() {
    let app = Service::new(Config::default().user_agent("courier-tests/1"))
        .route(Method::GET, "/busy", handler_fn(|_rsp, _ctx, _next| Box::pin(async {
            Err(Error::from(
                StatusError::msg(StatusCode::SERVICE_UNAVAILABLE, "try later")
                    .with_header(header::RETRY_AFTER, HeaderValue::from_static("5")),
            ))
        })))
        .build();

    let rsp = send(&app, request(Method::GET, "/busy"), "").await;
    assert_eq!(rsp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(rsp.headers()[header::RETRY_AFTER], "5");
    assert_eq!(rsp.headers()[header::USER_AGENT], "courier-tests/1");
    assert_eq!(json_of(&rsp), json!({"status": 503, "message": "try later"}));
}

#[tokio::test]
async fn routes_are_listed_in_registration_order() {
    let service = Service::new(Config::default())
        .route(Method::GET, "/health", reply(json!("ok")))
        .mount(
            Scope::new("/users")
                .route(Method::GET, "/{id}", reply(json!(null)))
                .route(Method::POST, "", reply(json!(null))),
        );

    let routes: Vec<(Method, String)> =
        service.routes().map(|(m, p)| (m.clone(), p.to_owned())).collect();
    assert_eq!(
        routes,
        [
            (Method::GET, "/health".to_owned()),
            (Method::GET, "/users/{id}".to_owned()),
            (Method::POST, "/users".to_owned()),
        ]
    );
}

struct PlainText;

impl Encoder for PlainText {
    fn encode<'a>(
        &'a self,
        rsp: &'a mut Response,
        ctx: &'a Context,
        entity: Entity,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let body = match entity {
                Entity::RawJson(bytes) => bytes,
                _ => Bytes::from(format!("entity for {}", ctx.path())),
            };
            rsp.write(ContentType::Text, body);
            Ok(())
        })
    }
}

#[tokio::test]
async fn a_custom_encoder_replaces_json() {
    let app = Service::new(Config::default())
        .encoder(PlainText)
        .route(Method::GET, "/hello", reply(json!("ignored")))
        .build();

    let rsp = send(&app, request(Method::GET, "/hello"), "").await;
    assert_eq!(rsp.headers()[header::CONTENT_TYPE], ContentType::Text.as_str());
    assert_eq!(rsp.body().as_ref(), b"entity for /hello");
}

#[tokio::test]
async fn injected_generators_mint_the_ids() {
    let node = [0x02, 0x00, 0x5e, 0x10, 0x00, 0x01];
    let app = Service::new(Config::default())
        .ids(IdGenerator::with_state(node, 41))
        .route(Method::GET, "/", reply(json!(1)))
        .build();

    for expected_seq in [42, 43] {
        let rsp = send(&app, request(Method::GET, "/"), "").await;
        let id: CorrelationId = rsp.headers()[X_REQUEST_ID].to_str().unwrap().parse().unwrap();
        assert_eq!(id.node(), Some(node));
        assert_eq!(id.clock_seq(), Some(expected_seq));
    }
}

/// Log sink shared with the subscriber under test.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn take(&self) -> String {
        String::from_utf8(std::mem::take(&mut *self.0.lock().unwrap())).unwrap()
    }
}

#[tokio::test]
async fn matching_paths_are_mirrored_to_the_log() {
    let captured = Captured::default();
    let writer = captured.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let app = Service::new(Config::default().trace("^/traced/").unwrap())
        .route(Method::POST, "/traced/echo", reply(json!({"ok": true})))
        .route(Method::GET, "/quiet", reply(json!("shh")))
        .build();
    assert!(app.traced("/traced/echo").is_some());
    assert!(app.traced("/quiet").is_none());

    let traced = request(Method::POST, "/traced/echo")
        .header(header::AUTHORIZATION, "Bearer s3cret")
        .header("x-trace-me", "yes");
    let rsp = send(&app, traced, r#"{"ping":1}"#).await;
    assert_eq!(rsp.status(), StatusCode::OK);

    let log = captured.take();
    assert!(log.contains("< authorization: <1 suppressed>"), "{log}");
    assert!(!log.contains("s3cret"), "{log}");
    assert!(log.contains("< x-trace-me: yes"), "{log}");
    assert!(log.contains(r#"< {"ping":1}"#), "{log}");
    assert!(log.contains("> 200 OK"), "{log}");
    assert!(log.contains(r#"> {"ok":true}"#), "{log}");

    let quiet = request(Method::GET, "/quiet").header(header::AUTHORIZATION, "Bearer s3cret");
    send(&app, quiet, "").await;

    let log = captured.take();
    assert!(!log.contains("< authorization"), "{log}");
    assert!(!log.contains("> 200 OK"), "{log}");
    assert!(log.contains("GET /quiet"), "{log}");
}
