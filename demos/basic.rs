//! A small users service: CORS, a request timer and a route group.
//!
//! Run with:
//!   RUST_LOG=debug COURIER_TRACE='^/users/' cargo run --example basic
//!
//! Try:
//!   curl -H 'origin: https://app.example.com' http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'origin: https://app.example.com' \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X OPTIONS http://localhost:3000/users \
//!        -H 'origin: https://app.example.com' \
//!        -H 'access-control-request-method: POST' -i
//!   curl -H 'accept: text/html' http://localhost:3000/nowhere

use courier::middleware::cors::{Cors, CorsOptions};
use courier::{handler_fn, Attrs, Config, Entity, Error, Scope, Server, Service};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Deserialize)]
struct NewUser {
    name: String,
}

#[derive(Serialize)]
struct User {
    id: String,
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?.user_agent("courier-demo/0.1");
    let server = Server::from_config(&config)?;

    let cors = Cors::new(CorsOptions {
        allowed_origins: vec!["https://*.example.com".into()],
        allowed_methods: vec!["GET".into(), "POST".into(), "DELETE".into()],
        max_age: 600,
        ..CorsOptions::default()
    });

    let timer = handler_fn(|rsp, ctx, next| Box::pin(async move {
        let outcome = next.dispatch(rsp, ctx).await;
        info!(id = %ctx.id(), elapsed = ?ctx.elapsed(), "{} {}", ctx.method(), ctx.path());
        outcome
    }));

    let mut admin = Attrs::new();
    admin.insert("role".into(), "admin".into());

    let users = Scope::new("/users")
        .route(Method::GET, "/{id}", handler_fn(|_rsp, ctx, _next| Box::pin(async move {
            let id = ctx.param("id").unwrap_or_default().to_owned();
            Ok(Some(Entity::json(User { id, name: "alice".into() })))
        })))
        .route(Method::POST, "", handler_fn(|_rsp, ctx, _next| Box::pin(async move {
            let input: NewUser = ctx.json()?;
            Ok(Some(Entity::json(User { id: "99".into(), name: input.name })))
        })))
        .route_with(Method::DELETE, "/{id}", handler_fn(|_rsp, ctx, _next| Box::pin(async move {
            if ctx.attr("role").and_then(|r| r.as_str()) != Some("admin") {
                return Err(Error::status(StatusCode::FORBIDDEN, "admins only"));
            }
            Ok(None)
        })), admin);

    let service = Service::new(config).with(cors).with(timer).mount(users);
    for (method, path) in service.routes() {
        info!("route {method} {path}");
    }

    server.serve(service).await
}
