//! Turning a dispatch [`Outcome`] into bytes on the wire.
//!
//! ```text
//! Ok(Some(entity))  → 200, entity encoded by the Encoder
//! Ok(None)          → 200, empty body
//! Err(Status(e))    → e.status, e.headers, {"status":…,"message":…} or HTML
//! Err(anything)     → 500, {"status":500,"message":…} or HTML
//! ```
//!
//! Every response carries `X-Request-Id` with the request's correlation id.

use std::sync::Arc;

use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::error;

use crate::context::Context;
use crate::entity::Entity;
use crate::error::Error;
use crate::handler::{BoxFuture, Outcome};
use crate::response::{ContentType, Response};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Content negotiation policy: writes an entity into the response.
///
/// Swap in your own with [`Service::encoder`](crate::Service::encoder) to
/// support other wire formats.
pub trait Encoder: Send + Sync + 'static {
    fn encode<'a>(
        &'a self,
        rsp: &'a mut Response,
        ctx: &'a Context,
        entity: Entity,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

/// The default policy: streams are copied with their own content type,
/// raw JSON is written verbatim, values are marshaled with `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode<'a>(
        &'a self,
        rsp: &'a mut Response,
        _ctx: &'a Context,
        entity: Entity,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            match entity {
                Entity::Stream { content_type, mut reader } => {
                    let mut body = Vec::new();
                    reader.read_to_end(&mut body).await?;
                    let content_type = HeaderValue::try_from(content_type).map_err(Error::opaque)?;
                    rsp.write_raw(content_type, body);
                }
                Entity::RawJson(body) => rsp.write(ContentType::Json, body),
                Entity::Value(value) => rsp.write(ContentType::Json, value.marshal()?),
            }
            Ok(())
        })
    }
}

/// Client-visible shape of an error.
#[derive(Debug, Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
}

/// Writes the terminal result of a pipeline into the response.
#[derive(Clone)]
pub struct Responder {
    service: Arc<str>,
    encoder: Arc<dyn Encoder>,
    user_agent: Option<HeaderValue>,
}

impl Responder {
    pub fn new(service: impl Into<Arc<str>>, encoder: Arc<dyn Encoder>) -> Self {
        Self { service: service.into(), encoder, user_agent: None }
    }

    /// Adds a `User-Agent` header to every response.
    pub fn with_user_agent(mut self, user_agent: HeaderValue) -> Self {
        self.user_agent = Some(user_agent);
        self
    }

    pub async fn respond(&self, rsp: &mut Response, ctx: &Context, outcome: Outcome) {
        stamp_request_id(rsp, ctx);
        match outcome {
            Ok(entity) => self.send_entity(rsp, ctx, StatusCode::OK, HeaderMap::new(), entity).await,
            Err(err) => self.send_error(rsp, ctx, err).await,
        }
    }

    async fn send_error(&self, rsp: &mut Response, ctx: &Context, err: Error) {
        let (status, headers, message) = match err {
            Error::Status(e) => {
                error!(service = %self.service, id = %ctx.id(), status = e.status().as_u16(), "{e}");
                (e.status(), e.headers().clone(), e.to_string())
            }
            other => {
                error!(service = %self.service, id = %ctx.id(), "{other}");
                (StatusCode::INTERNAL_SERVER_ERROR, HeaderMap::new(), other.to_string())
            }
        };

        let entity = if ctx.accepts("text/html") {
            html_error(status, &message)
        } else {
            Entity::json(ErrorBody { status: status.as_u16(), message })
        };
        self.send_entity(rsp, ctx, status, headers, Some(entity)).await;
    }

    async fn send_entity(
        &self,
        rsp: &mut Response,
        ctx: &Context,
        status: StatusCode,
        headers: HeaderMap,
        entity: Option<Entity>,
    ) {
        rsp.set_status(status);
        for (name, value) in &headers {
            rsp.append_header(name.clone(), value.clone());
        }
        if let Some(ua) = &self.user_agent {
            rsp.append_header(header::USER_AGENT, ua.clone());
        }

        let Some(entity) = entity else { return };
        if let Err(e) = self.encoder.encode(rsp, ctx, entity).await {
            error!(service = %self.service, id = %ctx.id(), "could not encode entity: {e}");
            rsp.set_status(StatusCode::INTERNAL_SERVER_ERROR);
            rsp.clear_body();
        }
    }
}

/// Sets `X-Request-Id` to the request's correlation id.
pub(crate) fn stamp_request_id(rsp: &mut Response, ctx: &Context) {
    if let Ok(id) = HeaderValue::from_str(&ctx.id().to_string()) {
        rsp.insert_header(X_REQUEST_ID, id);
    }
}

/// Minimal HTML rendering of an error, for clients that ask for HTML.
fn html_error(status: StatusCode, message: &str) -> Entity {
    let escaped = message.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");
    let page = format!(
        "<html><body><h1>{} {}</h1><p><pre>{escaped}</pre></p></body></html>",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
    );
    Entity::bytes(ContentType::Html.as_str(), page)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::{Value, json};

    use super::*;
    use crate::error::StatusError;
    use crate::id::CorrelationId;

    fn ctx(accept: Option<&str>) -> Context {
        let mut req = http::Request::get("/");
        if let Some(accept) = accept {
            req = req.header("accept", accept);
        }
        Context::new(req.body(Bytes::new()).unwrap(), CorrelationId::random())
    }

    async fn respond(ctx: &Context, outcome: Outcome) -> Response {
        let responder = Responder::new("test", Arc::new(JsonEncoder));
        let mut rsp = Response::new();
        responder.respond(&mut rsp, ctx, outcome).await;
        rsp
    }

    fn body_json(rsp: &Response) -> Value {
        serde_json::from_slice(rsp.body()).unwrap()
    }

    #[tokio::test]
    async fn values_are_marshaled_as_json() {
        #[derive(Serialize)]
        struct User {
            id: u32,
            name: &'static str,
        }
        let c = ctx(None);
        let rsp = respond(&c, Ok(Some(Entity::json(User { id: 1, name: "alice" })))).await;
        assert_eq!(rsp.status(), StatusCode::OK);
        assert_eq!(rsp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(body_json(&rsp), json!({"id": 1, "name": "alice"}));
        assert_eq!(rsp.headers()[X_REQUEST_ID], c.id().to_string().as_str());
    }

    #[tokio::test]
    async fn raw_json_is_written_verbatim() {
        let rsp = respond(&ctx(None), Ok(Some(Entity::raw_json(r#"{ "pre" : "encoded" }"#)))).await;
        assert_eq!(rsp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(rsp.body().as_ref(), br#"{ "pre" : "encoded" }"#);
    }

    #[tokio::test]
    async fn streams_keep_their_content_type() {
        let rsp = respond(&ctx(None), Ok(Some(Entity::bytes("text/csv", "a,b\n1,2\n")))).await;
        assert_eq!(rsp.headers()[header::CONTENT_TYPE], "text/csv");
        assert_eq!(rsp.body().as_ref(), b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn no_content_is_an_empty_ok() {
        let c = ctx(None);
        let rsp = respond(&c, Ok(None)).await;
        assert_eq!(rsp.status(), StatusCode::OK);
        assert!(rsp.body().is_empty());
        assert!(rsp.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn structured_errors_keep_status_and_headers() {
        let err = StatusError::msg(StatusCode::NOT_FOUND, "no user 7")
            .with_header(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        let rsp = respond(&ctx(Some("application/json")), Err(err.into())).await;
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
        assert_eq!(rsp.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(body_json(&rsp), json!({"status": 404, "message": "no user 7"}));
    }

    #[tokio::test]
    async fn opaque_errors_become_500() {
        let rsp = respond(&ctx(None), Err(Error::opaque("database unreachable"))).await;
        assert_eq!(rsp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(&rsp), json!({"status": 500, "message": "database unreachable"}));
    }

    #[tokio::test]
    async fn html_clients_get_an_escaped_page() {
        let rsp = respond(&ctx(Some("text/html")), Err(Error::not_found("<b>Tom & Jerry</b>"))).await;
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
        assert_eq!(rsp.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
        let page = std::str::from_utf8(rsp.body()).unwrap();
        assert_eq!(
            page,
            "<html><body><h1>404 Not Found</h1><p><pre>&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;</pre></p></body></html>"
        );
    }

    #[tokio::test]
    async fn marshal_failures_become_an_empty_500() {
        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], 1);
        let rsp = respond(&ctx(None), Ok(Some(Entity::json(bad)))).await;
        assert_eq!(rsp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(rsp.body().is_empty());
        assert!(rsp.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn handler_headers_survive_into_the_response() {
        let c = ctx(None);
        let mut rsp = Response::new();
        rsp.append_header(header::VARY, HeaderValue::from_static("Origin"));
        Responder::new("test", Arc::new(JsonEncoder))
            .with_user_agent(HeaderValue::from_static("courier/0.1"))
            .respond(&mut rsp, &c, Err(Error::bad_request("nope")))
            .await;
        assert_eq!(rsp.headers()[header::VARY], "Origin");
        assert_eq!(rsp.headers()[header::USER_AGENT], "courier/0.1");
    }
}
