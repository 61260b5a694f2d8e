//! Method + path lookup.
//!
//! One radix tree per HTTP method, O(path-length) lookup via [`matchit`].
//! Each entry is a [`Route`]: the pipeline to run plus the attributes the
//! route was registered with.

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::context::{Attrs, Context};
use crate::error::Error;
use crate::handler::{BoxFuture, Handler, Outcome};
use crate::pipeline::Pipeline;
use crate::response::Response;

pub(crate) struct Route {
    pub(crate) pipeline: Pipeline,
    pub(crate) attrs: Attrs,
}

#[derive(Default)]
pub(crate) struct Router {
    routes: HashMap<Method, MatchitRouter<Arc<Route>>>,
    listing: Vec<(Method, String)>,
}

impl Router {
    /// # Panics
    ///
    /// Panics if `path` is not a valid pattern or collides with an existing
    /// route for the same method. Routes are registered at startup, so this
    /// surfaces as a boot failure.
    pub(crate) fn insert(&mut self, method: Method, path: &str, route: Route) {
        self.routes
            .entry(method.clone())
            .or_default()
            .insert(path, Arc::new(route))
            .unwrap_or_else(|e| panic!("invalid route `{method} {path}`: {e}"));
        self.listing.push((method, path.to_owned()));
    }

    pub(crate) fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(Arc<Route>, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let route = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((route, params))
    }

    /// Every registered method and path, in registration order.
    pub(crate) fn listing(&self) -> &[(Method, String)] {
        &self.listing
    }
}

/// The last stage of every service pipeline: finds the route for the
/// request and runs its pipeline. Unmatched requests fail with 404.
pub(crate) struct Dispatch {
    pub(crate) router: Arc<Router>,
}

impl Handler for Dispatch {
    fn serve<'a>(
        &'a self,
        rsp: &'a mut Response,
        ctx: &'a mut Context,
        _next: Pipeline,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            let Some((route, params)) = self.router.lookup(ctx.method(), ctx.path()) else {
                return Err(Error::not_found(format!("No route for {} {}", ctx.method(), ctx.path())));
            };
            ctx.set_params(params);
            ctx.merge_attrs(&route.attrs);
            route.pipeline.dispatch(rsp, ctx).await
        })
    }
}
