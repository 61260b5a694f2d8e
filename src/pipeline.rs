//! Ordered, immutable handler chains.

use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::handler::{BoxFuture, BoxedHandler, Handler, Outcome};
use crate::response::Response;

/// An ordered chain of [`Handler`]s.
///
/// A pipeline is a value: [`add`](Pipeline::add) returns a new pipeline and
/// never changes the receiver, so one instance can be shared by every
/// request in flight. Appending a pipeline splices its handlers in one by
/// one, so `a.add(b)` dispatches exactly like appending each of `b`'s
/// handlers to `a`.
///
/// Internally the handlers sit in one shared slice and a pipeline is a
/// window onto it; the tail handed to each stage is the same slice with the
/// window moved by one.
#[derive(Clone, Default)]
pub struct Pipeline {
    handlers: Arc<[BoxedHandler]>,
    start: usize,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn stages(&self) -> &[BoxedHandler] {
        &self.handlers[self.start..]
    }

    pub fn len(&self) -> usize {
        self.stages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages().is_empty()
    }

    /// A copy of this pipeline with `handler` appended. A pipeline argument
    /// is flattened into its handlers.
    pub fn add(&self, handler: impl Handler) -> Pipeline {
        match handler.as_pipeline() {
            Some(other) => self.extend(other.stages().iter().cloned()),
            None => self.extend(std::iter::once(Arc::new(handler) as BoxedHandler)),
        }
    }

    /// Like [`add`](Pipeline::add) for a handler that is already shared.
    pub fn add_shared(&self, handler: BoxedHandler) -> Pipeline {
        match handler.as_pipeline() {
            Some(other) => self.extend(other.stages().iter().cloned()),
            None => self.extend(std::iter::once(handler)),
        }
    }

    fn extend(&self, more: impl Iterator<Item = BoxedHandler>) -> Pipeline {
        let handlers: Vec<BoxedHandler> = self.stages().iter().cloned().chain(more).collect();
        Pipeline { handlers: handlers.into(), start: 0 }
    }

    /// Everything after the head.
    fn tail(&self) -> Pipeline {
        Pipeline {
            handlers: Arc::clone(&self.handlers),
            start: (self.start + 1).min(self.handlers.len()),
        }
    }

    /// Runs the head handler, giving it the tail as its continuation.
    /// An empty pipeline is a no-op that yields `Ok(None)`.
    pub fn dispatch<'a>(&self, rsp: &'a mut Response, ctx: &'a mut Context) -> BoxFuture<'a, Outcome> {
        match self.stages().first() {
            None => Box::pin(async { Ok(None) }),
            Some(head) => {
                let head = Arc::clone(head);
                let tail = self.tail();
                Box::pin(async move { head.serve(rsp, ctx, tail).await })
            }
        }
    }
}

/// A pipeline used directly as a handler dispatches its own stages and
/// ignores the continuation it is given: it is a terminal composition, the
/// caller's remaining stages never run.
impl Handler for Pipeline {
    fn serve<'a>(
        &'a self,
        rsp: &'a mut Response,
        ctx: &'a mut Context,
        _next: Pipeline,
    ) -> BoxFuture<'a, Outcome> {
        self.dispatch(rsp, ctx)
    }

    fn as_pipeline(&self) -> Option<&Pipeline> {
        Some(self)
    }
}

impl<H: Handler> FromIterator<H> for Pipeline {
    fn from_iter<I: IntoIterator<Item = H>>(iter: I) -> Self {
        iter.into_iter().fold(Pipeline::new(), |p, h| p.add(h))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline").field("len", &self.len()).finish()
    }
}
