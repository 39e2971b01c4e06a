//! Blocking adapter for callers without an async runtime.
//!
//! [`Blocking`] wraps an engine and exposes a fixed set of its operations.
//! Outside a Tokio runtime each call runs to completion on a private
//! current-thread runtime and returns [`Maybe::Ready`]. Inside a runtime the
//! future is handed back untouched as [`Maybe::Deferred`] so the caller can
//! `.await` it.

use std::future::{Future, IntoFuture};
use std::sync::OnceLock;

use futures::future::{BoxFuture, FutureExt};
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

use crate::engine::Engine;
use crate::engines::tracemoe::{TraceMoe, TraceMoeMe};
use crate::input::{FileSource, ImageSource};
use crate::paging::{Paginate, Paginated};
use crate::{Result, SearchError};

/// Outcome of a blocking-adapter call.
pub enum Maybe<'a, T> {
    /// Computed synchronously.
    Ready(Result<T>),
    /// Still to be awaited by the caller.
    Deferred(BoxFuture<'a, Result<T>>),
}

impl<'a, T: Send + 'a> Maybe<'a, T> {
    /// Returns true when the value was computed synchronously.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Resolves the value synchronously.
    ///
    /// Deferred values can only be waited on from a multi-threaded runtime;
    /// on a current-thread runtime this fails and the caller must `.await`.
    pub fn wait(self) -> Result<T> {
        match self {
            Self::Ready(result) => result,
            Self::Deferred(future) => match Handle::try_current() {
                Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                    tokio::task::block_in_place(|| handle.block_on(future))
                }
                _ => Err(SearchError::Other(
                    "cannot block on a current-thread runtime, await the result instead".to_string(),
                )),
            },
        }
    }
}

impl<'a, T: Send + 'a> IntoFuture for Maybe<'a, T> {
    type Output = Result<T>;
    type IntoFuture = BoxFuture<'a, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Self::Ready(result) => futures::future::ready(result).boxed(),
            Self::Deferred(future) => future,
        }
    }
}

/// Blocking facade over an engine.
pub struct Blocking<E> {
    engine: E,
    runtime: OnceLock<Runtime>,
}

impl<E: Engine> Blocking<E> {
    /// Wraps `engine`.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            runtime: OnceLock::new(),
        }
    }

    /// Returns the wrapped engine.
    pub fn inner(&self) -> &E {
        &self.engine
    }

    fn runtime(&self) -> Result<&Runtime> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime);
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(self.runtime.get_or_init(|| runtime))
    }

    fn run<'a, T, F>(&'a self, future: F) -> Maybe<'a, T>
    where
        F: Future<Output = Result<T>> + Send + 'a,
        T: Send + 'a,
    {
        if Handle::try_current().is_ok() {
            return Maybe::Deferred(future.boxed());
        }
        match self.runtime() {
            Ok(runtime) => Maybe::Ready(runtime.block_on(future)),
            Err(e) => Maybe::Ready(Err(e)),
        }
    }

    /// Blocking [`Engine::search`].
    pub fn search<'a>(&'a self, source: &'a ImageSource) -> Maybe<'a, E::Response> {
        self.run(self.engine.search(source))
    }

    /// Blocking [`Engine::search_with`].
    pub fn search_with<'a>(&'a self, url: Option<&'a str>, file: Option<FileSource>) -> Maybe<'a, E::Response> {
        self.run(self.engine.search_with(url, file))
    }
}

impl<E> Blocking<E>
where
    E: Paginate,
    E::Response: Paginated,
{
    /// Blocking [`Paginate::navigate`].
    pub fn navigate<'a>(&'a self, response: &'a E::Response, offset: isize) -> Maybe<'a, Option<E::Response>> {
        self.run(self.engine.navigate(response, offset))
    }

    /// Blocking [`Paginate::next_page`].
    pub fn next_page<'a>(&'a self, response: &'a E::Response) -> Maybe<'a, Option<E::Response>> {
        self.run(self.engine.next_page(response))
    }

    /// Blocking [`Paginate::pre_page`].
    pub fn pre_page<'a>(&'a self, response: &'a E::Response) -> Maybe<'a, Option<E::Response>> {
        self.run(self.engine.pre_page(response))
    }
}

impl Blocking<TraceMoe> {
    /// Blocking [`TraceMoe::me`].
    pub fn me<'a>(&'a self, key: Option<&'a str>) -> Maybe<'a, TraceMoeMe> {
        self.run(self.engine.me(key))
    }
}

impl<E> Drop for Blocking<E> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
