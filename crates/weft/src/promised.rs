// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Promise-like result carriers
//!
//! A [`Promised`] is a cloneable, shareable in-flight result: every clone
//! observes the same outcome, and awaiting is as cheap as polling a shared
//! future. Flow contexts hand these out for subflows so callers can compose
//! them with `parallel`, chain them with [`Promised::map`] and
//! [`Promised::switch`], or settle a whole batch with [`settled_all`].

use crate::error::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// One element's outcome in a settled batch.
#[derive(Debug, Clone)]
pub enum Settled<T> {
    /// The element resolved.
    Resolved(T),
    /// The element rejected.
    Rejected(Error),
}

impl<T> Settled<T> {
    /// True for [`Settled::Resolved`].
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// The resolved value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Rejected(_) => None,
        }
    }

    /// The rejection, if any.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Resolved(_) => None,
            Self::Rejected(err) => Some(err),
        }
    }
}

/// A cloneable shared promise of a `Result<T>`.
pub struct Promised<T> {
    inner: Shared<BoxFuture<'static, Result<T>>>,
}

impl<T> Clone for Promised<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Promised<T> {
    /// Wrap a future; it runs when first polled and every clone shares the
    /// outcome.
    pub fn from_future(fut: impl Future<Output = Result<T>> + Send + 'static) -> Self {
        let boxed: BoxFuture<'static, Result<T>> = Box::pin(fut);
        Self {
            inner: boxed.shared(),
        }
    }

    /// An already-resolved promise.
    pub fn resolved(value: T) -> Self {
        Self::from_future(std::future::ready(Ok(value)))
    }

    /// An already-rejected promise.
    pub fn rejected(error: Error) -> Self {
        Self::from_future(std::future::ready(Err(error)))
    }

    /// Transform the resolved value.
    pub fn map<U, F>(self, f: F) -> Promised<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Promised::from_future(async move { self.await.map(f) })
    }

    /// Chain another promise off the resolved value.
    pub fn switch<U, F>(self, f: F) -> Promised<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Promised<U> + Send + 'static,
    {
        Promised::from_future(async move {
            let value = self.await?;
            f(value).await
        })
    }

    /// Transform the rejection.
    pub fn map_error<F>(self, f: F) -> Promised<T>
    where
        F: FnOnce(Error) -> Error + Send + 'static,
    {
        Promised::from_future(async move { self.await.map_err(f) })
    }

    /// Replace a rejection with a fallback value.
    pub fn recover<F>(self, f: F) -> Promised<T>
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        Promised::from_future(async move {
            match self.await {
                Ok(value) => Ok(value),
                Err(err) => Ok(f(err)),
            }
        })
    }

    /// Await and fold the outcome into a [`Settled`].
    pub async fn settle(self) -> Settled<T> {
        match self.await {
            Ok(value) => Settled::Resolved(value),
            Err(err) => Settled::Rejected(err),
        }
    }
}

impl<T: Clone> Future for Promised<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().inner).poll(cx)
    }
}

/// Drive every promise to completion and report per-element outcomes, in
/// input order.
pub async fn settled_all<T: Clone + Send + Sync + 'static>(
    items: Vec<Promised<T>>,
) -> Vec<Settled<T>> {
    let results = futures::future::join_all(items).await;
    results
        .into_iter()
        .map(|result| match result {
            Ok(value) => Settled::Resolved(value),
            Err(err) => Settled::Rejected(err),
        })
        .collect()
}

/// Split settled outcomes into values and errors, preserving order within
/// each side.
pub fn partition<T>(settled: Vec<Settled<T>>) -> (Vec<T>, Vec<Error>) {
    let mut values = Vec::new();
    let mut errors = Vec::new();
    for outcome in settled {
        match outcome {
            Settled::Resolved(value) => values.push(value),
            Settled::Rejected(err) => errors.push(err),
        }
    }
    (values, errors)
}
