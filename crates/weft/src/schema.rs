// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Schema adapter
//!
//! All validation in the runtime goes through the [`Schema`] trait: an opaque
//! validator that either passes a (possibly transformed) value through or
//! reports a list of [`Issue`]s. No particular schema library is assumed;
//! adapters for external validators implement the trait on their side of the
//! boundary.
//!
//! [`custom`] builds the pass-through schema: no runtime checking, the value
//! is returned unchanged. It exists to carry a type where upstream code
//! already guarantees validity.

use crate::error::{Error, Issue, Result};
use std::marker::PhantomData;
use std::sync::Arc;

/// An opaque validator for values of type `T`.
///
/// `validate` consumes the candidate and returns it (possibly transformed),
/// or the list of issues that make it invalid.
pub trait Schema<T>: Send + Sync {
    /// Validate `value`, returning it (possibly transformed) on success.
    fn validate(&self, value: T) -> std::result::Result<T, Vec<Issue>>;

    /// Short description used in error messages.
    fn describe(&self) -> &str {
        "schema"
    }
}

/// Shared handle to a schema.
pub type SchemaRef<T> = Arc<dyn Schema<T>>;

struct CustomSchema<T> {
    _marker: PhantomData<fn(T) -> T>,
}

impl<T: Send + Sync> Schema<T> for CustomSchema<T> {
    fn validate(&self, value: T) -> std::result::Result<T, Vec<Issue>> {
        Ok(value)
    }

    fn describe(&self) -> &str {
        "custom"
    }
}

/// The pass-through schema: performs no runtime checking.
pub fn custom<T: Send + Sync + 'static>() -> SchemaRef<T> {
    Arc::new(CustomSchema {
        _marker: PhantomData,
    })
}

struct VerifySchema<T, F> {
    name: String,
    predicate: F,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T, F> Schema<T> for VerifySchema<T, F>
where
    T: Send + Sync,
    F: Fn(&T) -> std::result::Result<(), String> + Send + Sync,
{
    fn validate(&self, value: T) -> std::result::Result<T, Vec<Issue>> {
        match (self.predicate)(&value) {
            Ok(()) => Ok(value),
            Err(message) => Err(vec![Issue::new(message)]),
        }
    }

    fn describe(&self) -> &str {
        &self.name
    }
}

/// Predicate schema: accepts values for which `predicate` returns `Ok`.
pub fn verify<T, F>(name: impl Into<String>, predicate: F) -> SchemaRef<T>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> std::result::Result<(), String> + Send + Sync + 'static,
{
    Arc::new(VerifySchema {
        name: name.into(),
        predicate,
        _marker: PhantomData,
    })
}

/// Run `schema` over `value`, mapping issues to [`Error::Schema`] attributed
/// to `subject`.
pub(crate) fn validate_subject<T>(
    schema: &SchemaRef<T>,
    subject: Option<Arc<str>>,
    value: T,
) -> Result<T> {
    schema
        .validate(value)
        .map_err(|issues| Error::schema(subject, issues))
}
