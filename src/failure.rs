//! Type-erased causing failure
//!
//! A [`Failure`] is whatever went wrong before it was classified: a driver
//! error, a validation failure, an [`ErrorKind`](crate::ErrorKind) raised on
//! purpose, or an already classified [`Error`](crate::Error). It remembers the
//! concrete type name so debugging output can say what the cause was.

use std::any::{type_name, Any};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// A causing failure, cheap to clone.
///
/// Anything implementing `std::error::Error` converts into a `Failure` with
/// `?`, which is how resolvers hand raw failures to the adapter.
#[derive(Clone)]
pub struct Failure {
    type_name: Cow<'static, str>,
    inner: Arc<anyhow::Error>,
    /// Set when the failure is shared with its producer, for downcasting.
    shared: Option<Arc<dyn Any + Send + Sync>>,
}

impl Failure {
    /// Failure from a plain message, for causes that aren't error types.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self {
            type_name: Cow::Borrowed(type_name::<M>()),
            inner: Arc::new(anyhow::Error::msg(message)),
            shared: None,
        }
    }

    /// Wrap an `anyhow::Error`. The original concrete type is no longer known.
    pub fn from_anyhow(error: anyhow::Error) -> Self {
        Self {
            type_name: Cow::Borrowed(type_name::<anyhow::Error>()),
            inner: Arc::new(error),
            shared: None,
        }
    }

    /// Failure from an error someone else still holds, such as the source
    /// of an `async_graphql::Error`. Downcasts see the original `E`.
    pub fn shared<E>(error: Arc<E>) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            type_name: Cow::Borrowed(type_name::<E>()),
            inner: Arc::new(anyhow::Error::new(Shared(Arc::clone(&error)))),
            shared: Some(error),
        }
    }

    /// Concrete type the failure was built from.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T>(&self) -> Option<&T>
    where
        T: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        if let Some(found) = self.shared.as_ref().and_then(|shared| shared.downcast_ref::<T>()) {
            return Some(found);
        }
        self.inner.downcast_ref::<T>()
    }

    pub fn is<T>(&self) -> bool
    where
        T: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.downcast_ref::<T>().is_some()
    }

    pub(crate) fn as_std(&self) -> &(dyn std::error::Error + 'static) {
        let inner: &(dyn std::error::Error + Send + Sync + 'static) = &**self.inner;
        inner
    }
}

impl<E> From<E> for Failure
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self {
            type_name: Cow::Borrowed(type_name::<E>()),
            inner: Arc::new(anyhow::Error::new(error)),
            shared: None,
        }
    }
}

struct Shared<E>(Arc<E>);

impl<E: fmt::Display> fmt::Display for Shared<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl<E: fmt::Debug> fmt::Debug for Shared<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl<E: std::error::Error> std::error::Error for Shared<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("type", &self.type_name)
            .field("message", &self.inner.to_string())
            .finish()
    }
}

/// Two failures are equal when they are the same failure, not when they print alike.
impl PartialEq for Failure {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
