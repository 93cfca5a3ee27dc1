//! Interceptors expose selected host state to script as plain properties.

use std::marker::PhantomData;
use std::sync::Arc;

use super::HostObject;
use crate::error::Result;

/// String-keyed state copied between a host object and its proxy.
pub type InterceptorContext = serde_json::Map<String, serde_json::Value>;

/// Hooks run when an instance of `T` crosses into script and back.
///
/// On inject, each context entry becomes a property on the proxy, and a
/// script `onInject(context)` method on the proxy is called if present. On
/// extract, a script `onExtract(context)` method is called first if present,
/// then the entries are read back and handed to [`on_extract`].
///
/// [`on_extract`]: ClassInterceptor::on_extract
pub trait ClassInterceptor<T>: Send + Sync {
    fn on_inject(&self, context: &mut InterceptorContext, object: &T);

    fn on_extract(&self, context: &InterceptorContext, object: &mut T);
}

pub(crate) trait ErasedInterceptor: Send + Sync {
    fn inject(&self, object: &HostObject) -> Result<InterceptorContext>;

    fn extract(&self, context: &InterceptorContext, object: &HostObject) -> Result<()>;
}

pub(crate) struct Typed<T, I> {
    interceptor: I,
    _marker: PhantomData<fn(&mut T)>,
}

impl<T, I> Typed<T, I>
where
    T: Send + 'static,
    I: ClassInterceptor<T> + 'static,
{
    pub(crate) fn erase(interceptor: I) -> Arc<dyn ErasedInterceptor> {
        Arc::new(Self {
            interceptor,
            _marker: PhantomData,
        })
    }
}

impl<T, I> ErasedInterceptor for Typed<T, I>
where
    T: Send + 'static,
    I: ClassInterceptor<T>,
{
    fn inject(&self, object: &HostObject) -> Result<InterceptorContext> {
        let mut context = InterceptorContext::new();
        object.with(|value: &T| self.interceptor.on_inject(&mut context, value))?;
        Ok(context)
    }

    fn extract(&self, context: &InterceptorContext, object: &HostObject) -> Result<()> {
        object.with_mut(|value: &mut T| self.interceptor.on_extract(context, value))
    }
}
