//! Per-kind admission callbacks.

use anyhow::Result;

/// Callbacks invoked with hub-version objects.
///
/// `Ok(None)` from create/update admits the object unchanged; `Ok(Some(obj))`
/// admits it with `obj` as the mutated object. An error denies the request.
#[async_trait::async_trait]
pub trait ResourceHandler<T>: Send + Sync
where
    T: Send + 'static,
{
    async fn on_create(&self, _obj: T) -> Result<Option<T>> {
        Ok(None)
    }

    async fn on_update(&self, _old: T, _new: T) -> Result<Option<T>> {
        Ok(None)
    }

    async fn on_delete(&self, _obj: T) -> Result<()> {
        Ok(())
    }
}

type MutateFn<T> = Box<dyn Fn(T) -> Result<Option<T>> + Send + Sync>;
type UpdateFn<T> = Box<dyn Fn(T, T) -> Result<Option<T>> + Send + Sync>;
type DeleteFn<T> = Box<dyn Fn(T) -> Result<()> + Send + Sync>;

/// Closure-backed [`ResourceHandler`]; unset callbacks admit unchanged.
pub struct HandlerFuncs<T> {
    create: Option<MutateFn<T>>,
    update: Option<UpdateFn<T>>,
    delete: Option<DeleteFn<T>>,
}

impl<T> Default for HandlerFuncs<T> {
    fn default() -> Self {
        Self { create: None, update: None, delete: None }
    }
}

impl<T> HandlerFuncs<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create(mut self, f: impl Fn(T) -> Result<Option<T>> + Send + Sync + 'static) -> Self {
        self.create = Some(Box::new(f));
        self
    }

    pub fn with_update(mut self, f: impl Fn(T, T) -> Result<Option<T>> + Send + Sync + 'static) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    pub fn with_delete(mut self, f: impl Fn(T) -> Result<()> + Send + Sync + 'static) -> Self {
        self.delete = Some(Box::new(f));
        self
    }
}

#[async_trait::async_trait]
impl<T> ResourceHandler<T> for HandlerFuncs<T>
where
    T: Send + 'static,
{
    async fn on_create(&self, obj: T) -> Result<Option<T>> {
        match &self.create {
            Some(f) => f(obj),
            None => Ok(None),
        }
    }

    async fn on_update(&self, old: T, new: T) -> Result<Option<T>> {
        match &self.update {
            Some(f) => f(old, new),
            None => Ok(None),
        }
    }

    async fn on_delete(&self, obj: T) -> Result<()> {
        match &self.delete {
            Some(f) => f(obj),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl<T, H> ResourceHandler<T> for std::sync::Arc<H>
where
    T: Send + 'static,
    H: ResourceHandler<T> + ?Sized,
{
    async fn on_create(&self, obj: T) -> Result<Option<T>> {
        (**self).on_create(obj).await
    }

    async fn on_update(&self, old: T, new: T) -> Result<Option<T>> {
        (**self).on_update(old, new).await
    }

    async fn on_delete(&self, obj: T) -> Result<()> {
        (**self).on_delete(obj).await
    }
}
