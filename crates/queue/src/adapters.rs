//! Composable wrappers around an [`EventHandler`].

use std::collections::BTreeMap;

use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};
use kube::Resource;

use crate::handler::EventHandler;
use crate::selector::Selector;

/// Stamps a fixed apiVersion/kind onto every object before delegating, for
/// kinds watched under an alias.
pub struct VersionedHandler<H> {
    inner: H,
    types: TypeMeta,
}

impl<H> VersionedHandler<H> {
    pub fn new(inner: H, gvk: &GroupVersionKind) -> Self {
        Self { inner, types: TypeMeta { api_version: gvk.api_version(), kind: gvk.kind.clone() } }
    }

    fn stamp(&self, obj: &DynamicObject) -> DynamicObject {
        let mut out = obj.clone();
        out.types = Some(self.types.clone());
        out
    }
}

impl<H: EventHandler<DynamicObject>> EventHandler<DynamicObject> for VersionedHandler<H> {
    fn on_add(&self, obj: &DynamicObject) {
        self.inner.on_add(&self.stamp(obj))
    }

    fn on_update(&self, old: &DynamicObject, new: &DynamicObject) {
        self.inner.on_update(&self.stamp(old), &self.stamp(new))
    }

    fn on_delete(&self, obj: &DynamicObject) {
        self.inner.on_delete(&self.stamp(obj))
    }
}

/// Drops events for objects whose labels do not match `selector`. An update
/// is delegated only when both old and new objects match.
pub struct FilteredHandler<H> {
    inner: H,
    selector: Selector,
}

impl<H> FilteredHandler<H> {
    pub fn new(inner: H, selector: Selector) -> Self {
        Self { inner, selector }
    }

    fn matches<K: Resource>(&self, obj: &K) -> bool {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        self.selector.matches(obj.meta().labels.as_ref().unwrap_or(&EMPTY))
    }
}

impl<K, H> EventHandler<K> for FilteredHandler<H>
where
    K: Resource,
    H: EventHandler<K>,
{
    fn on_add(&self, obj: &K) {
        if self.matches(obj) {
            self.inner.on_add(obj)
        }
    }

    fn on_update(&self, old: &K, new: &K) {
        if self.matches(old) && self.matches(new) {
            self.inner.on_update(old, new)
        }
    }

    fn on_delete(&self, obj: &K) {
        if self.matches(obj) {
            self.inner.on_delete(obj)
        }
    }
}
