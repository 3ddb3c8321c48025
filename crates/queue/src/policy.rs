//! Canned enqueue policies.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use kgate_meta::{annotations, is_deleting, labels, status_condition_aware_equal_value, MetaError, ReconcileStrategy};
use serde_json::Value as Json;

pub type AddPredicate = Arc<dyn Fn(&Json) -> Result<bool, MetaError> + Send + Sync>;
pub type UpdatePredicate = Arc<dyn Fn(&Json, &Json) -> Result<bool, MetaError> + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DispatchPolicy {
    /// Every add, update and delete.
    #[default]
    Default,
    /// Adds and updates; deletes are dropped.
    UpsertOnly,
    /// Deletes only.
    DeleteOnly,
    /// Adds and updates of objects whose status lags their generation, plus
    /// updates of objects being deleted.
    Reconcilable,
    /// Like `Reconcilable`, plus label, annotation and status-condition changes.
    ChangeDetecting,
    /// Like `ChangeDetecting` without the label and annotation checks.
    SpecStatusChange,
}

impl DispatchPolicy {
    pub const ALL: [DispatchPolicy; 6] = [
        DispatchPolicy::Default,
        DispatchPolicy::UpsertOnly,
        DispatchPolicy::DeleteOnly,
        DispatchPolicy::Reconcilable,
        DispatchPolicy::ChangeDetecting,
        DispatchPolicy::SpecStatusChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchPolicy::Default => "default",
            DispatchPolicy::UpsertOnly => "upsert-only",
            DispatchPolicy::DeleteOnly => "delete-only",
            DispatchPolicy::Reconcilable => "reconcilable",
            DispatchPolicy::ChangeDetecting => "change",
            DispatchPolicy::SpecStatusChange => "spec-status-change",
        }
    }

    /// `None` means "always".
    pub fn add_predicate(&self, strategy: ReconcileStrategy) -> Option<AddPredicate> {
        match self {
            DispatchPolicy::DeleteOnly => Some(Arc::new(|_: &Json| -> Result<bool, MetaError> { Ok(false) })),
            DispatchPolicy::Reconcilable => Some(Arc::new(move |obj: &Json| -> Result<bool, MetaError> {
                Ok(!strategy.is_reconciled(obj)?)
            })),
            _ => None,
        }
    }

    /// `None` means "always".
    pub fn update_predicate(&self, strategy: ReconcileStrategy) -> Option<UpdatePredicate> {
        match self {
            DispatchPolicy::Default | DispatchPolicy::UpsertOnly => None,
            DispatchPolicy::DeleteOnly => Some(Arc::new(|_: &Json, _: &Json| -> Result<bool, MetaError> { Ok(false) })),
            DispatchPolicy::Reconcilable => Some(Arc::new(move |_old: &Json, new: &Json| -> Result<bool, MetaError> {
                Ok(is_deleting(new) || !strategy.is_reconciled(new)?)
            })),
            DispatchPolicy::ChangeDetecting => Some(Arc::new(move |old: &Json, new: &Json| -> Result<bool, MetaError> {
                Ok(is_deleting(new)
                    || !strategy.is_reconciled(new)?
                    || labels(old) != labels(new)
                    || annotations(old) != annotations(new)
                    || !status_condition_aware_equal_value(old, new)?)
            })),
            DispatchPolicy::SpecStatusChange => Some(Arc::new(move |old: &Json, new: &Json| -> Result<bool, MetaError> {
                Ok(is_deleting(new) || !strategy.is_reconciled(new)? || !status_condition_aware_equal_value(old, new)?)
            })),
        }
    }

    pub fn enqueue_delete(&self) -> bool {
        !matches!(self, DispatchPolicy::UpsertOnly)
    }
}

impl fmt::Display for DispatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown dispatch policy {0:?} (expect default, upsert-only, delete-only, reconcilable, change or spec-status-change)")]
pub struct InvalidPolicy(pub String);

impl FromStr for DispatchPolicy {
    type Err = InvalidPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        match norm.as_str() {
            "default" => Ok(DispatchPolicy::Default),
            "upsert" | "upsert-only" => Ok(DispatchPolicy::UpsertOnly),
            "delete" | "delete-only" => Ok(DispatchPolicy::DeleteOnly),
            "reconcilable" => Ok(DispatchPolicy::Reconcilable),
            "change" | "change-detecting" => Ok(DispatchPolicy::ChangeDetecting),
            "spec-status-change" | "spec-status" => Ok(DispatchPolicy::SpecStatusChange),
            _ => Err(InvalidPolicy(s.to_string())),
        }
    }
}
