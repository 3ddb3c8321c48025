//! Admission request records built from kube's `admission.k8s.io`
//! `AdmissionReview` types, and the responses sent back through them.

use std::fmt;
use std::str::FromStr;

use kube::core::{
    admission::{self, AdmissionResponse, AdmissionReview, Operation, META_API_VERSION_V1, META_KIND},
    DynamicObject, GroupVersionKind, Status, TypeMeta,
};

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("malformed AdmissionReview: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("AdmissionReview has no request")]
    MissingRequest(#[from] admission::ConvertAdmissionReviewError),
}

/// One admission request, with object payloads kept as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionRequest {
    pub uid: String,
    pub kind: GroupVersionKind,
    pub operation: Operation,
    pub sub_resource: Option<String>,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub object: Option<Vec<u8>>,
    pub old_object: Option<Vec<u8>>,
    /// apiVersion/kind of the enclosing review, echoed on the reply.
    pub review_types: TypeMeta,
}

impl AdmissionRequest {
    pub fn new(kind: GroupVersionKind, operation: Operation) -> Self {
        Self {
            uid: String::new(),
            kind,
            operation,
            sub_resource: None,
            namespace: None,
            name: None,
            object: None,
            old_object: None,
            review_types: TypeMeta { api_version: META_API_VERSION_V1.to_string(), kind: META_KIND.to_string() },
        }
    }

    pub fn has_sub_resource(&self) -> bool {
        self.sub_resource.as_deref().map_or(false, |s| !s.is_empty())
    }

    pub fn from_review(review: AdmissionReview<DynamicObject>) -> Result<Self, ReviewError> {
        let req: admission::AdmissionRequest<DynamicObject> = review.try_into()?;
        Self::try_from(req)
    }

    /// Parse an `AdmissionReview` JSON document.
    pub fn from_review_json(doc: serde_json::Value) -> Result<Self, ReviewError> {
        Self::from_review(serde_json::from_value(doc)?)
    }

    /// An allowing response addressed to this request.
    pub fn allow(&self) -> AdmissionResponse {
        let mut resp = AdmissionResponse::invalid("");
        resp.types = self.review_types.clone();
        resp.uid = self.uid.clone();
        resp.allowed = true;
        resp.result = Status::default();
        resp
    }

    /// A denial carrying `reason` as a failure `Status` with its HTTP code.
    pub fn reject(&self, reason: StatusReason, message: impl Into<String>) -> AdmissionResponse {
        let message = message.into();
        let mut resp = self.allow().deny(&message);
        resp.result = Status::failure(&message, reason.as_str()).with_code(reason.code());
        resp
    }
}

impl TryFrom<admission::AdmissionRequest<DynamicObject>> for AdmissionRequest {
    type Error = ReviewError;

    fn try_from(req: admission::AdmissionRequest<DynamicObject>) -> Result<Self, Self::Error> {
        let raw = |obj: Option<DynamicObject>| obj.map(|o| serde_json::to_vec(&o)).transpose();
        Ok(Self {
            uid: req.uid,
            kind: req.kind,
            operation: req.operation,
            sub_resource: req.sub_resource.filter(|s| !s.is_empty()),
            namespace: req.namespace.filter(|s| !s.is_empty()),
            name: Some(req.name).filter(|s| !s.is_empty()),
            object: raw(req.object)?,
            old_object: raw(req.old_object)?,
            review_types: req.types,
        })
    }
}

/// Why a request was not admitted as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusReason {
    ServiceUnavailable,
    BadRequest,
    Forbidden,
    InternalError,
}

impl StatusReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusReason::ServiceUnavailable => "ServiceUnavailable",
            StatusReason::BadRequest => "BadRequest",
            StatusReason::Forbidden => "Forbidden",
            StatusReason::InternalError => "InternalError",
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            StatusReason::ServiceUnavailable => 503,
            StatusReason::BadRequest => 400,
            StatusReason::Forbidden => 403,
            StatusReason::InternalError => 500,
        }
    }

    /// Reason of a denied response; `None` when it was allowed.
    pub fn of(resp: &AdmissionResponse) -> Option<Self> {
        if resp.allowed {
            return None;
        }
        resp.result.reason.parse().ok()
    }
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ServiceUnavailable" => Ok(StatusReason::ServiceUnavailable),
            "BadRequest" => Ok(StatusReason::BadRequest),
            "Forbidden" => Ok(StatusReason::Forbidden),
            "InternalError" => Ok(StatusReason::InternalError),
            other => Err(format!("unknown status reason {}", other)),
        }
    }
}
