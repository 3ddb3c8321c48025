//! kgate admission: mediates admission requests for one kind at a time.
//!
//! Payloads are decoded from whichever served version they arrive in,
//! converted to the hub version for the handler, and any mutation is returned
//! as a JSON patch against the original wire version.

#![forbid(unsafe_code)]

pub mod daemonset;
pub mod engine;
pub mod handler;
pub mod job;
pub mod review;
pub mod version;

pub use daemonset::{DaemonSetVersion, TEMPLATE_GENERATION_ANNOTATION};
pub use engine::{AdmissionEngine, AdmissionError};
pub use handler::{HandlerFuncs, ResourceHandler};
pub use job::JobVersion;
pub use kube::core::admission::{AdmissionResponse, AdmissionReview, Operation};
pub use review::{AdmissionRequest, ReviewError, StatusReason};
pub use version::{decode, encode, ConversionError, Decoded, WireVersion};
