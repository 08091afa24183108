//! # tessera-protocol
//!
//! Adapter between the transport and the enrollment/signing service, whose
//! frames follow no envelope shape:
//!
//! - [`frame`]: tolerant parsing of inbound text
//! - [`classify`]: ordered predicate chain producing a [`ClassifiedEvent`]
//! - [`encode`]: flattened `{Method, ...}` frames for coordinator calls
//! - [`EnrollmentCodec`]: both directions as a transport [`Codec`](tessera_transport::Codec)

#![deny(unsafe_code)]

pub mod classify;
pub mod codec;
pub mod encode;
pub mod event;
pub mod frame;

pub use classify::{classify, classify_kind, classify_text, markers};
pub use codec::EnrollmentCodec;
pub use encode::{encode_envelope, method};
pub use event::{
    ClassifiedEvent, EnrollmentResult, EnrollmentStatus, EventKind, ManagerInfo, PinSerial,
    SignResult, Unknown, WrongPin,
};
