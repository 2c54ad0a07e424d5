//! Protocol envelope and error model.
//!
//! # Responsibility
//! - Define value types exchanged with the transport boundary.
//! - Keep serialization shapes stable for external consumers.
//!
//! # Invariants
//! - Types here hold no behavior beyond construction and lookup.

pub mod envelope;
pub mod error;

pub use envelope::{
    CallData, ExtensionInvocation, ExtensionOutput, ProtocolInfo, RequestEnvelope,
    ResponseEnvelope, ResponseOutcome, PROTOCOL_NAME, PROTOCOL_VERSION,
};
pub use error::{mask_secret, ErrorCode, ErrorObject, ErrorSource, ErrorSourceShapeError};
