pub mod signature;
pub mod types;

pub use signature::SignatureVerifier;
pub use types::{Comment, EventKind, InboundEvent};
