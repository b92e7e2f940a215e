//! Wire protocol for the supervisor's control channel: message framing,
//! codes, and session keys. Analogous in role to `habitat-launcher-protocol`,
//! but hand-framed (`<code><payload><NUL>`) instead of protobuf, per the
//! wrapper's own wire format.

pub mod error;
pub mod message;
pub mod session;

pub use error::{Error, Result};
pub use message::{Code, Decoder, LogLevel, Message};
pub use session::SessionKey;
