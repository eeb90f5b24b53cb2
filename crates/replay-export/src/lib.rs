//! Callback delivery for CPEE Replay
//!
//! Sends replayed responses to the callback URL of the waiting process
//! engine as multipart PUT requests.

pub mod callback;
pub mod payload;

pub use callback::{CallbackConfig, CallbackDelivery, DeliveryStats, ExportError};
pub use payload::{build_parts, decode_content, CallbackPart};
