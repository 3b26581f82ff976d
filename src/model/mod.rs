//! Canonical message record shared by every pipeline stage.

pub mod address;
pub mod attachment;
pub mod mail;

pub use address::EmailAddress;
pub use attachment::{normalize_content_id, Attachment};
pub use mail::Message;
