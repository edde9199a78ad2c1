//! Message export
//!
//! Fetched messages are flattened into CSV rows; bodies are decoded to
//! plain text first.

mod body;
mod table;

pub use body::{decode_base64_body, plain_text_body};
pub use table::{CSV_COLUMNS, messages_to_csv};
