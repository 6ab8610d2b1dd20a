//! Minimal Anthropic Messages client.
//!
//! One job: send a system + user prompt and force the model to answer through
//! a single tool whose input schema is derived from a Rust type. The caller
//! gets back the raw tool input (`extract_value`) and deserializes it against
//! the same [`StructuredOutput`] type that produced the schema.

pub mod claude;
pub mod schema;

pub use claude::Claude;
pub use schema::StructuredOutput;
