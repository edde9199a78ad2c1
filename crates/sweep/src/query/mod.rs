//! Provider search-query construction
//!
//! Turns a structured [`Filter`] into a Gmail search string. Free-text
//! values (sender, label) are always quoted and escaped so they cannot
//! widen the query with extra operators.

mod builder;
mod filter;

pub use builder::{build_query, quote_value};
pub use filter::{Category, Filter, FilterError};
