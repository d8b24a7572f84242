//! Client side of bulk ingestion: turn a spreadsheet export into product
//! records, preview them, and submit the whole batch in one request.

pub mod client;
pub mod parse;

pub use client::{IngestClient, render_failure, render_summary};
pub use parse::parse_path;
