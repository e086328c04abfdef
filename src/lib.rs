#![warn(
    clippy::redundant_clone,
    clippy::doc_markdown,
    missing_debug_implementations
)]

pub mod formula;
pub mod ingest;
pub mod preprocess;
pub mod trace;
pub mod utils;
