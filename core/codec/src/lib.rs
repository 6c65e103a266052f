//! Load and save encrypted legacy save files.
//!
//! This crate ties the cipher and graph layers together:
//! - `SaveCodec` runs the chunked read/decrypt/decode pipeline and its
//!   mirror, with progress reporting and cooperative cancellation
//! - The document bridge maps a decoded graph to a `SaveDocument` by field
//!   name and writes edits back into the same graph
//! - `CodecConfig` carries the key material, chunk size and forwarding
//!   rules supplied at startup

pub mod bridge;
pub mod config;
pub mod document;
pub mod pipeline;
pub mod progress;

pub use bridge::{apply_document, document_from_graph, document_to_graph};
pub use config::CodecConfig;
pub use document::SaveDocument;
pub use pipeline::{LoadedSave, SaveCodec};
pub use progress::{cancel_after, Outcome, ProgressReporter};

pub use tokio_util::sync::CancellationToken;
