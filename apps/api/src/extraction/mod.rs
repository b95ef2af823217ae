// Resume extraction: normalize → complete → parse → reconcile.
// The only network call goes through llm_client.

pub mod documents;
pub mod handlers;
pub mod normalizer;
pub mod parser;
pub mod pipeline;
pub mod reconciler;

use thiserror::Error;

use crate::extraction::parser::PayloadError;
use crate::llm_client::CompletionError;

/// Failure of the extraction pipeline. Every stage surfaces its own error; none retries.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}
