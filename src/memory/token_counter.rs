//! Token counting for the dialogue window.
//!
//! The tokenizer is selected by a model-name hint. Hints tiktoken does not
//! know fall back to `cl100k_base`; if no BPE can be built at all, a
//! byte-length estimate is used. None of these paths is fatal.

use tiktoken_rs::CoreBPE;
use tracing::{error, warn};

/// Approximate bytes per token when no encoder is available
const APPROX_BYTES_PER_TOKEN: usize = 4;

/// Encoding used when the model hint has no known tokenizer
pub const FALLBACK_ENCODING: &str = "cl100k_base";

/// Converts text to an integer cost
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// tiktoken-backed counter resolved from a model-name hint
pub struct TiktokenCounter {
    encoder: Option<CoreBPE>,
    encoding: &'static str,
}

impl std::fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenCounter")
            .field("encoding", &self.encoding)
            .field("encoder", &self.encoder.as_ref().map(|_| "<CoreBPE>"))
            .finish()
    }
}

impl TiktokenCounter {
    /// Resolve the tokenizer for `model`, falling back to `cl100k_base`.
    pub fn for_model(model: &str) -> Self {
        match tiktoken_rs::get_bpe_from_model(model) {
            Ok(encoder) => Self {
                encoder: Some(encoder),
                encoding: "model",
            },
            Err(e) => {
                warn!(
                    "No tokenizer for model '{}' ({}). Using '{}'.",
                    model, e, FALLBACK_ENCODING
                );
                Self::fallback()
            }
        }
    }

    /// Counter using the generic fallback encoding
    pub fn fallback() -> Self {
        match tiktoken_rs::cl100k_base() {
            Ok(encoder) => Self {
                encoder: Some(encoder),
                encoding: FALLBACK_ENCODING,
            },
            Err(e) => {
                error!(
                    "Failed to initialize {} encoder ({}). Falling back to byte-length estimates.",
                    FALLBACK_ENCODING, e
                );
                Self {
                    encoder: None,
                    encoding: "bytes",
                }
            }
        }
    }

    /// Name of the encoding in use ("model", "cl100k_base" or "bytes")
    pub fn encoding(&self) -> &'static str {
        self.encoding
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        match &self.encoder {
            Some(encoder) => encoder.encode_ordinary(text).len(),
            None => text.len().div_ceil(APPROX_BYTES_PER_TOKEN),
        }
    }
}
