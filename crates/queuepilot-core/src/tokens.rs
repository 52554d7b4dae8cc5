//! Rough token counts for prompts, used to warn before a local model's
//! context window is exceeded.

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

fn encoder() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| match tiktoken_rs::cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            log::warn!("cl100k encoder unavailable, falling back to length estimate: {}", e);
            None
        }
    })
    .as_ref()
}

/// Token count of `text` under the cl100k encoding, or a quarter of its byte
/// length when the encoder cannot be built.
pub fn estimate_tokens(text: &str) -> usize {
    match encoder() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.len() / 4,
    }
}
