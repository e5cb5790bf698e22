use bincode::config;
use serde::Serialize;

use crate::error::{FsError, Result};

/// cacluate [blake3] hash of a serializable object
pub fn digest<T: Serialize>(t: &T) -> Result<[u8; 32]> {
    let mut hasher = blake3::Hasher::new();
    let config = config::legacy();
    let encoded = bincode::serde::encode_to_vec(t, config)
        .map_err(|e| FsError::Format(format!("encode for digest failed: {e}")))?;
    hasher.update(&encoded);
    let mut hash = hasher.finalize_xof();
    let mut output = [0u8; 32];
    hash.fill(&mut output);
    Ok(output)
}
