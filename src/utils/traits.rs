use serde::{de::DeserializeOwned, Serialize};

use crate::error::{FsError, Result};

/// Trait for an object which stores its own digest
pub trait DigestInSelf {
    /// recompute and store the digest
    fn digest(&mut self) -> Result<()>;
    /// check the stored digest against the contents
    fn verify_digest(&mut self) -> Result<bool>;
}

/// Trait for serializing and deserializing an object which stores digest in the object itself
/// # Note
/// This trait is implemented for types implementing
/// [Serialize] and [DeserializeOwned] and [DigestInSelf]
pub trait SerializeAndDigest: Serialize + DeserializeOwned + DigestInSelf {
    /// seal the digest and serialize into a [Vec](std::vec::Vec)
    fn serialize_to_vec(&mut self) -> Result<Vec<u8>> {
        self.digest()?;
        let config = bincode::config::legacy();
        bincode::serde::encode_to_vec(&*self, config)
            .map_err(|e| FsError::Format(format!("serialize failed: {e}")))
    }

    /// serialize into the front of `buf`
    /// # Returns
    /// The number of bytes written if successful
    fn serialize_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        let encoded = self.serialize_to_vec()?;
        let available = buf.len();
        let dst = buf.get_mut(..encoded.len()).ok_or_else(|| {
            FsError::Format(format!(
                "serialized record needs {} bytes, only {available} available",
                encoded.len()
            ))
        })?;
        dst.copy_from_slice(&encoded);
        Ok(encoded.len())
    }

    /// deserialize from a slice
    /// # Returns
    /// A tuple containing the deserialized object and the number of bytes read
    fn deserialize_from(buf: &[u8]) -> Result<(Self, usize)> {
        let config = bincode::config::legacy();
        let (mut object, bytes_read): (Self, usize) =
            bincode::serde::decode_from_slice(buf, config)
                .map_err(|e| FsError::Format(format!("deserialize failed: {e}")))?;
        if !object.verify_digest()? {
            Err(FsError::Format(
                "deserialized object digest verification failed".into(),
            ))
        } else {
            Ok((object, bytes_read))
        }
    }
}
