//! Chunk file pipeline
//!
//! A chunk is a sealed buffer on disk:
//!
//! ```text
//! [16-byte IV][AES-256-CBC(zstd(raw record bytes)), PKCS#7 padded]
//! ```
//!
//! The IV is generated fresh per chunk and stored in plaintext as the first
//! 16 bytes. Compression runs at a high level: chunks are written once and
//! read many times, so ratio wins over speed. Decompression must reproduce
//! exactly the byte count recorded in the chunk descriptor; anything else
//! is treated as corruption.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use super::errors::{CellarError, CellarResult};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Symmetric key size in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Initialization vector size in bytes (AES block size).
pub(crate) const IV_SIZE: usize = 16;

const CIPHER_BLOCK: usize = 16;

/// Ratio over speed; chunks are written once.
const COMPRESSION_LEVEL: i32 = 19;

/// Compress and encrypt `src` into a chunk file at `path`.
///
/// `src` must be limited to exactly the bytes being sealed (the buffer's
/// live prefix, never its preallocated padding). Returns the chunk's size
/// on disk, IV included.
pub(crate) fn write_chunk(
    src: impl Read,
    path: &Path,
    key: &[u8; KEY_SIZE],
) -> CellarResult<u64> {
    let mut compressed = Vec::new();
    zstd::stream::copy_encode(src, &mut compressed, COMPRESSION_LEVEL)?;

    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|_| CellarError::Format("invalid key or IV length".to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(&compressed);

    let mut file = File::create(path)?;
    file.write_all(&iv)?;
    file.write_all(&ciphertext)?;
    file.sync_all()?;

    Ok((IV_SIZE + ciphertext.len()) as u64)
}

/// Decrypt and decompress the chunk at `path` into `out`.
///
/// `out` must be sized to the chunk's recorded uncompressed byte size; the
/// stream has to fill it exactly.
pub(crate) fn read_chunk(path: &Path, key: &[u8; KEY_SIZE], out: &mut [u8]) -> CellarResult<()> {
    let data = std::fs::read(path)?;
    if data.len() < IV_SIZE + CIPHER_BLOCK {
        return Err(CellarError::Format(format!(
            "chunk file {} holds {} bytes, too short for IV and one cipher block",
            path.display(),
            data.len()
        )));
    }

    let (iv, ciphertext) = data.split_at(IV_SIZE);
    if ciphertext.len() % CIPHER_BLOCK != 0 {
        return Err(CellarError::Format(format!(
            "chunk ciphertext length {} is not block aligned",
            ciphertext.len()
        )));
    }

    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| CellarError::Format("invalid key or IV length".to_string()))?;
    let compressed = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CellarError::Format("chunk padding is malformed".to_string()))?;

    let mut decoder = zstd::stream::read::Decoder::new(compressed.as_slice())
        .map_err(|err| CellarError::Format(format!("chunk frame is malformed: {err}")))?;
    decoder
        .read_exact(out)
        .map_err(|err| CellarError::Format(format!("chunk shorter than recorded size: {err}")))?;

    let mut probe = [0u8; 1];
    let extra = decoder
        .read(&mut probe)
        .map_err(|err| CellarError::Format(format!("chunk frame is malformed: {err}")))?;
    if extra != 0 {
        return Err(CellarError::Format(
            "chunk decompresses past its recorded size".to_string(),
        ));
    }

    Ok(())
}
