use std::{fs, io};

use base16ct::lower::encode_string;
use sha2::{Digest, Sha256};

pub mod data;
pub mod payloads;

/// SHA-256 of a whole file, as the lowercase hex string the API stores in
/// the `checksum` field.
pub fn hash_file(mut file: fs::File) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let rv: [u8; 32] = hasher.finalize().into();
    Ok(encode_string(&rv))
}
