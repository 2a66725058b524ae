//! SWP: searchable symmetric encryption for the SEARCH onion.
//!
//! A document is tokenized into alternating word and separator runs, each
//! chunked to at most [`MAX_PIECE_BYTES`] bytes, and every piece becomes
//! one 16-byte block `x ⊕ (S_i ‖ F_kw(S_i))` where
//!
//! - `x` is the piece encrypted in one AES block under the word key,
//! - `S_i` is a position-keyed stream salt,
//! - `kw` is a PRF of the left half of `x`,
//! - `F` is an 8-byte PRF tag.
//!
//! A token for word `w` carries `(x, kw)` and lets anyone — in particular
//! the backend UDF — test whether any block hides `w`, with a false
//! positive probability of 2⁻⁶⁴ per block and no false negatives. With the
//! key, the whole block list decrypts back to the exact original text,
//! separators included.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt};
use aes::Aes128;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::aes128;
use crate::error::Error;

type HmacSha256 = Hmac<Sha256>;

/// Size of one searchable block.
pub const SWP_BLOCK_BYTES: usize = 16;

/// Longest document piece per block: one length byte plus the piece.
pub const MAX_PIECE_BYTES: usize = SWP_BLOCK_BYTES - 1;

/// A search token: everything the match test needs, nothing it does not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchToken {
    x: [u8; SWP_BLOCK_BYTES],
    word_key: [u8; SWP_BLOCK_BYTES],
}

impl SearchToken {
    /// Serializes the token for transport to the backend UDF.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 * SWP_BLOCK_BYTES);
        out.extend_from_slice(&self.x);
        out.extend_from_slice(&self.word_key);
        out
    }

    /// Parses a token serialized by [`SearchToken::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] on a length mismatch.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        if data.len() != 2 * SWP_BLOCK_BYTES {
            return Err(Error::crypto("search token must be 32 bytes"));
        }
        let mut x = [0u8; SWP_BLOCK_BYTES];
        let mut word_key = [0u8; SWP_BLOCK_BYTES];
        x.copy_from_slice(&data[..SWP_BLOCK_BYTES]);
        word_key.copy_from_slice(&data[SWP_BLOCK_BYTES..]);
        Ok(Self { x, word_key })
    }
}

/// A keyed SWP encoder for one (column, layer) pair.
pub struct Swp {
    word_cipher: Aes128,
    blind_key: [u8; SWP_BLOCK_BYTES],
    stream_cipher: Aes128,
}

impl Swp {
    /// Derives the three internal keys from one 16-byte layer key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the key length is wrong.
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        if key.len() != SWP_BLOCK_BYTES {
            return Err(Error::crypto(format!("SWP key must be 16 bytes, got {}", key.len())));
        }
        Ok(Self {
            word_cipher: aes128(&prf16(key, b"swp:word"))?,
            blind_key: prf16(key, b"swp:blind"),
            stream_cipher: aes128(&prf16(key, b"swp:stream"))?,
        })
    }

    /// Encodes a document into its searchable block list.
    #[must_use]
    pub fn encode_document(&self, text: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for (index, piece) in pieces(text).enumerate() {
            out.extend_from_slice(&self.encode_piece(piece, index as u64));
        }
        out
    }

    /// Decodes a block list back to the exact original text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the input is not a whole number of
    /// blocks or a block decodes to a malformed piece.
    pub fn decode_document(&self, ct: &[u8]) -> Result<Vec<u8>, Error> {
        if ct.len() % SWP_BLOCK_BYTES != 0 {
            return Err(Error::crypto(format!(
                "SWP document length {} is not a multiple of {SWP_BLOCK_BYTES}",
                ct.len()
            )));
        }
        let mut out = Vec::new();
        for (index, block) in ct.chunks_exact(SWP_BLOCK_BYTES).enumerate() {
            out.extend_from_slice(&self.decode_piece(block, index as u64)?);
        }
        Ok(out)
    }

    /// Builds the search token for `word`. Only the first
    /// [`MAX_PIECE_BYTES`] bytes of a word participate in matching.
    #[must_use]
    pub fn token(&self, word: &[u8]) -> SearchToken {
        let piece = &word[..word.len().min(MAX_PIECE_BYTES)];
        let x = self.word_block(piece);
        SearchToken { x, word_key: prf16(&self.blind_key, &x[..8]) }
    }

    fn encode_piece(&self, piece: &[u8], index: u64) -> [u8; SWP_BLOCK_BYTES] {
        debug_assert!(!piece.is_empty() && piece.len() <= MAX_PIECE_BYTES);
        let x = self.word_block(piece);
        let s = self.stream_salt(index);
        let kw = prf16(&self.blind_key, &x[..8]);
        let f = prf8(&kw, &s);

        let mut block = [0u8; SWP_BLOCK_BYTES];
        for i in 0..8 {
            block[i] = x[i] ^ s[i];
            block[i + 8] = x[i + 8] ^ f[i];
        }
        block
    }

    fn decode_piece(&self, block: &[u8], index: u64) -> Result<Vec<u8>, Error> {
        let s = self.stream_salt(index);
        let mut x = [0u8; SWP_BLOCK_BYTES];
        for i in 0..8 {
            x[i] = block[i] ^ s[i];
        }
        let kw = prf16(&self.blind_key, &x[..8]);
        let f = prf8(&kw, &s);
        for i in 0..8 {
            x[i + 8] = block[i + 8] ^ f[i];
        }

        let mut ga = GenericArray::from(x);
        self.word_cipher.decrypt_block(&mut ga);
        let len = ga[0] as usize;
        if len == 0 || len > MAX_PIECE_BYTES {
            return Err(Error::crypto("SWP block decodes to a malformed piece"));
        }
        Ok(ga[1..=len].to_vec())
    }

    /// One invertible AES block holding `len ‖ piece ‖ zero padding`.
    fn word_block(&self, piece: &[u8]) -> [u8; SWP_BLOCK_BYTES] {
        let mut block = [0u8; SWP_BLOCK_BYTES];
        block[0] = u8::try_from(piece.len()).expect("piece fits one block");
        block[1..=piece.len()].copy_from_slice(piece);
        let mut ga = GenericArray::from(block);
        self.word_cipher.encrypt_block(&mut ga);
        ga.into()
    }

    fn stream_salt(&self, index: u64) -> [u8; 8] {
        let mut block = [0u8; SWP_BLOCK_BYTES];
        block[..8].copy_from_slice(&index.to_be_bytes());
        let mut ga = GenericArray::from(block);
        self.stream_cipher.encrypt_block(&mut ga);
        let mut s = [0u8; 8];
        s.copy_from_slice(&ga[..8]);
        s
    }
}

/// Tests whether one block hides the token's word. Needs no key: this is
/// what the backend UDF runs.
#[must_use]
pub fn matches(token: &SearchToken, block: &[u8; SWP_BLOCK_BYTES]) -> bool {
    let mut s = [0u8; 8];
    let mut f = [0u8; 8];
    for i in 0..8 {
        s[i] = block[i] ^ token.x[i];
        f[i] = block[i + 8] ^ token.x[i + 8];
    }
    prf8(&token.word_key, &s) == f
}

/// Tests whether a block list contains the token's word.
///
/// # Errors
///
/// Returns [`Error::Crypto`] if the list is not a whole number of blocks.
pub fn search(token: &SearchToken, document: &[u8]) -> Result<bool, Error> {
    if document.len() % SWP_BLOCK_BYTES != 0 {
        return Err(Error::crypto(format!(
            "SWP document length {} is not a multiple of {SWP_BLOCK_BYTES}",
            document.len()
        )));
    }
    Ok(document.chunks_exact(SWP_BLOCK_BYTES).any(|chunk| {
        let mut block = [0u8; SWP_BLOCK_BYTES];
        block.copy_from_slice(chunk);
        matches(token, &block)
    }))
}

/// Splits text into alternating word and separator runs, then chunks each
/// run to [`MAX_PIECE_BYTES`]; concatenating the pieces reproduces the
/// text byte-exactly.
fn pieces(text: &[u8]) -> impl Iterator<Item = &[u8]> + '_ {
    let mut runs = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let is_word = text[start].is_ascii_alphanumeric();
        let mut end = start;
        while end < text.len() && text[end].is_ascii_alphanumeric() == is_word {
            end += 1;
        }
        runs.push(&text[start..end]);
        start = end;
    }
    runs.into_iter().flat_map(|run| run.chunks(MAX_PIECE_BYTES))
}

fn prf16(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

fn prf8(key: &[u8], data: &[u8]) -> [u8; 8] {
    let full = prf16(key, data);
    let mut out = [0u8; 8];
    out.copy_from_slice(&full[..8]);
    out
}
