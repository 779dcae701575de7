//! Framed AES-256-GCM stream format
//!
//! ```text
//! header:  "WKSEAL1\0" | nonce prefix (7 bytes)
//! frame:   flag (1 byte, 1 = final) | length (u32 BE) | ciphertext + tag
//! nonce:   prefix (7) | frame counter (u32 BE) | flag (1)
//! ```
//!
//! The counter and final flag are bound into each nonce, so reordered,
//! dropped or truncated frames fail authentication.

use std::io::{self, Read, Write};

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};

use super::ArchiveKey;

const MAGIC: &[u8; 8] = b"WKSEAL1\0";
const PREFIX_SIZE: usize = 7;
const TAG_SIZE: usize = 16;

/// Plaintext bytes per frame
pub const FRAME_SIZE: usize = 64 * 1024;

const FLAG_MORE: u8 = 0;
const FLAG_FINAL: u8 = 1;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn frame_nonce(prefix: &[u8; PREFIX_SIZE], counter: u32, flag: u8) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..PREFIX_SIZE].copy_from_slice(prefix);
    nonce[PREFIX_SIZE..PREFIX_SIZE + 4].copy_from_slice(&counter.to_be_bytes());
    nonce[11] = flag;
    nonce
}

fn cipher(key: &ArchiveKey) -> io::Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|e| invalid(format!("bad key: {}", e)))
}

/// Fill `buf` from `input`, stopping early only at end of input
fn read_full(input: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

struct FrameWriter<'a, W: Write> {
    cipher: Aes256Gcm,
    prefix: [u8; PREFIX_SIZE],
    counter: u32,
    output: &'a mut W,
    written: u64,
}

impl<W: Write> FrameWriter<'_, W> {
    fn write_frame(&mut self, plaintext: &[u8], flag: u8) -> io::Result<()> {
        let nonce = frame_nonce(&self.prefix, self.counter, flag);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| invalid("frame encryption failed"))?;

        self.output.write_all(&[flag])?;
        self.output
            .write_all(&(ciphertext.len() as u32).to_be_bytes())?;
        self.output.write_all(&ciphertext)?;
        self.written += 5 + ciphertext.len() as u64;

        self.counter = self
            .counter
            .checked_add(1)
            .ok_or_else(|| invalid("stream too long for one nonce prefix"))?;
        Ok(())
    }
}

/// Encrypt everything from `input` into `output`; returns bytes written
pub fn seal(input: &mut impl Read, output: &mut impl Write, key: &ArchiveKey) -> io::Result<u64> {
    let mut prefix = [0u8; PREFIX_SIZE];
    OsRng.fill_bytes(&mut prefix);

    output.write_all(MAGIC)?;
    output.write_all(&prefix)?;

    let mut frames = FrameWriter {
        cipher: cipher(key)?,
        prefix,
        counter: 0,
        output,
        written: (MAGIC.len() + PREFIX_SIZE) as u64,
    };

    // One frame is held back so the final flag lands on the true last frame.
    let mut pending: Option<Vec<u8>> = None;
    loop {
        let mut chunk = vec![0u8; FRAME_SIZE];
        let n = read_full(input, &mut chunk)?;
        chunk.truncate(n);
        let at_end = n < FRAME_SIZE;

        if let Some(prev) = pending.take() {
            if at_end && chunk.is_empty() {
                frames.write_frame(&prev, FLAG_FINAL)?;
                break;
            }
            frames.write_frame(&prev, FLAG_MORE)?;
        }

        if at_end {
            frames.write_frame(&chunk, FLAG_FINAL)?;
            break;
        }
        pending = Some(chunk);
    }

    frames.output.flush()?;
    Ok(frames.written)
}

/// Decrypt a sealed stream from `input` into `output`; returns plaintext bytes
pub fn open(input: &mut impl Read, output: &mut impl Write, key: &ArchiveKey) -> io::Result<u64> {
    let mut header = [0u8; 8 + PREFIX_SIZE];
    if read_full(input, &mut header)? != header.len() || &header[..8] != MAGIC {
        return Err(invalid("not a sealed stream"));
    }
    let mut prefix = [0u8; PREFIX_SIZE];
    prefix.copy_from_slice(&header[8..]);

    let cipher = cipher(key)?;
    let mut counter: u32 = 0;
    let mut plaintext_len = 0u64;

    loop {
        let mut frame_header = [0u8; 5];
        if read_full(input, &mut frame_header)? != frame_header.len() {
            return Err(invalid("sealed stream truncated before final frame"));
        }
        let flag = frame_header[0];
        let len = u32::from_be_bytes([
            frame_header[1],
            frame_header[2],
            frame_header[3],
            frame_header[4],
        ]) as usize;
        if flag > FLAG_FINAL || len < TAG_SIZE || len > FRAME_SIZE + TAG_SIZE {
            return Err(invalid("corrupt frame header"));
        }

        let mut ciphertext = vec![0u8; len];
        if read_full(input, &mut ciphertext)? != len {
            return Err(invalid("sealed stream truncated inside a frame"));
        }

        let nonce = frame_nonce(&prefix, counter, flag);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| invalid("frame authentication failed: wrong key or corrupted data"))?;
        output.write_all(&plaintext)?;
        plaintext_len += plaintext.len() as u64;

        if flag == FLAG_FINAL {
            let mut probe = [0u8; 1];
            if read_full(input, &mut probe)? != 0 {
                return Err(invalid("data after final frame"));
            }
            output.flush()?;
            return Ok(plaintext_len);
        }

        counter = counter
            .checked_add(1)
            .ok_or_else(|| invalid("frame counter overflow"))?;
    }
}
