use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::LazyLock;
use std::task::{Context, Poll};

use regex::Regex;
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::{RegistryError, Result};

static DIGEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([a-z0-9]+):([a-f0-9]+)$").expect("digest regex"));

/// A content digest in `algorithm:hex` form.
///
/// Only sha256 is produced by this registry, but the parser accepts any
/// lowercase alphanumeric algorithm token followed by lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    pub algorithm: String,
    pub hex: String,
}

impl Digest {
    /// Parse a digest string, trimming surrounding whitespace first.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let captures = DIGEST_RE
            .captures(trimmed)
            .ok_or_else(|| RegistryError::InvalidDigest(s.to_string()))?;
        Ok(Digest {
            algorithm: captures[1].to_string(),
            hex: captures[2].to_string(),
        })
    }

    /// Compute the sha256 digest of a byte slice.
    pub fn sha256_of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Digest {
            algorithm: "sha256".to_string(),
            hex: format!("{:x}", hasher.finalize()),
        }
    }

    /// First two hex characters, used as a shard prefix to bound directory
    /// fan-out. Falls back to the whole string when shorter.
    pub fn short_hex(&self) -> &str {
        if self.hex.len() < 2 {
            &self.hex
        } else {
            &self.hex[..2]
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        Digest::parse(s)
    }
}

/// An `AsyncRead` adapter that mirrors every byte through a running sha256
/// hasher, so a single streaming pass yields both the payload and its digest.
pub struct VerifyingReader<R> {
    inner: R,
    hasher: Sha256,
    size: u64,
}

impl<R> VerifyingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// The digest of everything read so far.
    pub fn digest(&self) -> Digest {
        Digest {
            algorithm: "sha256".to_string(),
            hex: format!("{:x}", self.hasher.clone().finalize()),
        }
    }

    /// Cumulative number of bytes read.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Compare the computed digest against `expected`, algorithm and hex both.
    pub fn verify(&self, expected: &Digest) -> Result<()> {
        let computed = self.digest();
        if computed != *expected {
            return Err(RegistryError::DigestMismatch {
                expected: expected.to_string(),
                actual: computed.to_string(),
            });
        }
        Ok(())
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for VerifyingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let already_filled = buf.filled().len();
        let me = &mut *self;
        match Pin::new(&mut me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let new_bytes = &buf.filled()[already_filled..];
                me.hasher.update(new_bytes);
                me.size += new_bytes.len() as u64;
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}
