//! Gzip payload decoding.
//!
//! Bodies arrive gzip-wrapped together with a `content-length` property that
//! declares the uncompressed size. The declared size only seeds the output
//! buffer; the decoder's own output count decides where the text ends.

use std::io::Read as _;

use flate2::read::GzDecoder;
use serde::Deserialize;

use crate::utils::error::DecodeError;

/// Initial output capacity is `declared content length * multiplier`.
pub const DEFAULT_BUFFER_MULTIPLIER: usize = 8;

/// Hard ceiling on decompressed output, whatever the policy.
pub const MAX_DECOMPRESSED_SIZE_BYTES: usize = 64 * 1024 * 1024;

/// Smallest possible gzip member: 10 byte header, 2 byte empty deflate block,
/// 8 byte trailer.
const GZIP_MIN_LEN: usize = 20;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZIP_METHOD_DEFLATE: u8 = 0x08;

/// What to do when the payload expands past the initial buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityPolicy {
    /// Keep growing up to the hard ceiling.
    #[default]
    Grow,
    /// Reject anything larger than `declared * multiplier`.
    Strict,
}

impl std::str::FromStr for CapacityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grow" => Ok(Self::Grow),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unknown capacity policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Decompressor {
    multiplier: usize,
    policy: CapacityPolicy,
    max_output: usize,
}

impl Default for Decompressor {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_MULTIPLIER, CapacityPolicy::default())
    }
}

impl Decompressor {
    pub fn new(multiplier: usize, policy: CapacityPolicy) -> Self {
        Self {
            multiplier,
            policy,
            max_output: MAX_DECOMPRESSED_SIZE_BYTES,
        }
    }

    /// Lower the hard ceiling (mostly useful in tests).
    pub fn with_max_output(mut self, max_output: usize) -> Self {
        self.max_output = max_output;
        self
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    /// Buffer size the decoder starts with for a given declared length.
    pub fn initial_capacity(&self, declared_content_length: usize) -> usize {
        declared_content_length
            .saturating_mul(self.multiplier)
            .min(self.max_output)
    }

    fn output_limit(&self, declared_content_length: usize) -> usize {
        match self.policy {
            CapacityPolicy::Grow => self.max_output,
            CapacityPolicy::Strict => self.initial_capacity(declared_content_length),
        }
    }

    /// Decode a gzip body into text.
    ///
    /// Invalid UTF-8 is replaced rather than rejected. NUL bytes are kept.
    pub fn decompress(
        &self,
        input: &[u8],
        declared_content_length: usize,
    ) -> Result<String, DecodeError> {
        check_header(input)?;

        let limit = self.output_limit(declared_content_length);
        let mut decoder = GzDecoder::new(input);
        let mut output = Vec::with_capacity(self.initial_capacity(declared_content_length));

        // One byte past the limit tells "exactly full" apart from "overflowed".
        let read = (&mut decoder)
            .take(limit as u64 + 1)
            .read_to_end(&mut output);
        if let Err(err) = read {
            return Err(if output.is_empty() && decoder.header().is_none() {
                DecodeError::InitFailed(err.to_string())
            } else {
                DecodeError::InflateFailed(err.to_string())
            });
        }
        if output.len() > limit {
            return Err(DecodeError::CapacityExceeded { capacity: limit });
        }

        Ok(match String::from_utf8(output) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        })
    }
}

/// Decode with the default multiplier and growth policy.
pub fn decompress(input: &[u8], declared_content_length: usize) -> Result<String, DecodeError> {
    Decompressor::default().decompress(input, declared_content_length)
}

fn check_header(input: &[u8]) -> Result<(), DecodeError> {
    if input.len() < GZIP_MIN_LEN {
        return Err(DecodeError::InitFailed(format!(
            "{} bytes is shorter than the smallest gzip stream",
            input.len()
        )));
    }
    if input[..2] != GZIP_MAGIC {
        return Err(DecodeError::InitFailed(format!(
            "bad gzip magic {:02x} {:02x}",
            input[0], input[1]
        )));
    }
    if input[2] != GZIP_METHOD_DEFLATE {
        return Err(DecodeError::InitFailed(format!(
            "unsupported compression method {:#04x}",
            input[2]
        )));
    }
    Ok(())
}
