use std::borrow::Cow;
use std::io::Read;

use encoding_rs::{DecoderResult, Encoding, BIG5, GB18030, UTF_8, WINDOWS_1252};

use crate::error::GeoanchorError;

pub const DEFAULT_PROBE_BYTES: usize = 256 * 1024;

/// Superset first, then regional legacy encodings, then windows-1252.
///
/// windows-1252 maps every byte, so it always decodes cleanly and ends the
/// default list. Only custom lists without a single-byte encoding can reach
/// the permissive fallback.
pub fn default_candidates() -> Vec<&'static Encoding> {
    vec![UTF_8, GB18030, BIG5, WINDOWS_1252]
}

/// The encoding chosen for a source, plus how it was chosen
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedEncoding {
    pub encoding: &'static Encoding,
    /// Bytes of byte-order mark to skip at the start of the source
    pub bom_length: usize,
    /// True when no candidate decoded the probe cleanly
    pub fallback: bool,
}

impl ResolvedEncoding {
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Decodes one raw line. The flag is set when bytes had to be replaced.
    pub fn decode_line<'a>(&self, bytes: &'a [u8]) -> (Cow<'a, str>, bool) {
        self.encoding.decode_without_bom_handling(bytes)
    }
}

#[derive(Debug, Clone)]
pub struct EncodingResolver {
    candidates: Vec<&'static Encoding>,
    probe_bytes: usize,
}

impl Default for EncodingResolver {
    fn default() -> Self {
        EncodingResolver {
            candidates: default_candidates(),
            probe_bytes: DEFAULT_PROBE_BYTES,
        }
    }
}

impl EncodingResolver {
    pub fn new(candidates: Vec<&'static Encoding>) -> Result<EncodingResolver, GeoanchorError> {
        if candidates.is_empty() {
            return Err(GeoanchorError::Config(
                "At least one candidate encoding is required".to_owned(),
            ));
        }

        Ok(EncodingResolver {
            candidates,
            probe_bytes: DEFAULT_PROBE_BYTES,
        })
    }

    /// Builds a resolver from WHATWG labels such as `"utf-8"` or `"gbk"`
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Result<EncodingResolver, GeoanchorError> {
        let mut candidates = Vec::with_capacity(labels.len());
        for label in labels {
            let label = label.as_ref();
            match Encoding::for_label(label.trim().as_bytes()) {
                Some(encoding) => candidates.push(encoding),
                None => {
                    return Err(GeoanchorError::Config(format!(
                        "Unknown encoding label '{label}'"
                    )))
                }
            }
        }

        EncodingResolver::new(candidates)
    }

    pub fn with_probe_bytes(mut self, probe_bytes: usize) -> EncodingResolver {
        self.probe_bytes = probe_bytes.max(1);
        self
    }

    pub fn probe_bytes(&self) -> usize {
        self.probe_bytes
    }

    pub fn candidates(&self) -> &[&'static Encoding] {
        &self.candidates
    }

    /// Reads up to the probe size from `reader` and resolves against it
    pub fn resolve_reader<R: Read>(&self, reader: R) -> Result<ResolvedEncoding, GeoanchorError> {
        let mut prefix = Vec::with_capacity(self.probe_bytes.min(DEFAULT_PROBE_BYTES));
        reader
            .take(self.probe_bytes as u64)
            .read_to_end(&mut prefix)?;

        self.resolve(&prefix)
    }

    /// Picks the first candidate that decodes `prefix` without error.
    ///
    /// A UTF-8 byte-order mark short-circuits the probe. If no candidate
    /// decodes cleanly, the last one is returned with `fallback` set.
    pub fn resolve(&self, prefix: &[u8]) -> Result<ResolvedEncoding, GeoanchorError> {
        let prefix = &prefix[..prefix.len().min(self.probe_bytes)];

        if let Some((encoding, bom_length)) = Encoding::for_bom(prefix) {
            if encoding != UTF_8 {
                return Err(GeoanchorError::Input(format!(
                    "Source starts with a {} byte-order mark; only byte-oriented encodings are supported",
                    encoding.name()
                )));
            }
            return Ok(ResolvedEncoding {
                encoding,
                bom_length,
                fallback: false,
            });
        }

        for &encoding in &self.candidates {
            if decodes_cleanly(encoding, prefix) {
                return Ok(ResolvedEncoding {
                    encoding,
                    bom_length: 0,
                    fallback: false,
                });
            }
            log::debug!("probe rejected encoding {}", encoding.name());
        }

        // new() guarantees at least one candidate
        let last = self.candidates[self.candidates.len() - 1];
        log::warn!(
            "no candidate encoding decoded the source cleanly; using {} with replacement",
            last.name()
        );
        Ok(ResolvedEncoding {
            encoding: last,
            bom_length: 0,
            fallback: true,
        })
    }
}

/// A truncated multi-byte sequence at the very end of the probe is not an error
fn decodes_cleanly(encoding: &'static Encoding, bytes: &[u8]) -> bool {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut scratch = String::with_capacity(8192);
    let mut remaining = bytes;

    loop {
        let (result, read) = decoder.decode_to_string_without_replacement(remaining, &mut scratch, false);
        remaining = &remaining[read..];
        match result {
            DecoderResult::InputEmpty => return true,
            DecoderResult::Malformed(_, _) => return false,
            DecoderResult::OutputFull => {
                scratch.clear();
                if scratch.capacity() < 8192 {
                    scratch.reserve(8192);
                }
            }
        }
    }
}
