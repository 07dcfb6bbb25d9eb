//! Request signature verification.
//!
//! A signature is HMAC-SHA1 over the concatenation of request attributes in
//! the order of one configured attribute set. Optional operations may be
//! stripped from the transform string before verifying, so a signature keeps
//! validating when a client later adds or changes them.

use crate::error::{SignerError, SignerResult};
use crate::key::HmacKey;
use pigment_core::config::{HmacConfig, SignedAttribute};
use pigment_core::token::remove_letter;
use tracing::debug;

/// The signable parts of a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestData<'a> {
    pub hash: &'a str,
    /// Transform string without the leading `H` token.
    pub transformations: &'a str,
    /// Requested extension without the dot, or empty.
    pub format: &'a str,
}

impl RequestData<'_> {
    fn attribute(&self, attr: SignedAttribute) -> &str {
        match attr {
            SignedAttribute::Hash => self.hash,
            SignedAttribute::Transformations => self.transformations,
            SignedAttribute::Format => self.format,
        }
    }

    /// Concatenate the attributes of one set, with no delimiter.
    pub fn signing_input(&self, attributes: &[SignedAttribute]) -> String {
        attributes.iter().map(|a| self.attribute(*a)).collect()
    }
}

/// Signs and verifies requests.
#[derive(Debug, Clone)]
pub struct HmacSigner {
    key: HmacKey,
    attribute_sets: Vec<Vec<SignedAttribute>>,
    /// Every non-empty subset of the optional operation letters.
    optional_subsets: Vec<Vec<char>>,
    required: bool,
}

impl HmacSigner {
    pub fn new(key: HmacKey, attribute_sets: Vec<Vec<SignedAttribute>>) -> SignerResult<Self> {
        if attribute_sets.is_empty() || attribute_sets.iter().any(Vec::is_empty) {
            return Err(SignerError::NoAttributeSets);
        }
        Ok(Self {
            key,
            attribute_sets,
            optional_subsets: Vec::new(),
            required: true,
        })
    }

    /// Build from configuration. `resolve` maps an optional operation name
    /// to its token letter.
    pub fn from_config(
        config: &HmacConfig,
        resolve: impl Fn(&str) -> Option<char>,
    ) -> SignerResult<Self> {
        let letters = config
            .optional
            .iter()
            .map(|name| resolve(name).ok_or_else(|| SignerError::UnknownOperation(name.clone())))
            .collect::<SignerResult<Vec<_>>>()?;

        Ok(Self::new(HmacKey::new(&config.key)?, config.attributes.clone())?
            .with_optional(&letters)
            .with_required(config.required))
    }

    pub fn with_optional(mut self, letters: &[char]) -> Self {
        let mut letters = letters.to_vec();
        letters.sort_unstable();
        letters.dedup();
        self.optional_subsets = subsets(&letters);
        self
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Whether unsigned requests are rejected.
    pub fn required(&self) -> bool {
        self.required
    }

    /// Sign with the first attribute set.
    pub fn sign(&self, data: &RequestData<'_>) -> String {
        self.sign_with(&self.attribute_sets[0], data)
    }

    pub fn sign_with(&self, attributes: &[SignedAttribute], data: &RequestData<'_>) -> String {
        self.key.digest_hex(&data.signing_input(attributes))
    }

    /// Check a provided signature against every attribute set, then against
    /// every optional-token removal.
    pub fn verify(&self, provided: &str, data: &RequestData<'_>) -> bool {
        let matches = |data: &RequestData<'_>| {
            self.attribute_sets
                .iter()
                .any(|set| self.key.verify_hex(provided, &data.signing_input(set)))
        };

        if matches(data) {
            return true;
        }

        for subset in &self.optional_subsets {
            let stripped = subset
                .iter()
                .fold(data.transformations.to_string(), |acc, letter| {
                    remove_letter(&acc, *letter)
                });
            if stripped == data.transformations {
                continue;
            }
            let variant = RequestData {
                transformations: &stripped,
                ..*data
            };
            if matches(&variant) {
                debug!(removed = ?subset, "signature matched after removing optional tokens");
                return true;
            }
        }

        debug!(hash = data.hash, "signature rejected");
        false
    }
}

/// All non-empty subsets, smallest first.
fn subsets(letters: &[char]) -> Vec<Vec<char>> {
    let mut out: Vec<Vec<char>> = (1u32..(1 << letters.len()))
        .map(|mask| {
            letters
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, c)| *c)
                .collect()
        })
        .collect();
    out.sort_by_key(Vec::len);
    out
}
