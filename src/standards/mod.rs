//! Sanitization standards and their pass specifications.
//!
//! Each supported standard expands to an ordered list of [`PassSpec`]s. The
//! expansion is deterministic for a given standard id; only the bytes of
//! random passes differ between runs, and those are drawn fresh per pass and
//! never reused (see `crypto`).

use crate::{WipeError, WipeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;


/// Identifier of a supported sanitization standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StandardId {
    /// NIST SP 800-88 Rev. 1 "Clear": single zero pass, full verification.
    #[serde(rename = "NIST_800_88")]
    Nist80088Clear,
    /// BSI VS-A: zeros, ones, random, with verification of the final pass.
    #[serde(rename = "BSI_VS_A")]
    BsiVsA,
    /// DoD 5220.22-M 7-pass variant, see [`generate`] for the fixed table.
    #[serde(rename = "DOD_5220_22_M")]
    Dod522022M,
}

impl StandardId {
    pub const ALL: [StandardId; 3] = [
        StandardId::Nist80088Clear,
        StandardId::BsiVsA,
        StandardId::Dod522022M,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StandardId::Nist80088Clear => "NIST_800_88",
            StandardId::BsiVsA => "BSI_VS_A",
            StandardId::Dod522022M => "DOD_5220_22_M",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StandardId::Nist80088Clear => "NIST SP 800-88 Rev. 1 (Clear)",
            StandardId::BsiVsA => "BSI VS-A (Verschlusssache - Allgemein)",
            StandardId::Dod522022M => "DoD 5220.22-M (7-Pass)",
        }
    }

    /// Parses an externally supplied standard identifier, case-insensitively.
    pub fn parse(s: &str) -> WipeResult<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        StandardId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| WipeError::Configuration(format!("unknown sanitization standard: {s}")))
    }
}

impl FromStr for StandardId {
    type Err = WipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StandardId::parse(s)
    }
}

impl fmt::Display for StandardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte pattern written during one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    /// Constant 0x00 across the addressable range.
    Zero,
    /// Constant 0xFF.
    One,
    /// A fixed byte value.
    FixedByte(u8),
    /// Bitwise complement of the given byte (the byte of the preceding
    /// deterministic pass in the standard's table).
    Complement(u8),
    /// Cryptographically sourced bytes, regenerated independently per pass.
    Random,
}

impl PatternKind {
    /// The fill byte for deterministic patterns; `None` for random.
    pub fn fill_byte(&self) -> Option<u8> {
        match self {
            PatternKind::Zero => Some(0x00),
            PatternKind::One => Some(0xFF),
            PatternKind::FixedByte(b) => Some(*b),
            PatternKind::Complement(b) => Some(!*b),
            PatternKind::Random => None,
        }
    }

    pub fn is_random(&self) -> bool {
        matches!(self, PatternKind::Random)
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fill_byte() {
            Some(b) => write!(f, "0x{b:02X}"),
            None => f.write_str("random"),
        }
    }
}

/// Verification requirement attached to a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationMode {
    /// Read back every byte and compare against the expected pattern.
    FullScan,
    /// Read a bounded number of randomly chosen ranges proportional to
    /// capacity. Only valid where the standard explicitly allows it.
    Sampled,
    /// No verification for this pass.
    None,
}

/// One pass of a standard: what to write and how to verify it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSpec {
    pub pattern: PatternKind,
    pub verification: VerificationMode,
}

impl PassSpec {
    pub const fn new(pattern: PatternKind, verification: VerificationMode) -> Self {
        Self {
            pattern,
            verification,
        }
    }
}

/// A standard expanded into its ordered pass specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standard {
    pub id: StandardId,
    pub name: String,
    pub passes: Vec<PassSpec>,
}

impl Standard {
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }
}

/// Expands a standard id into its ordered pass specification.
///
/// The DoD 5220.22-M table has several published variants; this crate fixes
/// one: `0x00`, its complement `0xFF`, random, `0x55`, its complement `0xAA`,
/// random, with the published "pass 7: verify" realized as mandatory full
/// verification of the final write rather than a seventh write pass.
pub fn generate(id: StandardId) -> Standard {
    use PatternKind::*;
    use VerificationMode::*;

    let passes = match id {
        StandardId::Nist80088Clear => vec![PassSpec::new(Zero, FullScan)],
        StandardId::BsiVsA => vec![
            PassSpec::new(Zero, None),
            PassSpec::new(One, None),
            PassSpec::new(Random, FullScan),
        ],
        StandardId::Dod522022M => vec![
            PassSpec::new(Zero, None),
            PassSpec::new(Complement(0x00), None),
            PassSpec::new(Random, None),
            PassSpec::new(FixedByte(0x55), None),
            PassSpec::new(Complement(0x55), None),
            PassSpec::new(Random, FullScan),
        ],
    };

    Standard {
        id,
        name: id.display_name().to_string(),
        passes,
    }
}

/// Looks up an externally supplied identifier and expands it.
/// Fails with `Configuration` on an unknown id; no write is ever attempted.
pub fn generate_by_name(name: &str) -> WipeResult<Standard> {
    Ok(generate(StandardId::parse(name)?))
}
