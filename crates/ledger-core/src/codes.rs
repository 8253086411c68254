//! # Coded Fields
//!
//! The backend stores several "select" fields as small integers while the
//! ledger shows them as labels. Each enum here owns one fixed bidirectional
//! table.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ProfileStatus      1 Register   2 Active (*)   3 Disable   4 Terminate │
//! │  ConnectionType     1 Radius PPPoE (*)          2 Radius Hotspot        │
//! │  DiscountType       1 Percentage (%)            2 Fixed Amount          │
//! │  IdProofType        "Aadhaar Card" / "PAN Card" (legacy codes 1 / 2)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Unknown codes decode to `None`; callers log and leave the field empty.

use serde::{Deserialize, Serialize};

// =============================================================================
// CodedValue Trait
// =============================================================================

/// A closed set of values with a numeric wire code and a display label.
pub trait CodedValue: Copy + PartialEq + Sized + 'static {
    /// Every variant with its code and label.
    const TABLE: &'static [(Self, i64, &'static str)];

    /// Wire code for this value.
    fn code(self) -> i64 {
        Self::TABLE
            .iter()
            .find(|(value, _, _)| *value == self)
            .map(|(_, code, _)| *code)
            .unwrap_or_default()
    }

    /// Display label for this value.
    fn label(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(value, _, _)| *value == self)
            .map(|(_, _, label)| *label)
            .unwrap_or_default()
    }

    /// Looks up a value by wire code.
    fn from_code(code: i64) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(value, _, _)| *value)
    }

    /// Looks up a value by exact label.
    fn from_label(label: &str) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(_, _, l)| *l == label.trim())
            .map(|(value, _, _)| *value)
    }

    /// Accepts either a label or a numeric string, the way select inputs
    /// arrive from forms and imports.
    fn parse_select(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        if input.chars().all(|c| c.is_ascii_digit()) {
            return input.parse().ok().and_then(Self::from_code);
        }
        Self::from_label(input)
    }
}

// =============================================================================
// Profile Status
// =============================================================================

/// RADIUS profile lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    Register,
    Active,
    Disable,
    Terminate,
}

impl CodedValue for ProfileStatus {
    const TABLE: &'static [(Self, i64, &'static str)] = &[
        (ProfileStatus::Register, 1, "Register"),
        (ProfileStatus::Active, 2, "Active (*)"),
        (ProfileStatus::Disable, 3, "Disable"),
        (ProfileStatus::Terminate, 4, "Terminate"),
    ];
}

// =============================================================================
// Connection Type
// =============================================================================

/// How the subscriber authenticates against the NAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Pppoe,
    Hotspot,
}

impl CodedValue for ConnectionType {
    const TABLE: &'static [(Self, i64, &'static str)] = &[
        (ConnectionType::Pppoe, 1, "Radius PPPoE (*)"),
        (ConnectionType::Hotspot, 2, "Radius Hotspot"),
    ];
}

// =============================================================================
// Discount Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    FixedAmount,
}

impl CodedValue for DiscountType {
    const TABLE: &'static [(Self, i64, &'static str)] = &[
        (DiscountType::Percentage, 1, "Percentage (%)"),
        (DiscountType::FixedAmount, 2, "Fixed Amount"),
    ];
}

// =============================================================================
// Identity Proof Type
// =============================================================================

/// Identity document kind.
///
/// The backend stores this as a label string, but older records carry the
/// numeric codes and several spellings, so decoding is deliberately lenient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdProofType {
    Aadhaar,
    Pan,
}

impl CodedValue for IdProofType {
    const TABLE: &'static [(Self, i64, &'static str)] = &[
        (IdProofType::Aadhaar, 1, "Aadhaar Card"),
        (IdProofType::Pan, 2, "PAN Card"),
    ];

    fn parse_select(input: &str) -> Option<Self> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "" => None,
            "1" | "aadhaar" | "aadhar" | "uidai" | "aadhaar card" | "aadhar card" => {
                Some(IdProofType::Aadhaar)
            }
            "2" | "pan" | "pan card" => Some(IdProofType::Pan),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_status_table() {
        assert_eq!(ProfileStatus::Active.code(), 2);
        assert_eq!(ProfileStatus::from_code(4), Some(ProfileStatus::Terminate));
        assert_eq!(ProfileStatus::from_code(9), None);
        assert_eq!(
            ProfileStatus::from_label("Active (*)"),
            Some(ProfileStatus::Active)
        );
    }

    #[test]
    fn test_parse_select_accepts_digits_and_labels() {
        assert_eq!(
            ConnectionType::parse_select("2"),
            Some(ConnectionType::Hotspot)
        );
        assert_eq!(
            ConnectionType::parse_select("Radius PPPoE (*)"),
            Some(ConnectionType::Pppoe)
        );
        assert_eq!(DiscountType::parse_select(""), None);
        assert_eq!(DiscountType::parse_select("7"), None);
    }

    #[test]
    fn test_identity_aliases() {
        assert_eq!(IdProofType::parse_select("UIDAI"), Some(IdProofType::Aadhaar));
        assert_eq!(IdProofType::parse_select("aadhar"), Some(IdProofType::Aadhaar));
        assert_eq!(IdProofType::parse_select("2"), Some(IdProofType::Pan));
        assert_eq!(IdProofType::parse_select("passport"), None);
        assert_eq!(IdProofType::Pan.label(), "PAN Card");
    }
}
