//! Swap order types shared by every component
//!
//! A swap is identified by the 32-byte order hash shared by its source and
//! destination escrows. Hashlocks are keccak256 commitments to a 32-byte secret.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

use crate::error::RelayerError;

macro_rules! bytes32_type {
    ($name:ident) => {
        impl $name {
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = RelayerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let digits = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(digits).map_err(|e| {
                    RelayerError::EventDecoding(format!(
                        "invalid {} hex: {}",
                        stringify!($name),
                        e
                    ))
                })?;
                let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
                    RelayerError::EventDecoding(format!(
                        "{} must be 32 bytes",
                        stringify!($name)
                    ))
                })?;
                Ok(Self(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Order hash correlating the two escrows of one swap
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwapId([u8; 32]);
bytes32_type!(SwapId);

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SwapId({})", self.to_hex())
    }
}

/// Commitment to the swap secret
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hashlock([u8; 32]);
bytes32_type!(Hashlock);

impl Hashlock {
    /// Hashlock committing to `secret`
    pub fn of(secret: &Secret) -> Self {
        let digest = Keccak256::digest(secret.as_bytes());
        Self(digest.into())
    }

    /// Whether `secret` is the preimage of this hashlock
    pub fn matches(&self, secret: &Secret) -> bool {
        Self::of(secret) == *self
    }
}

impl fmt::Debug for Hashlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hashlock({})", self.to_hex())
    }
}

/// Hashlock preimage
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Secret([u8; 32]);
bytes32_type!(Secret);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only a prefix, secrets end up in logs otherwise
        write!(f, "Secret({}..)", &hex::encode(self.0)[..8])
    }
}

/// Which escrow of the pair an event or action refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainSide {
    Source,
    Dest,
}

impl ChainSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainSide::Source => "source",
            ChainSide::Dest => "dest",
        }
    }
}

impl fmt::Display for ChainSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainSide {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(ChainSide::Source),
            "dest" => Ok(ChainSide::Dest),
            other => Err(RelayerError::Store(format!("unknown chain side: {}", other))),
        }
    }
}

/// Lifecycle phase of a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapPhase {
    AwaitingSourceFund,
    AwaitingDestFund,
    Active,
    SecretRevealed,
    Completed,
    Refunding,
    Refunded,
    Expired,
}

impl SwapPhase {
    pub const ALL: [SwapPhase; 8] = [
        SwapPhase::AwaitingSourceFund,
        SwapPhase::AwaitingDestFund,
        SwapPhase::Active,
        SwapPhase::SecretRevealed,
        SwapPhase::Completed,
        SwapPhase::Refunding,
        SwapPhase::Refunded,
        SwapPhase::Expired,
    ];

    /// No further phase changes once reached
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapPhase::Completed | SwapPhase::Refunded | SwapPhase::Expired
        )
    }

    /// Phases in which the swap can still complete or fall back to a refund
    pub fn is_pre_settlement(&self) -> bool {
        matches!(
            self,
            SwapPhase::AwaitingSourceFund | SwapPhase::AwaitingDestFund | SwapPhase::Active
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapPhase::AwaitingSourceFund => "awaiting_source_fund",
            SwapPhase::AwaitingDestFund => "awaiting_dest_fund",
            SwapPhase::Active => "active",
            SwapPhase::SecretRevealed => "secret_revealed",
            SwapPhase::Completed => "completed",
            SwapPhase::Refunding => "refunding",
            SwapPhase::Refunded => "refunded",
            SwapPhase::Expired => "expired",
        }
    }
}

impl fmt::Display for SwapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapPhase {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SwapPhase::ALL
            .iter()
            .find(|p| p.as_str() == s)
            .copied()
            .ok_or_else(|| RelayerError::Store(format!("unknown swap phase: {}", s)))
    }
}

/// Amounts travel as decimal strings, they routinely exceed 2^64 base units
mod amount_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One leg of the swap as escrowed on a single chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapLeg {
    /// Party whose funds are escrowed on this chain
    pub maker: String,
    /// Party allowed to withdraw with the secret
    pub taker: String,
    /// Token address or policy id, empty for the native asset
    #[serde(default)]
    pub token: String,
    #[serde(with = "amount_serde")]
    pub amount: u128,
}

/// A matched cross-chain swap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOrder {
    pub swap_id: SwapId,
    pub hashlock: Hashlock,
    pub source: SwapLeg,
    pub dest: SwapLeg,
    /// Absolute expiry of the source escrow (UNIX seconds)
    pub source_timeout: u64,
    /// Absolute expiry of the destination escrow, strictly before `source_timeout`
    pub dest_timeout: u64,
    #[serde(default = "initial_phase")]
    pub status: SwapPhase,
    #[serde(default)]
    pub revealed_secret: Option<Secret>,
}

fn initial_phase() -> SwapPhase {
    SwapPhase::AwaitingSourceFund
}

impl SwapOrder {
    /// Check the invariants an order must satisfy before it is tracked
    pub fn validate(&self) -> Result<(), RelayerError> {
        if self.dest_timeout >= self.source_timeout {
            return Err(RelayerError::InvalidOrder {
                swap_id: self.swap_id.to_hex(),
                reason: format!(
                    "destination timeout {} must be earlier than source timeout {}",
                    self.dest_timeout, self.source_timeout
                ),
            });
        }
        if self.source.amount == 0 || self.dest.amount == 0 {
            return Err(RelayerError::InvalidOrder {
                swap_id: self.swap_id.to_hex(),
                reason: "escrow amounts must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn leg(&self, side: ChainSide) -> &SwapLeg {
        match side {
            ChainSide::Source => &self.source,
            ChainSide::Dest => &self.dest,
        }
    }

    pub fn timeout(&self, side: ChainSide) -> u64 {
        match side {
            ChainSide::Source => self.source_timeout,
            ChainSide::Dest => self.dest_timeout,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_hashlock_matches_only_its_preimage() {
        let lock = Hashlock::of(&secret());
        assert!(lock.matches(&secret()));
        assert!(!lock.matches(&Secret::from_bytes([8u8; 32])));
    }

    #[test]
    fn test_keccak_of_zero_secret() {
        // keccak256 of 32 zero bytes
        let lock = Hashlock::of(&Secret::from_bytes([0u8; 32]));
        assert_eq!(
            lock.to_hex(),
            "0x290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563"
        );
    }

    #[test]
    fn test_swap_id_hex_parse() {
        let id: SwapId = "0x0101010101010101010101010101010101010101010101010101010101010101"
            .parse()
            .unwrap();
        assert_eq!(id, SwapId::from_bytes([1u8; 32]));
        assert!("0x0102".parse::<SwapId>().is_err());
    }

    #[test]
    fn test_order_rejects_inverted_timeouts() {
        let mut bad = order();
        bad.dest_timeout = bad.source_timeout;
        assert!(bad.validate().is_err());
        assert!(order().validate().is_ok());
    }

    #[test]
    fn test_order_json_keeps_large_amounts() {
        let mut o = order();
        o.source.amount = u128::MAX;
        let json = serde_json::to_string(&o).unwrap();
        let back: SwapOrder = serde_json::from_str(&json).unwrap();
        assert_eq!(back.source.amount, u128::MAX);
    }

    #[test]
    fn test_phase_strings() {
        for phase in SwapPhase::ALL {
            assert_eq!(phase.as_str().parse::<SwapPhase>().unwrap(), phase);
        }
        assert!(SwapPhase::Expired.is_terminal());
        assert!(!SwapPhase::Refunding.is_terminal());
    }
}
