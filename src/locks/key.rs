//! Lock types and deterministic lock keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of critical section guarded by an advisory lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockType {
    PaymentProcessing,
    WalletOperation,
    CarAvailability,
    BookingCreate,
    PayoutProcessing,
}

impl LockType {
    pub const ALL: [LockType; 5] = [
        LockType::PaymentProcessing,
        LockType::WalletOperation,
        LockType::CarAvailability,
        LockType::BookingCreate,
        LockType::PayoutProcessing,
    ];

    /// Stable numeric code, also used as the key prefix.
    pub fn code(&self) -> u16 {
        match self {
            LockType::PaymentProcessing => 1,
            LockType::WalletOperation => 2,
            LockType::CarAvailability => 3,
            LockType::BookingCreate => 4,
            LockType::PayoutProcessing => 5,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::PaymentProcessing => "payment_processing",
            LockType::WalletOperation => "wallet_operation",
            LockType::CarAvailability => "car_availability",
            LockType::BookingCreate => "booking_create",
            LockType::PayoutProcessing => "payout_processing",
        }
    }

    /// Human-readable label for dashboards.
    pub fn label(&self) -> &'static str {
        match self {
            LockType::PaymentProcessing => "Payment processing",
            LockType::WalletOperation => "Wallet operation",
            LockType::CarAvailability => "Car availability",
            LockType::BookingCreate => "Booking creation",
            LockType::PayoutProcessing => "Payout processing",
        }
    }
}

impl std::fmt::Display for LockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bits of the key holding the resource hash; the lock type code sits above them.
const HASH_BITS: u32 = 48;
const HASH_MASK: u64 = (1 << HASH_BITS) - 1;

/// Advisory lock handle sent to the backend.
///
/// The top 16 bits carry the lock type code and the low 48 bits a SHA-256
/// prefix of `"{code}:{resource_id}"`, so keys of different types never collide
/// and the same pair always yields the same key, across processes and restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockKey(i64);

impl LockKey {
    pub fn derive(lock_type: LockType, resource_id: &str) -> Self {
        let digest = Sha256::digest(format!("{}:{}", lock_type.code(), resource_id).as_bytes());

        let mut prefix = [0u8; 8];
        prefix[2..].copy_from_slice(&digest[..6]);
        let hash = u64::from_be_bytes(prefix) & HASH_MASK;

        Self(((lock_type.code() as u64) << HASH_BITS | hash) as i64)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    /// Lock type encoded in the key prefix.
    pub fn lock_type(&self) -> Option<LockType> {
        LockType::from_code((self.0 as u64 >> HASH_BITS) as u16)
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
