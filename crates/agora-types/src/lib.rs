//! Agora Types - Primitive identifiers shared by the agora governance engine.
//!
//! This crate provides:
//! - Addresses (20-byte account identifiers, Bech32m encoded)
//! - Hashes (32-byte blake3 digests)
//! - Amount and height aliases used by every module

pub mod address;
pub mod hash;
pub mod error;

#[cfg(any(feature = "serde", feature = "borsh"))]
mod serialization;

pub use address::Address;
pub use hash::Hash;
pub use error::TypesError;

#[cfg(feature = "serde")]
pub use serialization::amount_serde;

/// Token and treasury amounts.
pub type Amount = u128;

/// Value of the shared monotonic ordering counter.
pub type Height = u64;

/// Basis points denominator (100% = 10 000 bps).
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Address, Amount, Hash, Height, TypesError, BPS_DENOMINATOR};
}
