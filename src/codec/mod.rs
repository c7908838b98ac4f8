//! Wire encoding, signing and verification of tokens.

pub mod claims;
pub mod wire;

pub use claims::{TokenClaims, TokenPurpose};
pub use wire::TokenCodec;
