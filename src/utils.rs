//! Utility functions for id minting

use bech32::Bech32m;
use uuid7::uuid7;

/// Human-readable prefixes for the ids this crate mints.
pub const VERSION_HRP: &str = "ver";
pub const TOKEN_HRP: &str = "tok";
pub const VALIDATOR_HRP: &str = "vvb";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}
