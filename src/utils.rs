//! Identifier minting for billing records

use bech32::Bech32m;
use uuid7::uuid7;

// Mint a fresh uuid7 and bech32-encode it under the entity prefix, e.g.
// "work_", "client_", "pay_", "hist_". The prefix keeps raw ids readable in
// the store and in error messages.
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encoded = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encoded)
}
