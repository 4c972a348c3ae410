//! Client records. The billing core only reads clients (to stamp history
//! snapshots) and cascades their deletion; everything else about client
//! management lives outside this crate.
use super::utils;
use super::work::TimeStamp;
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Client {
    #[n(0)]
    pub id: String, // uuid7, bech32 "client_" prefix
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub pan: String, // permanent account number, copied verbatim into snapshots
    #[n(3)]
    pub created_at: TimeStamp<Utc>,
}

impl Client {
    pub fn new(name: &str, pan: &str) -> anyhow::Result<Self> {
        if name.trim().is_empty() {
            return Err(anyhow::Error::msg("client name must not be empty"));
        }

        Ok(Self {
            id: utils::new_uuid_to_bech32("client_")?,
            name: name.to_string(),
            pan: pan.to_string(),
            created_at: TimeStamp::new(),
        })
    }
}
