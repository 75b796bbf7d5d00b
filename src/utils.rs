//! Utility functions for identifiers, hashing and serialization

use super::error::ReconcileError;
use bech32::Bech32m;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid7::uuid7;

// construct a unique record id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// sha256 hex digest over the fields of a confirmation, unit-separator delimited.
pub fn fingerprint(fields: &[&str]) -> String {
    sha256::digest(fields.join("\u{1f}"))
}

pub(crate) fn to_cbor<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, ReconcileError> {
    minicbor::to_vec(value).map_err(|e| ReconcileError::Codec(e.to_string()))
}

pub(crate) fn from_cbor<T>(bytes: &[u8]) -> Result<T, ReconcileError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| ReconcileError::Codec(e.to_string()))
}

/// Initialize tracing with the PLEDGE_LOG environment variable.
///
/// Defaults to "info" level if PLEDGE_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("PLEDGE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
