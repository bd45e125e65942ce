use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tally_core::{normalize, Money, UserId};

/// Separator between the fields hashed into a fingerprint.
pub const FINGERPRINT_DELIMITER: &str = "|";

/// Compute SHA-256 of an in-memory byte slice.
pub fn sha256_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Encode a raw 32-byte hash as a lowercase hex string (64 chars).
pub fn to_hex(hash: &[u8; 32]) -> String {
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Content-derived identity of a transaction, stable across repeated exports.
///
/// Hashes `user|YYYY-MM-DD|amount|MERCHANT|account`, where the amount is the
/// absolute value at two decimals, the merchant is normalized and a missing
/// account number contributes an empty field.
pub fn fingerprint(
    user_id: UserId,
    date: NaiveDate,
    amount: Money,
    merchant: &str,
    account_number: Option<&str>,
) -> String {
    let material = [
        user_id.to_string(),
        date.format("%Y-%m-%d").to_string(),
        amount.abs().to_fixed_string(),
        normalize(merchant),
        account_number.map(str::trim).unwrap_or_default().to_string(),
    ]
    .join(FINGERPRINT_DELIMITER);

    to_hex(&sha256_bytes(material.as_bytes()))
}
