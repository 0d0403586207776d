//! Identifier aliases.

use uuid::Uuid;

/// Subject device identifier.
pub type DeviceId = String;

/// Supervising authority identifier.
pub type AuthorityId = String;

/// Correlation identifier linking an issued command to its terminal status.
pub type CorrelationId = String;

/// Approval request identifier.
pub type RequestId = String;

/// Generate a fresh correlation id. Unique per issuance.
pub fn new_correlation_id() -> CorrelationId {
    Uuid::new_v4().to_string()
}

/// Generate a fresh approval request id.
pub fn new_request_id() -> RequestId {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = new_correlation_id();
        let b = new_correlation_id();
        assert_ne!(a, b);
        assert_ne!(new_request_id(), new_request_id());
    }
}
