//! Shared-store document paths.
//!
//! Paths are `/`-separated and carry no leading slash:
//!
//! ```text
//! devices/{subject}/commands/{correlation_id}
//! devices/{subject}/commandResults/{correlation_id}
//! devices/{subject}/approvalRequests/{request_id}
//! devices/{subject}/tokens/{token}
//! devices/{subject}/authorities/{authority_id}
//! authorities/{authority_id}/tokens/{token}
//! ```
//!
//! Collection builders (plural, no trailing id) return the prefix used to
//! list the documents directly below it.

pub const DEVICES: &str = "devices";
pub const AUTHORITIES: &str = "authorities";
pub const COMMANDS: &str = "commands";
pub const COMMAND_RESULTS: &str = "commandResults";
pub const APPROVAL_REQUESTS: &str = "approvalRequests";
pub const TOKENS: &str = "tokens";
pub const LINKS: &str = "authorities";

pub fn commands(subject: &str) -> String {
    format!("{DEVICES}/{subject}/{COMMANDS}")
}

pub fn command(subject: &str, correlation_id: &str) -> String {
    format!("{}/{correlation_id}", commands(subject))
}

pub fn command_result(subject: &str, correlation_id: &str) -> String {
    format!("{DEVICES}/{subject}/{COMMAND_RESULTS}/{correlation_id}")
}

pub fn approval_requests(subject: &str) -> String {
    format!("{DEVICES}/{subject}/{APPROVAL_REQUESTS}")
}

pub fn approval_request(subject: &str, request_id: &str) -> String {
    format!("{}/{request_id}", approval_requests(subject))
}

pub fn device_tokens(subject: &str) -> String {
    format!("{DEVICES}/{subject}/{TOKENS}")
}

pub fn device_token(subject: &str, token: &str) -> String {
    format!("{}/{token}", device_tokens(subject))
}

pub fn authority_tokens(authority: &str) -> String {
    format!("{AUTHORITIES}/{authority}/{TOKENS}")
}

pub fn authority_token(authority: &str, token: &str) -> String {
    format!("{}/{token}", authority_tokens(authority))
}

pub fn authority_links(subject: &str) -> String {
    format!("{DEVICES}/{subject}/{LINKS}")
}

pub fn authority_link(subject: &str, authority: &str) -> String {
    format!("{}/{authority}", authority_links(subject))
}

/// Check that a path has no empty segments and no leading/trailing slash.
pub fn is_valid(path: &str) -> bool {
    !path.is_empty() && path.split('/').all(|segment| !segment.is_empty())
}

/// Final segment of a path (the document id).
pub fn leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent collection of a document path.
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_paths() {
        assert_eq!(command("d1", "c1"), "devices/d1/commands/c1");
        assert_eq!(command_result("d1", "c1"), "devices/d1/commandResults/c1");
        assert_eq!(
            approval_request("d1", "r1"),
            "devices/d1/approvalRequests/r1"
        );
        assert_eq!(authority_token("a1", "tok"), "authorities/a1/tokens/tok");
        assert_eq!(device_token("d1", "tok"), "devices/d1/tokens/tok");
        assert_eq!(authority_link("d1", "a1"), "devices/d1/authorities/a1");
    }

    #[test]
    fn test_path_validation() {
        assert!(is_valid("devices/d1/commands/c1"));
        assert!(!is_valid(""));
        assert!(!is_valid("devices//commands/c1"));
        assert!(!is_valid("/devices/d1"));
        assert!(!is_valid(&command("", "c1")));
    }

    #[test]
    fn test_leaf_and_parent() {
        let path = command("d1", "c1");
        assert_eq!(leaf(&path), "c1");
        assert_eq!(parent(&path), Some("devices/d1/commands"));
        assert_eq!(parent("devices"), None);
    }
}
