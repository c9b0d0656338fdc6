//! Decoding of reassembled payloads into [`ExfiltratedRecord`]s.

use crate::types::{ExfiltratedRecord, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// JSON object emitted by the decoy package's install hook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, rename = "h")]
    pub hostname: String,
    #[serde(default, rename = "d")]
    pub username: String,
    #[serde(default, rename = "c")]
    pub working_directory: String,
    #[serde(default, rename = "p")]
    pub package_name: String,
}

/// Hex-decode and parse a complete payload, stamped with the querying
/// resolver's address and the current time.
pub fn decode_payload(hex_payload: &str, source_ip: &str) -> Result<ExfiltratedRecord> {
    let bytes = hex::decode(hex_payload)?;
    let payload: Payload = serde_json::from_slice(&bytes)?;

    Ok(ExfiltratedRecord {
        hostname: payload.hostname,
        username: payload.username,
        working_directory: payload.working_directory,
        package_name: payload.package_name,
        source_ip: source_ip.to_string(),
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DepconfError;

    #[test]
    fn test_decode_payload() {
        let json = r#"{"h":"build-07","d":"jenkins","c":"/var/lib/jenkins/ws","p":"acme-internal"}"#;
        let record = decode_payload(&hex::encode(json), "203.0.113.9").unwrap();

        assert_eq!(record.hostname, "build-07");
        assert_eq!(record.username, "jenkins");
        assert_eq!(record.working_directory, "/var/lib/jenkins/ws");
        assert_eq!(record.package_name, "acme-internal");
        assert_eq!(record.source_ip, "203.0.113.9");
    }

    #[test]
    fn test_bad_hex_is_error() {
        assert!(matches!(
            decode_payload("zz", "127.0.0.1"),
            Err(DepconfError::HexError(_))
        ));
    }

    #[test]
    fn test_bad_json_is_error() {
        // "deadbe" is valid hex but not JSON.
        assert!(matches!(
            decode_payload("deadbe", "127.0.0.1"),
            Err(DepconfError::JsonError(_))
        ));
    }
}
