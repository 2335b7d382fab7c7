//! Capture artifact naming
//!
//! Artifacts are stored as `<pod>-<UTC timestamp>.pcap`. When an artifact is
//! shipped to a relay sink, the pod name is the leading component of the
//! object name so the sink can file data per pod.

use std::path::Path;

use chrono::{DateTime, Utc};

/// `<pod>-<yyyymmddThhmmssZ>.pcap`
pub fn artifact_file_name(pod: &str, at: DateTime<Utc>) -> String {
    format!("{pod}-{}.pcap", at.format("%Y%m%dT%H%M%SZ"))
}

/// Full artifact path under `dir`
pub fn artifact_path(dir: &str, pod: &str, at: DateTime<Utc>) -> String {
    Path::new(dir)
        .join(artifact_file_name(pod, at))
        .to_string_lossy()
        .into_owned()
}

/// Object name a relay sink files an artifact under
pub fn relay_object_name(pod: &str, artifact: &str) -> String {
    let file = Path::new(artifact)
        .file_name()
        .map_or_else(|| artifact.to_string(), |f| f.to_string_lossy().into_owned());
    format!("{pod}/{file}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 7, 14, 5, 9).unwrap()
    }

    #[test]
    fn test_artifact_file_name() {
        assert_eq!(artifact_file_name("w-1", at()), "w-1-20260307T140509Z.pcap");
    }

    #[test]
    fn test_artifact_path() {
        assert_eq!(
            artifact_path("/var/lib/fleetcap/pcap", "w-1", at()),
            "/var/lib/fleetcap/pcap/w-1-20260307T140509Z.pcap"
        );
        assert_eq!(
            artifact_path("/pcap/", "w-1", at()),
            "/pcap/w-1-20260307T140509Z.pcap"
        );
    }

    #[test]
    fn test_relay_object_name_leads_with_pod() {
        assert_eq!(
            relay_object_name("w-1", "/pcap/w-1-20260307T140509Z.pcap"),
            "w-1/w-1-20260307T140509Z.pcap"
        );
    }
}
