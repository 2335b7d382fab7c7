//! Intent kind discriminator
//!
//! Used by the cluster client to address intents generically, and by the
//! rendered resources' labels.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::{API_GROUP, API_VERSION};

/// One of the FleetCap intent kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntentKind {
    /// One-shot command fanned out as Jobs
    AdHocCommand,
    /// Recurring command fanned out as CronJobs
    ScheduledCommand,
    /// Single-target in-namespace capture
    PacketCapture,
    /// Capture-data relay sink
    DataEndpoint,
}

/// Unknown kind string
#[derive(Debug, Error)]
#[error("unknown intent kind: {0}")]
pub struct UnknownIntentKind(pub String);

impl IntentKind {
    /// Every kind, in the order crdgen prints them
    pub const ALL: [IntentKind; 4] = [
        IntentKind::AdHocCommand,
        IntentKind::ScheduledCommand,
        IntentKind::PacketCapture,
        IntentKind::DataEndpoint,
    ];

    /// The `kind` field value
    pub fn kind(&self) -> &'static str {
        match self {
            IntentKind::AdHocCommand => "AdHocCommand",
            IntentKind::ScheduledCommand => "ScheduledCommand",
            IntentKind::PacketCapture => "PacketCapture",
            IntentKind::DataEndpoint => "DataEndpoint",
        }
    }

    /// Plural resource name used in API paths
    pub fn plural(&self) -> &'static str {
        match self {
            IntentKind::AdHocCommand => "adhoccommands",
            IntentKind::ScheduledCommand => "scheduledcommands",
            IntentKind::PacketCapture => "packetcaptures",
            IntentKind::DataEndpoint => "dataendpoints",
        }
    }

    /// `group/version` string for owner references
    pub fn api_version(&self) -> String {
        format!("{API_GROUP}/{API_VERSION}")
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

impl FromStr for IntentKind {
    type Err = UnknownIntentKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntentKind::ALL
            .into_iter()
            .find(|k| k.kind().eq_ignore_ascii_case(s) || k.plural() == s)
            .ok_or_else(|| UnknownIntentKind(s.to_string()))
    }
}
