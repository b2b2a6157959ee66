//! Protocol dialect selection.

/// Supported wire-protocol dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    /// The stateful dialect: advertisement first, then negotiation rounds.
    V0,
    /// Same exchange as V0 after an explicit `version 1` announcement.
    V1,
    /// The stateless command dialect (`ls-refs`, `fetch`).
    V2,
}

impl ProtocolVersion {
    /// Parse a `protocol.version` configuration value.
    pub fn from_config(value: &str) -> Option<Self> {
        match value.trim() {
            "0" => Some(Self::V0),
            "1" => Some(Self::V1),
            "2" => Some(Self::V2),
            _ => None,
        }
    }

    /// Select the dialect to serve.
    ///
    /// V2 is used only when the server permits it and the client asked for it
    /// through a `version=2` extra parameter; everything else falls back to
    /// the V0 exchange (with a version banner for V1).
    pub fn negotiate(server_max: Self, extra_parameters: &[String]) -> Self {
        let client_v2 = extra_parameters.iter().any(|p| p == "version=2");
        if server_max == Self::V2 && client_v2 {
            Self::V2
        } else if server_max >= Self::V1
            && extra_parameters.iter().any(|p| p == "version=1")
        {
            Self::V1
        } else {
            Self::V0
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V2
    }
}
