//! Server configuration for upload-pack sessions.

use crate::error::{Error, Result};
use crate::policy::RequestPolicy;
use bstr::BString;
use hull_serve_core::protocol::ProtocolVersion;
use hull_serve_core::visibility::HiddenRefs;
use std::collections::HashMap;

/// A read-only view of string-valued configuration keys.
pub trait ConfigSource {
    /// The raw value for `key`, if set.
    fn string(&self, key: &str) -> Option<String>;

    /// The boolean value for `key`, if set.
    ///
    /// Accepts `true/false`, `yes/no`, `on/off` and `1/0`, case-insensitively.
    fn boolean(&self, key: &str) -> Option<bool> {
        self.string(key).map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "on" | "1"
            )
        })
    }
}

impl ConfigSource for HashMap<String, String> {
    fn string(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Options governing one upload-pack server instance.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// The highest protocol dialect the server will speak.
    pub protocol_version: ProtocolVersion,
    /// Whether clients may supply `filter` specs (`uploadpack.allowfilter`).
    pub allow_filter: bool,
    /// Whether clients may use `want-ref` (`uploadpack.allowrefinwant`).
    pub allow_ref_in_want: bool,
    /// Whether `ref-in-want` is advertised even when allowed
    /// (`uploadpack.advertiserefinwant`).
    pub advertise_ref_in_want: bool,
    /// `uploadpack.allowtipsha1inwant`.
    pub allow_tip_sha1_in_want: bool,
    /// `uploadpack.allowreachablesha1inwant`.
    pub allow_reachable_sha1_in_want: bool,
    /// `uploadpack.allowanysha1inwant`.
    pub allow_any_sha1_in_want: bool,
    /// Patterns for refs that are never advertised.
    pub hidden_refs: HiddenRefs,
    /// Agent string advertised in the stateful dialect.
    pub agent: BString,
    /// Only write the advertisement and stop, as smart-HTTP `info/refs` does.
    pub advertise_refs_only: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::V2,
            allow_filter: false,
            allow_ref_in_want: false,
            advertise_ref_in_want: true,
            allow_tip_sha1_in_want: false,
            allow_reachable_sha1_in_want: false,
            allow_any_sha1_in_want: false,
            hidden_refs: HiddenRefs::none(),
            agent: BString::from(concat!("hull-upload-pack/", env!("CARGO_PKG_VERSION"))),
            advertise_refs_only: false,
        }
    }
}

impl ServerOptions {
    /// Options with library defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from configuration keys, starting from defaults.
    pub fn from_config(config: &dyn ConfigSource) -> Result<Self> {
        let mut options = Self::default();
        if let Some(version) = config.string("protocol.version") {
            options.protocol_version = ProtocolVersion::from_config(&version)
                .ok_or_else(|| {
                    Error::protocol(format!("invalid protocol.version '{version}'"))
                })?;
        }
        if let Some(allow) = config.boolean("uploadpack.allowfilter") {
            options.allow_filter = allow;
        }
        if let Some(allow) = config.boolean("uploadpack.allowrefinwant") {
            options.allow_ref_in_want = allow;
        }
        if let Some(advertise) = config.boolean("uploadpack.advertiserefinwant") {
            options.advertise_ref_in_want = advertise;
        }
        if let Some(allow) = config.boolean("uploadpack.allowtipsha1inwant") {
            options.allow_tip_sha1_in_want = allow;
        }
        if let Some(allow) = config.boolean("uploadpack.allowreachablesha1inwant") {
            options.allow_reachable_sha1_in_want = allow;
        }
        if let Some(allow) = config.boolean("uploadpack.allowanysha1inwant") {
            options.allow_any_sha1_in_want = allow;
        }
        if let Some(patterns) = config.string("uploadpack.hiderefs") {
            for pattern in patterns.split(':').filter(|p| !p.is_empty()) {
                options.hidden_refs.push(pattern);
            }
        }
        Ok(options)
    }

    /// Set the highest dialect to serve.
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    /// Enable or disable filter support.
    pub fn with_filter_support(mut self, allow: bool) -> Self {
        self.allow_filter = allow;
        self
    }

    /// Enable or disable `want-ref` support.
    pub fn with_ref_in_want(mut self, allow: bool) -> Self {
        self.allow_ref_in_want = allow;
        self
    }

    /// Add a hidden-ref pattern.
    pub fn with_hidden_ref(mut self, pattern: impl Into<BString>) -> Self {
        self.hidden_refs.push(pattern.into());
        self
    }

    /// Set the advertised agent string.
    pub fn with_agent(mut self, agent: impl Into<BString>) -> Self {
        self.agent = agent.into();
        self
    }

    /// Advertisement-only mode.
    pub fn with_advertise_refs_only(mut self, advertise_only: bool) -> Self {
        self.advertise_refs_only = advertise_only;
        self
    }

    /// The request policy selected by the `*sha1inwant` switches.
    pub fn request_policy(&self) -> RequestPolicy {
        if self.allow_any_sha1_in_want {
            RequestPolicy::Any
        } else if self.allow_reachable_sha1_in_want && self.allow_tip_sha1_in_want {
            RequestPolicy::ReachableCommitTip
        } else if self.allow_reachable_sha1_in_want {
            RequestPolicy::ReachableCommit
        } else if self.allow_tip_sha1_in_want {
            RequestPolicy::Tip
        } else {
            RequestPolicy::Advertised
        }
    }
}
