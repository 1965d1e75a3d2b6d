//! Translator settings
//!
//! Settings load from YAML and are then overlaid by environment variables,
//! so a mounted config file can be patched per deployment.

use serde::{Deserialize, Serialize};

use crate::crd::MAX_DIRECT_RESPONSE_BODY_BYTES;
use crate::{Error, Result, DEFAULT_CONTROLLER_NAME, DEFAULT_WRITE_NAMESPACE};

/// Environment variable overriding [`Settings::controller_name`]
pub const ENV_CONTROLLER_NAME: &str = "PORTICO_CONTROLLER_NAME";
/// Environment variable overriding [`Settings::write_namespace`]
pub const ENV_WRITE_NAMESPACE: &str = "PORTICO_WRITE_NAMESPACE";
/// Environment variable overriding [`Settings::privileged_port_offset`]
pub const ENV_PORT_OFFSET: &str = "PORTICO_PORT_OFFSET";

/// OCSP staple policy applied to TLS filter chains
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum OcspStaplePolicy {
    /// Serve whatever staple is present
    #[default]
    Lenient,
    /// Reject expired staples
    Strict,
    /// Require a valid staple
    MustStaple,
}

impl std::str::FromStr for OcspStaplePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            "muststaple" | "must-staple" | "must_staple" => Ok(Self::MustStaple),
            _ => Err(Error::validation(format!("unknown OCSP staple policy: {s}"))),
        }
    }
}

/// Translator settings
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Controller name written on route and policy status
    pub controller_name: String,
    /// Namespace generated resources belong to
    pub write_namespace: String,
    /// Address every listener binds to
    pub bind_address: String,
    /// Added to ports below 1024 so the proxy can run unprivileged
    pub privileged_port_offset: u16,
    /// Upper bound on compiled regex size, in KiB; the default of 1024
    /// allows 1 MiB per regex
    pub regex_max_program_size: usize,
    /// Upper bound on direct response bodies
    pub max_direct_response_body_bytes: usize,
    /// OCSP policy when a listener does not set one
    pub default_ocsp_staple_policy: OcspStaplePolicy,
    /// Connect timeout for generated clusters
    pub cluster_connect_timeout_ms: u64,
    /// Whether TCPRoutes are queried at all
    pub enable_tcp_routes: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            controller_name: DEFAULT_CONTROLLER_NAME.to_string(),
            write_namespace: DEFAULT_WRITE_NAMESPACE.to_string(),
            bind_address: "::".to_string(),
            privileged_port_offset: 8000,
            regex_max_program_size: 1024,
            max_direct_response_body_bytes: MAX_DIRECT_RESPONSE_BODY_BYTES,
            default_ocsp_staple_policy: OcspStaplePolicy::Lenient,
            cluster_connect_timeout_ms: 5000,
            enable_tcp_routes: true,
        }
    }
}

impl Settings {
    /// Parse settings from YAML; missing keys take their defaults
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Overlay settings with values from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay settings with values from `lookup`
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(name) = lookup(ENV_CONTROLLER_NAME) {
            self.controller_name = name;
        }
        if let Some(ns) = lookup(ENV_WRITE_NAMESPACE) {
            self.write_namespace = ns;
        }
        if let Some(offset) = lookup(ENV_PORT_OFFSET) {
            self.privileged_port_offset = offset
                .parse()
                .map_err(|e| Error::config_for_key(ENV_PORT_OFFSET, format!("{offset}: {e}")))?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.controller_name.is_empty() {
            return Err(Error::config_for_key("controllerName", "must not be empty"));
        }
        if self.bind_address.is_empty() {
            return Err(Error::config_for_key("bindAddress", "must not be empty"));
        }
        if self.max_direct_response_body_bytes > MAX_DIRECT_RESPONSE_BODY_BYTES {
            return Err(Error::config_for_key(
                "maxDirectResponseBodyBytes",
                format!("must be at most {MAX_DIRECT_RESPONSE_BODY_BYTES}"),
            ));
        }
        Ok(())
    }

    /// Map a gateway port to the port the proxy binds
    pub fn translate_port(&self, port: u16) -> u16 {
        if port < 1024 {
            port.saturating_add(self.privileged_port_offset)
        } else {
            port
        }
    }
}
