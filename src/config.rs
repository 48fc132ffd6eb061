//! The declarative virtual-server model carried in config-map blobs.

use crate::k8s::{ConfigMap, ResourceExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A parsed virtual-server definition plus runtime metadata.
///
/// The serialized form is what the config writer hands to the out-of-process
/// agent; `meta_data` is controller-internal bookkeeping and never leaves the
/// process.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServerConfig {
    pub virtual_server: VirtualServer,
    #[serde(skip)]
    pub meta_data: MetaData,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServer {
    pub backend: Backend,
    pub frontend: Frontend,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub service_name: String,
    pub service_port: i32,
    #[serde(default)]
    pub pool_member_addrs: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frontend {
    #[serde(default)]
    pub virtual_server_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iapp_template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_address: Option<VirtualAddress>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualAddress {
    pub bind_addr: String,
    pub port: i32,
}

/// Runtime state owned by the store after parse.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetaData {
    pub active: bool,
    pub node_port: i32,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("config map has no `data` entry")]
    MissingBlob,
    #[error("invalid virtual-server blob: {0}")]
    Blob(#[from] serde_json::Error),
    #[error("backend serviceName is empty")]
    MissingServiceName,
    #[error("backend servicePort {0} is out of range")]
    InvalidPort(i32),
    #[error("virtualAddress has no bindAddr")]
    MissingBindAddr,
}

/// A parse failure, carrying the decoded config when the blob decoded but
/// failed validation. The watch handler needs the backend identity to purge
/// a store entry left behind by a previously valid definition.
#[derive(Debug)]
pub struct ParseFailure {
    pub error: ParseError,
    pub partial: Option<VirtualServerConfig>,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.error, f)
    }
}

/// Decodes and validates the virtual-server blob of a config map.
pub fn parse_virtual_server_config(cm: &ConfigMap) -> Result<VirtualServerConfig, ParseFailure> {
    let decode_err = |error: ParseError| ParseFailure {
        error,
        partial: None,
    };

    let blob = cm
        .data
        .as_ref()
        .and_then(|data| data.get("data"))
        .ok_or_else(|| decode_err(ParseError::MissingBlob))?;
    let cfg: VirtualServerConfig =
        serde_json::from_str(blob).map_err(|e| decode_err(e.into()))?;

    let invalid = |error: ParseError| ParseFailure {
        error,
        partial: Some(cfg.clone()),
    };

    let backend = &cfg.virtual_server.backend;
    if backend.service_name.is_empty() {
        return Err(invalid(ParseError::MissingServiceName));
    }
    if backend.service_port < 1 || backend.service_port > 65535 {
        return Err(invalid(ParseError::InvalidPort(backend.service_port)));
    }
    if let Some(ref va) = cfg.virtual_server.frontend.virtual_address {
        if va.bind_addr.is_empty() {
            return Err(invalid(ParseError::MissingBindAddr));
        }
    }

    Ok(cfg)
}

/// Derives the stable virtual-server name for a config map.
pub fn format_virtual_server_name(cm: &ConfigMap) -> String {
    format!("{}_{}", cm.namespace().unwrap_or_default(), cm.name())
}
