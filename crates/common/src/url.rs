// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! The universal addressable descriptor used as routing key and cache key
//! across the framework.
//!
//! A [`Url`] is a value type: every mutation produces a new instance. The
//! string form is deterministic (parameters are kept sorted), so it can be
//! used directly as a map key.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{
    ANY_VALUE, CATEGORY_KEY, DEFAULT_CATEGORY, ENABLED_KEY, GROUP_KEY, INTERFACE_KEY, VERSION_KEY,
};

/// Characters kept verbatim when percent-encoding a nested URL parameter.
const PARAM_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'*');

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UrlError {
    #[error("invalid url: {0}")]
    Invalid(String),
    #[error("invalid port in url: {0}")]
    InvalidPort(String),
    #[error("invalid percent-encoding: {0}")]
    Decode(String),
}

/// Immutable service descriptor: `protocol://username@host:port/path?k=v`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Url {
    protocol: String,
    username: String,
    host: String,
    port: u16,
    path: String,
    parameters: BTreeMap<String, String>,
}

impl Url {
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Url {
            protocol: protocol.into(),
            username: String::new(),
            host: host.into(),
            port,
            path: String::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn parse(s: &str) -> Result<Self, UrlError> {
        s.parse()
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn address(&self) -> String {
        if self.port == 0 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    /// Parameter lookup with a default for missing or empty values.
    pub fn parameter_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.parameters.get(key) {
            Some(v) if !v.is_empty() => v,
            _ => default,
        }
    }

    pub fn bool_parameter(&self, key: &str, default: bool) -> bool {
        match self.parameter(key) {
            Some(v) if !v.is_empty() => v == "true",
            _ => default,
        }
    }

    pub fn u32_parameter(&self, key: &str, default: u32) -> u32 {
        self.parameter(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn u64_parameter(&self, key: &str, default: u64) -> u64 {
        self.parameter(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Percent-decode the value of `key`. Used for the nested `export` and
    /// `refer` URLs.
    pub fn parameter_decoded(&self, key: &str) -> Result<Option<String>, UrlError> {
        match self.parameter(key) {
            None => Ok(None),
            Some(v) => decode(v).map(Some),
        }
    }

    // -- builder-style mutation; every call returns a new Url -------------

    pub fn with_protocol(&self, protocol: impl Into<String>) -> Self {
        let mut url = self.clone();
        url.protocol = protocol.into();
        url
    }

    pub fn with_username(&self, username: impl Into<String>) -> Self {
        let mut url = self.clone();
        url.username = username.into();
        url
    }

    pub fn with_host(&self, host: impl Into<String>) -> Self {
        let mut url = self.clone();
        url.host = host.into();
        url
    }

    pub fn with_port(&self, port: u16) -> Self {
        let mut url = self.clone();
        url.port = port;
        url
    }

    pub fn with_path(&self, path: impl Into<String>) -> Self {
        let mut url = self.clone();
        url.path = path.into();
        url
    }

    pub fn with_parameter(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut url = self.clone();
        url.parameters.insert(key.into(), value.into());
        url
    }

    pub fn with_parameters<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut url = self.clone();
        for (k, v) in pairs {
            url.parameters.insert(k.into(), v.into());
        }
        url
    }

    /// Add parameters only where the key is not already present.
    pub fn with_parameters_if_absent<K, V>(&self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut url = self.clone();
        for (k, v) in pairs {
            url.parameters.entry(k.into()).or_insert_with(|| v.into());
        }
        url
    }

    pub fn without_parameter(&self, key: &str) -> Self {
        let mut url = self.clone();
        url.parameters.remove(key);
        url
    }

    pub fn without_parameters<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut url = self.clone();
        for key in keys {
            url.parameters.remove(key);
        }
        url
    }

    /// Keep only the listed parameter keys (non-empty values).
    pub fn retain_parameters<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut url = self.clone();
        let keep: Vec<&str> = keys.into_iter().collect();
        url.parameters
            .retain(|k, v| keep.contains(&k.as_str()) && !v.is_empty());
        url
    }

    // -- derived views ----------------------------------------------------

    /// The service interface: the `interface` parameter, falling back to the
    /// path.
    pub fn service_interface(&self) -> &str {
        match self.parameter(INTERFACE_KEY) {
            Some(i) if !i.is_empty() => i,
            _ => &self.path,
        }
    }

    /// `group/interface:version`, with group and version omitted when empty.
    pub fn service_key(&self) -> String {
        let interface = self.service_interface();
        let mut key = String::new();
        if let Some(group) = self.parameter(GROUP_KEY) {
            if !group.is_empty() {
                key.push_str(group);
                key.push('/');
            }
        }
        key.push_str(interface);
        if let Some(version) = self.parameter(VERSION_KEY) {
            if !version.is_empty() {
                key.push(':');
                key.push_str(version);
            }
        }
        key
    }

    pub fn category(&self) -> &str {
        self.parameter_or(CATEGORY_KEY, DEFAULT_CATEGORY)
    }

    /// Identity of the backing naming-service connection: everything except
    /// the parameters.
    pub fn connection_key(&self) -> String {
        let mut url = self.clone();
        url.parameters.clear();
        url.to_string()
    }
}

/// Match a provider/configurator URL against a consumer/subscription URL:
/// interface, group, version and category must each be equal or wildcarded.
pub fn is_match(subscribe: &Url, provider: &Url) -> bool {
    let sub_interface = subscribe.service_interface();
    if sub_interface != ANY_VALUE && sub_interface != provider.service_interface() {
        return false;
    }
    if !provider.bool_parameter(ENABLED_KEY, true) && subscribe.parameter(ENABLED_KEY) != Some(ANY_VALUE)
    {
        return false;
    }
    let pairs = [(GROUP_KEY, true), (VERSION_KEY, false)];
    for (key, any_matches_sets) in pairs {
        let sub = subscribe.parameter_or(key, ANY_VALUE);
        let prov = provider.parameter_or(key, "");
        let matched = sub == ANY_VALUE
            || sub == prov
            || (any_matches_sets && sub.split(',').any(|g| g == prov));
        if !matched {
            return false;
        }
    }
    true
}

/// Percent-encode a string for embedding as a URL parameter value.
pub fn encode(s: &str) -> String {
    utf8_percent_encode(s, PARAM_ENCODE_SET).to_string()
}

/// Inverse of [`encode`].
pub fn decode(s: &str) -> Result<String, UrlError> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|c| c.into_owned())
        .map_err(|e| UrlError::Decode(e.to_string()))
}

/// Parse a `k=v&k2=v2` query string into a parameter map.
pub fn parse_query(query: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((k, v)) => map.insert(k.to_string(), v.to_string()),
            None => map.insert(pair.to_string(), String::new()),
        };
    }
    map
}

impl FromStr for Url {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(UrlError::Invalid("empty url".to_string()));
        }
        let (protocol, rest) = s
            .split_once("://")
            .ok_or_else(|| UrlError::Invalid(format!("missing protocol separator in {s}")))?;
        if protocol.is_empty() {
            return Err(UrlError::Invalid(format!("empty protocol in {s}")));
        }

        let (body, query) = match rest.split_once('?') {
            Some((b, q)) => (b, Some(q)),
            None => (rest, None),
        };
        let (authority, path) = match body.split_once('/') {
            Some((a, p)) => (a, p),
            None => (body, ""),
        };
        let (username, host_port) = match authority.split_once('@') {
            Some((u, hp)) => (u, hp),
            None => ("", authority),
        };
        let (host, port) = match host_port.rsplit_once(':') {
            Some((h, p)) => (
                h,
                p.parse::<u16>()
                    .map_err(|_| UrlError::InvalidPort(s.to_string()))?,
            ),
            None => (host_port, 0),
        };

        Ok(Url {
            protocol: protocol.to_string(),
            username: username.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
            parameters: query.map(parse_query).unwrap_or_default(),
        })
    }
}

impl Display for Url {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.protocol)?;
        if !self.username.is_empty() {
            write!(f, "{}@", self.username)?;
        }
        f.write_str(&self.host)?;
        if self.port != 0 {
            write!(f, ":{}", self.port)?;
        }
        if !self.path.is_empty() {
            write!(f, "/{}", self.path)?;
        }
        if !self.parameters.is_empty() {
            f.write_str("?")?;
            for (i, (k, v)) in self.parameters.iter().enumerate() {
                if i > 0 {
                    f.write_str("&")?;
                }
                write!(f, "{k}={v}")?;
            }
        }
        Ok(())
    }
}

// Hash over the full string form, which is canonical because parameters are
// sorted.
impl Hash for Url {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}
