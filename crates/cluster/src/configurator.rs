// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Configurators: rules overriding parameters on matching provider URLs.
//!
//! A rule is itself a URL: `override://` sets parameters last-writer-wins,
//! `absent://` only fills missing ones, and any other scheme carrying
//! `category=configurators` behaves like `override://`. Control parameters
//! of the rule URL never become overrides.

use std::sync::Arc;

use relay_common::constants::{
    ABSENT_PROTOCOL, ANY_VALUE, APPLICATION_KEY, CATEGORY_KEY, CHECK_KEY, CONFIGURATORS_CATEGORY,
    CONFIG_VERSION_KEY, DYNAMIC_KEY, EMPTY_PROTOCOL, ENABLED_KEY, GROUP_KEY, OVERRIDE_PROTOCOL,
    SIDE_KEY, VERSION_KEY,
};
use relay_common::Url;
use tracing::debug;

/// Keys of a rule URL that steer matching rather than being applied.
const CONTROL_KEYS: [&str; 7] = [
    CATEGORY_KEY,
    CHECK_KEY,
    DYNAMIC_KEY,
    ENABLED_KEY,
    CONFIG_VERSION_KEY,
    SIDE_KEY,
    "anyhost",
];

pub trait Configurator: Send + Sync {
    fn url(&self) -> &Url;

    /// Apply the rule to `target`, returning it unchanged when the rule
    /// does not match.
    fn configure(&self, target: Url) -> Url;
}

/// True when `url` carries configurator semantics: legacy `override://`
/// scheme or an explicit `category=configurators`.
pub fn is_configurator(url: &Url) -> bool {
    url.protocol() == OVERRIDE_PROTOCOL
        || url.protocol() == ABSENT_PROTOCOL
        || url.parameter(CATEGORY_KEY) == Some(CONFIGURATORS_CATEGORY)
}

/// Turn a notified configurator URL set into rules.
///
/// Returns `None` for an empty input (callers keep their current rules); an
/// `empty://` marker clears the list. Rules with no effective override
/// parameters are dropped.
pub fn to_configurators(urls: &[Url]) -> Option<Vec<Arc<dyn Configurator>>> {
    if urls.is_empty() {
        return None;
    }
    let mut configurators: Vec<Arc<dyn Configurator>> = Vec::new();
    for url in urls {
        if url.protocol() == EMPTY_PROTOCOL {
            return Some(Vec::new());
        }
        if overrides_of(url).is_empty() {
            debug!(url = %url, "configurator url carries no overrides, skipped");
            continue;
        }
        if url.protocol() == ABSENT_PROTOCOL {
            configurators.push(Arc::new(AbsentConfigurator { url: url.clone() }));
        } else {
            configurators.push(Arc::new(OverrideConfigurator { url: url.clone() }));
        }
    }
    Some(configurators)
}

/// Apply a rule list in order; conflicts resolve last-writer-wins.
pub fn configure_url(configurators: &[Arc<dyn Configurator>], mut url: Url) -> Url {
    for configurator in configurators {
        url = configurator.configure(url);
    }
    url
}

fn overrides_of(rule: &Url) -> Vec<(String, String)> {
    rule.parameters()
        .iter()
        .filter(|(k, _)| !CONTROL_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Rule match predicate: host (anyhost or equal, port 0 or equal), service
/// identity (interface/group/version, each wildcardable), then the optional
/// `side` and `application` gates.
fn matches(rule: &Url, target: &Url) -> bool {
    if !rule.bool_parameter(ENABLED_KEY, true) {
        return false;
    }
    let any_host = rule.host() == "0.0.0.0" || rule.host().is_empty();
    if !any_host && rule.host() != target.host() {
        return false;
    }
    if rule.port() != 0 && rule.port() != target.port() {
        return false;
    }

    let interface = rule.service_interface();
    if interface != ANY_VALUE && interface != target.service_interface() {
        return false;
    }
    for key in [GROUP_KEY, VERSION_KEY] {
        let wanted = rule.parameter_or(key, ANY_VALUE);
        if wanted != ANY_VALUE && wanted != target.parameter_or(key, "") {
            return false;
        }
    }
    if let Some(side) = rule.parameter(SIDE_KEY) {
        if !side.is_empty() && Some(side) != target.parameter(SIDE_KEY) {
            return false;
        }
    }
    if let Some(application) = rule.parameter(APPLICATION_KEY) {
        if !application.is_empty()
            && application != ANY_VALUE
            && Some(application) != target.parameter(APPLICATION_KEY)
        {
            return false;
        }
    }
    true
}

struct OverrideConfigurator {
    url: Url,
}

impl Configurator for OverrideConfigurator {
    fn url(&self) -> &Url {
        &self.url
    }

    fn configure(&self, target: Url) -> Url {
        if !matches(&self.url, &target) {
            return target;
        }
        target.with_parameters(overrides_of(&self.url))
    }
}

struct AbsentConfigurator {
    url: Url,
}

impl Configurator for AbsentConfigurator {
    fn url(&self) -> &Url {
        &self.url
    }

    fn configure(&self, target: Url) -> Url {
        if !matches(&self.url, &target) {
            return target;
        }
        target.with_parameters_if_absent(overrides_of(&self.url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> Url {
        Url::parse("relay://10.0.0.1:20880/com.X?application=demo&timeout=1000").unwrap()
    }

    #[test]
    fn override_rule_wins_on_conflicts() {
        let rule = Url::parse("override://0.0.0.0/com.X?category=configurators&timeout=5000").unwrap();
        let configurators = to_configurators(&[rule]).unwrap();
        let configured = configure_url(&configurators, provider());
        assert_eq!(configured.parameter("timeout"), Some("5000"));
    }

    #[test]
    fn absent_rule_only_fills_gaps() {
        let rule =
            Url::parse("absent://0.0.0.0/com.X?timeout=5000&weight=7").unwrap();
        let configurators = to_configurators(&[rule]).unwrap();
        let configured = configure_url(&configurators, provider());
        assert_eq!(configured.parameter("timeout"), Some("1000"));
        assert_eq!(configured.parameter("weight"), Some("7"));
    }

    #[test]
    fn host_and_service_gate_the_rule() {
        let other_host =
            Url::parse("override://10.0.0.9:20880/com.X?timeout=5000").unwrap();
        let other_service = Url::parse("override://0.0.0.0/com.Y?timeout=5000").unwrap();
        let configurators = to_configurators(&[other_host, other_service]).unwrap();
        let configured = configure_url(&configurators, provider());
        assert_eq!(configured.parameter("timeout"), Some("1000"));
    }

    #[test]
    fn disabled_rules_are_inert() {
        let rule = Url::parse("override://0.0.0.0/com.X?enabled=false&timeout=5000").unwrap();
        let configurators = to_configurators(&[rule]).unwrap();
        let configured = configure_url(&configurators, provider());
        assert_eq!(configured.parameter("timeout"), Some("1000"));
    }

    #[test]
    fn empty_marker_clears_the_list() {
        let marker = Url::parse("empty://0.0.0.0/com.X?category=configurators").unwrap();
        let rule = Url::parse("override://0.0.0.0/com.X?timeout=5000").unwrap();
        assert!(to_configurators(&[rule, marker]).unwrap().is_empty());
        assert!(to_configurators(&[]).is_none());
    }

    #[test]
    fn control_keys_are_not_applied() {
        let rule = Url::parse(
            "override://0.0.0.0/com.X?category=configurators&check=false&dynamic=false&timeout=9",
        )
        .unwrap();
        let configurators = to_configurators(&[rule]).unwrap();
        let configured = configure_url(&configurators, provider());
        assert_eq!(configured.parameter("timeout"), Some("9"));
        assert_eq!(configured.parameter("check"), None);
        assert_eq!(configured.parameter("dynamic"), None);
    }
}
