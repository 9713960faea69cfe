// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Well-known URL parameter keys and protocol names shared across the
//! workspace. Keys mirror the wire-visible vocabulary, so renaming one is a
//! compatibility break.

// URL schemes with special meaning to the integration layer.
pub const REGISTRY_PROTOCOL: &str = "registry";
pub const PROVIDER_PROTOCOL: &str = "provider";
pub const CONSUMER_PROTOCOL: &str = "consumer";
pub const OVERRIDE_PROTOCOL: &str = "override";
pub const ABSENT_PROTOCOL: &str = "absent";
pub const EMPTY_PROTOCOL: &str = "empty";
pub const ROUTE_PROTOCOL: &str = "route";

// Common parameter keys.
pub const INTERFACE_KEY: &str = "interface";
pub const GROUP_KEY: &str = "group";
pub const VERSION_KEY: &str = "version";
pub const APPLICATION_KEY: &str = "application";
pub const CATEGORY_KEY: &str = "category";
pub const SIDE_KEY: &str = "side";
pub const CHECK_KEY: &str = "check";
pub const ENABLED_KEY: &str = "enabled";
pub const DYNAMIC_KEY: &str = "dynamic";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const METHODS_KEY: &str = "methods";
pub const TIMEOUT_KEY: &str = "timeout";
pub const TOKEN_KEY: &str = "token";
pub const RELEASE_KEY: &str = "release";

// Registry integration keys.
pub const REGISTRY_KEY: &str = "registry";
pub const DEFAULT_REGISTRY: &str = "memory";
pub const EXPORT_KEY: &str = "export";
pub const REFER_KEY: &str = "refer";
pub const REGISTER_KEY: &str = "register";
pub const REGISTER_IP_KEY: &str = "register.ip";
pub const SIMPLIFIED_KEY: &str = "simplified";
pub const EXTRA_KEYS_KEY: &str = "extra.keys";
pub const SIMPLIFY_EXCLUDE_KEY: &str = "simplify.exclude";
pub const RETRY_PERIOD_KEY: &str = "retry.period";
pub const SHUTDOWN_TIMEOUT_KEY: &str = "shutdown.timeout";
pub const SERVICE_NAME_SEPARATOR_KEY: &str = "service.name.separator";
pub const CONFIG_VERSION_KEY: &str = "configVersion";

// Subscription categories.
pub const PROVIDERS_CATEGORY: &str = "providers";
pub const CONSUMERS_CATEGORY: &str = "consumers";
pub const CONFIGURATORS_CATEGORY: &str = "configurators";
pub const ROUTERS_CATEGORY: &str = "routers";
pub const DEFAULT_CATEGORY: &str = PROVIDERS_CATEGORY;

// Cluster keys.
pub const CLUSTER_KEY: &str = "cluster";
pub const LOADBALANCE_KEY: &str = "loadbalance";
pub const RETRIES_KEY: &str = "retries";
pub const ROUTER_KEY: &str = "router";
pub const TAG_KEY: &str = "tag";
pub const FORCE_TAG_KEY: &str = "tag.force";
pub const WEIGHT_KEY: &str = "weight";
pub const WARMUP_KEY: &str = "warmup";
pub const MOCK_KEY: &str = "mock";
pub const CONNECTIONS_KEY: &str = "connections";
pub const DEPRECATED_KEY: &str = "deprecated";
pub const CODEC_KEY: &str = "codec";
pub const SERIALIZATION_KEY: &str = "serialization";
pub const ACCESSLOG_KEY: &str = "accesslog";

pub const DEFAULT_CLUSTER: &str = "failover";
pub const MERGEABLE_CLUSTER: &str = "mergeable";
pub const DEFAULT_LOADBALANCE: &str = "random";
pub const DEFAULT_RETRIES: u32 = 2;

// Filter activation keys: the URL parameter listing extra filter names per
// side, and the activation groups.
pub const SERVICE_FILTER_KEY: &str = "service.filter";
pub const REFERENCE_FILTER_KEY: &str = "reference.filter";
pub const PROVIDER_SIDE: &str = "provider";
pub const CONSUMER_SIDE: &str = "consumer";

// Extension list grammar.
pub const ANY_VALUE: &str = "*";
pub const COMMA_SEPARATOR: char = ',';
pub const REMOVE_VALUE_PREFIX: char = '-';
pub const DEFAULT_KEY: &str = "default";

/// Parameter keys starting with this prefix are hidden and never persisted
/// in the naming service.
pub const HIDE_KEY_PREFIX: char = '.';

/// Suffix of dynamic-configuration rule keys carrying configurator payloads.
pub const CONFIGURATORS_SUFFIX: &str = ".configurators";

/// Service interface of the naming service itself; referring to it returns a
/// direct invoker over the registry instead of a directory-backed one.
pub const REGISTRY_SERVICE_INTERFACE: &str = "relay.registry.RegistryService";
