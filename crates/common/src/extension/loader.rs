// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Per-point loading state: registered factories, resolved descriptor
//! classes, instantiated singletons.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::constants::{DEFAULT_KEY, REMOVE_VALUE_PREFIX};
use crate::url::Url;

use super::descriptor::{self, DescriptorLine};
use super::factory::InjectionContext;
use super::{ExtensionError, ExtensionPoint, ExtensionRegistry};

/// Factory producing a fresh extension instance. Dependencies are pulled
/// from the [`InjectionContext`].
pub type ExtensionCtor<T> =
    Arc<dyn Fn(&InjectionContext<'_>) -> Result<Arc<T>, ExtensionError> + Send + Sync>;

/// Factory decorating an existing instance of the same point.
pub type WrapperCtor<T> =
    Arc<dyn Fn(Arc<T>, &InjectionContext<'_>) -> Result<Arc<T>, ExtensionError> + Send + Sync>;

/// Activation metadata: the extension is auto-selected when the requested
/// group matches and every probe finds at least one of `keys` as a
/// non-empty URL parameter.
#[derive(Clone, Debug, Default)]
pub struct Activate {
    pub groups: &'static [&'static str],
    pub keys: &'static [&'static str],
    pub order: i32,
}

pub enum ImplKind<T: ?Sized> {
    Normal(ExtensionCtor<T>),
    Wrapper(WrapperCtor<T>),
    Adaptive(ExtensionCtor<T>),
}

impl<T: ?Sized> Clone for ImplKind<T> {
    fn clone(&self) -> Self {
        match self {
            ImplKind::Normal(c) => ImplKind::Normal(c.clone()),
            ImplKind::Wrapper(c) => ImplKind::Wrapper(c.clone()),
            ImplKind::Adaptive(c) => ImplKind::Adaptive(c.clone()),
        }
    }
}

/// A registered implementation, keyed by its qualified path.
pub struct ImplSpec<T: ?Sized> {
    pub type_path: &'static str,
    pub name_hint: Option<&'static str>,
    pub activate: Option<Activate>,
    pub kind: ImplKind<T>,
}

impl<T: ?Sized> Clone for ImplSpec<T> {
    fn clone(&self) -> Self {
        ImplSpec {
            type_path: self.type_path,
            name_hint: self.name_hint,
            activate: self.activate.clone(),
            kind: self.kind.clone(),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> ImplSpec<T> {
    pub fn normal<F>(type_path: &'static str, ctor: F) -> Self
    where
        F: Fn(&InjectionContext<'_>) -> Result<Arc<T>, ExtensionError> + Send + Sync + 'static,
    {
        ImplSpec {
            type_path,
            name_hint: None,
            activate: None,
            kind: ImplKind::Normal(Arc::new(ctor)),
        }
    }

    pub fn wrapper<F>(type_path: &'static str, ctor: F) -> Self
    where
        F: Fn(Arc<T>, &InjectionContext<'_>) -> Result<Arc<T>, ExtensionError>
            + Send
            + Sync
            + 'static,
    {
        ImplSpec {
            type_path,
            name_hint: None,
            activate: None,
            kind: ImplKind::Wrapper(Arc::new(ctor)),
        }
    }

    pub fn adaptive<F>(type_path: &'static str, ctor: F) -> Self
    where
        F: Fn(&InjectionContext<'_>) -> Result<Arc<T>, ExtensionError> + Send + Sync + 'static,
    {
        ImplSpec {
            type_path,
            name_hint: None,
            activate: None,
            kind: ImplKind::Adaptive(Arc::new(ctor)),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name_hint = Some(name);
        self
    }

    pub fn with_activate(mut self, activate: Activate) -> Self {
        self.activate = Some(activate);
        self
    }
}

struct NamedImpl<T: ?Sized> {
    name: String,
    type_path: String,
    ctor: ExtensionCtor<T>,
    activate: Option<Activate>,
}

/// Descriptor resolution outcome for one point.
struct Resolved<T: ?Sized> {
    by_order: Vec<NamedImpl<T>>,
    index: HashMap<String, usize>,
    wrappers: Vec<(String, WrapperCtor<T>)>,
    adaptive: Option<(String, ExtensionCtor<T>)>,
    adaptive_conflict: Option<(String, String)>,
    /// Per-line problems, surfaced when the offending name is requested.
    errors: HashMap<String, String>,
}

/// One instantiation slot. The first caller creates under the lock; others
/// block on the same holder until the instance is published.
struct Holder<T: ?Sized> {
    cell: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized> Default for Holder<T> {
    fn default() -> Self {
        Holder {
            cell: Mutex::new(None),
        }
    }
}

pub(super) struct LoaderState<T: ?Sized + 'static> {
    specs: RwLock<Vec<ImplSpec<T>>>,
    sources: RwLock<Vec<String>>,
    resolved: Mutex<Option<Arc<Resolved<T>>>>,
    instances: Mutex<HashMap<String, Arc<Holder<T>>>>,
    adaptive: Holder<T>,
}

impl<T: ExtensionPoint + ?Sized> LoaderState<T> {
    pub(super) fn new() -> Self {
        LoaderState {
            specs: RwLock::new(Vec::new()),
            sources: RwLock::new(Vec::new()),
            resolved: Mutex::new(None),
            instances: Mutex::new(HashMap::new()),
            adaptive: Holder::default(),
        }
    }

    pub(super) fn add_source(&self, text: &str) {
        self.sources.write().push(text.to_string());
        *self.resolved.lock() = None;
    }

    pub(super) fn add_spec(&self, spec: ImplSpec<T>) {
        self.specs.write().push(spec);
        *self.resolved.lock() = None;
    }

    pub(super) fn get(
        &self,
        registry: &Arc<ExtensionRegistry>,
        name: &str,
    ) -> Result<Arc<T>, ExtensionError> {
        let resolved = self.resolve(registry);
        let position = match resolved.index.get(name) {
            Some(p) => *p,
            None => {
                return Err(ExtensionError::NotFound {
                    point: T::NAME.to_string(),
                    name: name.to_string(),
                    detail: resolved.errors.get(name).cloned(),
                })
            }
        };

        let holder = self
            .instances
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        let mut cell = holder.cell.lock();
        if let Some(instance) = cell.as_ref() {
            return Ok(instance.clone());
        }

        let entry = &resolved.by_order[position];
        let ctx = InjectionContext::new(registry);
        let mut instance = (entry.ctor)(&ctx)?;
        for (_, wrapper) in &resolved.wrappers {
            instance = wrapper(instance, &ctx)?;
        }
        debug!(point = T::NAME, name, path = %entry.type_path, "instantiated extension");
        *cell = Some(instance.clone());
        Ok(instance)
    }

    pub(super) fn get_adaptive(
        &self,
        registry: &Arc<ExtensionRegistry>,
    ) -> Result<Arc<T>, ExtensionError> {
        let resolved = self.resolve(registry);
        if let Some((first, second)) = &resolved.adaptive_conflict {
            return Err(ExtensionError::AdaptiveConflict {
                point: T::NAME.to_string(),
                first: first.clone(),
                second: second.clone(),
            });
        }
        let (path, ctor) = resolved
            .adaptive
            .as_ref()
            .ok_or_else(|| ExtensionError::AdaptiveNotFound {
                point: T::NAME.to_string(),
            })?;

        let mut cell = self.adaptive.cell.lock();
        if let Some(instance) = cell.as_ref() {
            return Ok(instance.clone());
        }
        let ctx = InjectionContext::new(registry);
        let instance = ctor(&ctx)?;
        debug!(point = T::NAME, path = %path, "instantiated adaptive extension");
        *cell = Some(instance.clone());
        Ok(instance)
    }

    pub(super) fn get_activate(
        &self,
        registry: &Arc<ExtensionRegistry>,
        url: &Url,
        names: &[&str],
        group: Option<&str>,
    ) -> Result<Vec<Arc<T>>, ExtensionError> {
        let resolved = self.resolve(registry);
        let remove_default = format!("{REMOVE_VALUE_PREFIX}{DEFAULT_KEY}");

        let mut activated: Vec<Arc<T>> = Vec::new();
        if !names.contains(&remove_default.as_str()) {
            let mut matched: Vec<(i32, usize, &str)> = Vec::new();
            for (idx, entry) in resolved.by_order.iter().enumerate() {
                let Some(activate) = &entry.activate else {
                    continue;
                };
                let negated = format!("{REMOVE_VALUE_PREFIX}{}", entry.name);
                if names.contains(&entry.name.as_str()) || names.contains(&negated.as_str()) {
                    continue;
                }
                if group_matches(group, activate.groups) && keys_active(activate.keys, url) {
                    matched.push((activate.order, idx, entry.name.as_str()));
                }
            }
            matched.sort_by_key(|(order, idx, _)| (*order, *idx));
            for (_, _, name) in matched {
                activated.push(self.get(registry, name)?);
            }
        }

        // Explicit names: `default` marks the insertion point of the
        // activated set; names before it end up in front.
        let mut explicit: Vec<Arc<T>> = Vec::new();
        for name in names {
            if name.starts_with(REMOVE_VALUE_PREFIX)
                || names.contains(&format!("{REMOVE_VALUE_PREFIX}{name}").as_str())
            {
                continue;
            }
            if *name == DEFAULT_KEY {
                for (offset, instance) in explicit.drain(..).enumerate() {
                    activated.insert(offset, instance);
                }
            } else {
                explicit.push(self.get(registry, name)?);
            }
        }
        activated.extend(explicit);
        Ok(activated)
    }

    pub(super) fn has(&self, registry: &Arc<ExtensionRegistry>, name: &str) -> bool {
        self.resolve(registry).index.contains_key(name)
    }

    pub(super) fn supported(&self, registry: &Arc<ExtensionRegistry>) -> Vec<String> {
        self.resolve(registry)
            .by_order
            .iter()
            .map(|e| e.name.clone())
            .collect()
    }

    /// Resolve descriptor lines against registered factories. Guarded by the
    /// per-interface `resolved` lock; the first caller loads, later callers
    /// reuse the cached outcome.
    fn resolve(&self, registry: &Arc<ExtensionRegistry>) -> Arc<Resolved<T>> {
        let mut guard = self.resolved.lock();
        if let Some(resolved) = guard.as_ref() {
            return resolved.clone();
        }

        let specs = self.specs.read().clone();
        let by_path: HashMap<&str, &ImplSpec<T>> =
            specs.iter().map(|s| (s.type_path, s)).collect();

        let mut texts = self.sources.read().clone();
        texts.extend(descriptor::read_roots(&registry.descriptor_roots(), T::NAME));

        let mut resolved = Resolved {
            by_order: Vec::new(),
            index: HashMap::new(),
            wrappers: Vec::new(),
            adaptive: None,
            adaptive_conflict: None,
            errors: HashMap::new(),
        };

        for text in &texts {
            for line in descriptor::parse_text(text) {
                match line {
                    Err(message) => {
                        resolved.errors.entry(message.clone()).or_insert(message);
                    }
                    Ok(DescriptorLine { name, type_path }) => {
                        let key = name.clone().unwrap_or_else(|| type_path.clone());
                        let Some(spec) = by_path.get(type_path.as_str()) else {
                            resolved
                                .errors
                                .insert(key, format!("no factory registered for {type_path}"));
                            continue;
                        };
                        match &spec.kind {
                            ImplKind::Wrapper(ctor) => {
                                if !resolved.wrappers.iter().any(|(p, _)| p == &type_path) {
                                    resolved.wrappers.push((type_path.clone(), ctor.clone()));
                                }
                            }
                            ImplKind::Adaptive(ctor) => match &resolved.adaptive {
                                None => resolved.adaptive = Some((type_path.clone(), ctor.clone())),
                                Some((first, _)) if *first != type_path => {
                                    resolved.adaptive_conflict =
                                        Some((first.clone(), type_path.clone()));
                                }
                                Some(_) => {}
                            },
                            ImplKind::Normal(ctor) => {
                                let name = name
                                    .or_else(|| spec.name_hint.map(str::to_string))
                                    .unwrap_or_else(|| descriptor::derive_name(&type_path));
                                match resolved.index.get(&name).copied() {
                                    Some(existing)
                                        if resolved.by_order[existing].type_path != type_path =>
                                    {
                                        resolved.errors.insert(
                                            name.clone(),
                                            format!(
                                                "name {name} bound to both {} and {type_path}",
                                                resolved.by_order[existing].type_path
                                            ),
                                        );
                                        // an ambiguous binding is unusable
                                        resolved.index.remove(&name);
                                    }
                                    Some(_) => {}
                                    None => {
                                        resolved.index.insert(name.clone(), resolved.by_order.len());
                                        resolved.by_order.push(NamedImpl {
                                            name,
                                            type_path: type_path.clone(),
                                            ctor: ctor.clone(),
                                            activate: spec.activate.clone(),
                                        });
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let resolved = Arc::new(resolved);
        *guard = Some(resolved.clone());
        resolved
    }
}

fn group_matches(requested: Option<&str>, groups: &[&str]) -> bool {
    match requested {
        None | Some("") => true,
        Some(requested) => groups.contains(&requested),
    }
}

/// True when the activation key set is empty, or some key appears as a
/// non-empty URL parameter (either exactly or as a `.key` suffix).
fn keys_active(keys: &[&str], url: &Url) -> bool {
    if keys.is_empty() {
        return true;
    }
    for key in keys {
        for (k, v) in url.parameters() {
            let suffix = format!(".{key}");
            if (k == key || k.ends_with(&suffix)) && !v.is_empty() {
                return true;
            }
        }
    }
    false
}
