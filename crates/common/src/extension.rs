// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Plug-in resolution and composition.
//!
//! An *extension point* is a trait object type with a well-known qualified
//! name. Implementations register a factory under a qualified path; UTF-8
//! descriptor files (embedded or on disk) bind extension names to those
//! paths. The registry instantiates each (point, name) pair at most once,
//! injects dependencies through an [`factory::InjectionContext`], and wraps
//! instances with every registered decorator for the point.

pub mod adaptive;
mod descriptor;
pub mod factory;
mod loader;


use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::url::Url;

pub use factory::{ExtensionFactory, InjectionContext};
pub use loader::{Activate, ExtensionCtor, ImplKind, ImplSpec, WrapperCtor};

use loader::LoaderState;

/// Marker implemented for every trait object type usable as an extension
/// point.
///
/// `NAME` doubles as the descriptor file name; `DEFAULT` is the point's
/// default extension name, if any.
pub trait ExtensionPoint: Send + Sync + 'static {
    const NAME: &'static str;
    const DEFAULT: Option<&'static str>;
}

/// A type-erased extension instance: an `Arc<Arc<T>>` behind `dyn Any`.
pub type ErasedExtension = Arc<dyn Any + Send + Sync>;

#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("extension not found: {point}/{name}{}", .detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    NotFound {
        point: String,
        name: String,
        detail: Option<String>,
    },
    #[error("failed to instantiate extension {point}/{name}: {reason}")]
    InstantiationFailed {
        point: String,
        name: String,
        reason: String,
    },
    #[error("conflicting adaptive implementations for {point}: {first} and {second}")]
    AdaptiveConflict {
        point: String,
        first: String,
        second: String,
    },
    #[error("no adaptive implementation registered for {point}")]
    AdaptiveNotFound { point: String },
    #[error("unable to resolve extension name for {point} from url {url} using keys {keys:?}")]
    AdaptiveKeyMissing {
        point: String,
        keys: Vec<String>,
        url: String,
    },
}

/// Type-erased per-point operations, used by the `spi` object factory to
/// serve adaptive instances without knowing the point type.
struct PointOps {
    adaptive: Arc<dyn Fn(&Arc<ExtensionRegistry>) -> Result<ErasedExtension, ExtensionError> + Send + Sync>,
}

/// The process-wide plug-in registry.
///
/// Owns one [`LoaderState`] per extension point plus the descriptor roots
/// and the container of externally managed objects.
pub struct ExtensionRegistry {
    loaders: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    point_ops: RwLock<HashMap<&'static str, PointOps>>,
    roots: RwLock<Vec<PathBuf>>,
    container: RwLock<HashMap<String, ErasedExtension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Arc<Self> {
        let registry = Arc::new(ExtensionRegistry {
            loaders: RwLock::new(HashMap::new()),
            point_ops: RwLock::new(HashMap::new()),
            roots: RwLock::new(Vec::new()),
            container: RwLock::new(HashMap::new()),
        });
        factory::install(&registry);
        registry
    }

    /// Add a root directory probed for descriptor files. Each root is probed
    /// under its `internal/`, `extensions/` and `services/` prefixes, in
    /// that order.
    pub fn add_descriptor_root(&self, root: impl Into<PathBuf>) {
        self.roots.write().push(root.into());
    }

    /// Register embedded descriptor text for a point. Embedded sources rank
    /// as the internal directory: they are read before any on-disk file.
    pub fn register_descriptor<T: ExtensionPoint + ?Sized>(self: &Arc<Self>, text: &str) {
        self.state::<T>().add_source(text);
    }

    /// Register an implementation factory for a point, keyed by its
    /// qualified path. Descriptor lines referencing the path resolve to this
    /// factory.
    pub fn register_impl<T: ExtensionPoint + ?Sized>(self: &Arc<Self>, spec: ImplSpec<T>) {
        self.state::<T>().add_spec(spec);
    }

    /// Publish an externally managed object under a name, making it
    /// available to factories through the `container` object factory.
    pub fn register_object<O: ?Sized + Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
        object: Arc<O>,
    ) {
        self.container
            .write()
            .insert(name.into(), Arc::new(object) as ErasedExtension);
    }

    /// The named implementation, instantiated at most once per
    /// (point, name), dependency-injected and wrapped with the point's
    /// decorators.
    pub fn get_extension<T: ExtensionPoint + ?Sized>(
        self: &Arc<Self>,
        name: &str,
    ) -> Result<Arc<T>, ExtensionError> {
        self.state::<T>().get(self, name)
    }

    /// The point's default implementation, per its declared default name.
    pub fn get_default_extension<T: ExtensionPoint + ?Sized>(
        self: &Arc<Self>,
    ) -> Result<Arc<T>, ExtensionError> {
        let name = T::DEFAULT.ok_or_else(|| ExtensionError::NotFound {
            point: T::NAME.to_string(),
            name: "(default)".to_string(),
            detail: Some("point declares no default".to_string()),
        })?;
        self.get_extension::<T>(name)
    }

    /// The singleton adaptive instance for the point.
    pub fn get_adaptive_extension<T: ExtensionPoint + ?Sized>(
        self: &Arc<Self>,
    ) -> Result<Arc<T>, ExtensionError> {
        self.state::<T>().get_adaptive(self)
    }

    /// Ordered activate selection: extensions whose activation metadata
    /// matches `group` and whose activation keys appear as non-empty
    /// parameters in `url`, followed by the extensions explicitly listed in
    /// `names` (see [`loader`] for the `default` / `-name` grammar).
    pub fn get_activate_extensions<T: ExtensionPoint + ?Sized>(
        self: &Arc<Self>,
        url: &Url,
        names: &[&str],
        group: Option<&str>,
    ) -> Result<Vec<Arc<T>>, ExtensionError> {
        self.state::<T>().get_activate(self, url, names, group)
    }

    /// Activate selection with the explicit names taken from a URL
    /// parameter (comma-separated).
    pub fn get_activate_by_key<T: ExtensionPoint + ?Sized>(
        self: &Arc<Self>,
        url: &Url,
        key: &str,
        group: Option<&str>,
    ) -> Result<Vec<Arc<T>>, ExtensionError> {
        let value = url.parameter(key).unwrap_or("");
        let names: Vec<&str> = value
            .split(crate::constants::COMMA_SEPARATOR)
            .filter(|s| !s.is_empty())
            .collect();
        self.get_activate_extensions(url, &names, group)
    }

    pub fn has_extension<T: ExtensionPoint + ?Sized>(self: &Arc<Self>, name: &str) -> bool {
        self.state::<T>().has(self, name)
    }

    pub fn supported_extensions<T: ExtensionPoint + ?Sized>(self: &Arc<Self>) -> Vec<String> {
        self.state::<T>().supported(self)
    }

    pub(crate) fn descriptor_roots(&self) -> Vec<PathBuf> {
        self.roots.read().clone()
    }

    pub(crate) fn container_object(&self, name: &str) -> Option<ErasedExtension> {
        self.container.read().get(name).cloned()
    }

    pub(crate) fn point_adaptive(
        self: &Arc<Self>,
        point_name: &str,
    ) -> Option<Result<ErasedExtension, ExtensionError>> {
        // clone out of the lock; resolving the adaptive may touch other points
        let adaptive = self
            .point_ops
            .read()
            .get(point_name)
            .map(|ops| ops.adaptive.clone());
        adaptive.map(|adaptive| adaptive(self))
    }

    fn state<T: ExtensionPoint + ?Sized>(&self) -> Arc<LoaderState<T>> {
        let id = TypeId::of::<T>();
        if let Some(state) = self.loaders.read().get(&id) {
            return state
                .clone()
                .downcast::<LoaderState<T>>()
                .expect("loader state registered under a foreign type id");
        }
        let mut loaders = self.loaders.write();
        let entry = loaders
            .entry(id)
            .or_insert_with(|| Arc::new(LoaderState::<T>::new()) as Arc<dyn Any + Send + Sync>)
            .clone();
        drop(loaders);
        self.point_ops.write().entry(T::NAME).or_insert_with(|| PointOps {
            adaptive: Arc::new(|registry: &Arc<ExtensionRegistry>| {
                registry
                    .get_adaptive_extension::<T>()
                    .map(|a| Arc::new(a) as ErasedExtension)
            }),
        });
        entry
            .downcast::<LoaderState<T>>()
            .expect("loader state registered under a foreign type id")
    }
}
