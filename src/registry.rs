// Component registry
// Capability kind to factory in a fixed order; hosts walk it at startup

use crate::brightness::ScreenBrightness;
use crate::component::{CapabilityKind, Component};
use crate::config::Config;
use crate::cursor::MouseServer;
use crate::discovery::ServiceDiscovery;
use crate::lock::ScreenLock;
use crate::{Error, Result};
use futures::future::BoxFuture;
use std::sync::{Arc, OnceLock};

/// Everything a factory may need to build its component
#[derive(Debug, Clone)]
pub struct HostContext {
    pub config: Config,
    pub hostname: String,
}

impl HostContext {
    pub fn new(config: Config, hostname: impl Into<String>) -> Self {
        Self {
            config,
            hostname: hostname.into(),
        }
    }

    /// Build a context using the machine's hostname
    pub fn from_system(config: Config) -> Result<Self> {
        let hostname = nix::unistd::gethostname()
            .map_err(|e| Error::Io(e.into()))?
            .into_string()
            .map_err(|raw| Error::Parse(format!("Hostname is not valid UTF-8: {:?}", raw)))?;
        Ok(Self::new(config, hostname))
    }
}

pub type Factory = for<'a> fn(&'a HostContext) -> BoxFuture<'a, Result<Arc<dyn Component>>>;

#[derive(Clone)]
pub struct ComponentDescriptor {
    pub identity: &'static str,
    pub kind: CapabilityKind,
    factory: Factory,
}

impl std::fmt::Debug for ComponentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDescriptor")
            .field("identity", &self.identity)
            .field("kind", &self.kind)
            .finish()
    }
}

impl ComponentDescriptor {
    pub async fn instantiate(&self, ctx: &HostContext) -> Result<Arc<dyn Component>> {
        (self.factory)(ctx).await
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<ComponentDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the four desktop components
    pub fn with_standard_components() -> Self {
        let mut registry = Self::new();
        let standard: [(&'static str, CapabilityKind, Factory); 4] = [
            (
                "ScreenBrightnessComponent",
                CapabilityKind::BrightnessControl,
                ScreenBrightness::factory,
            ),
            (
                "MouseServerComponent",
                CapabilityKind::CursorControl,
                MouseServer::factory,
            ),
            (
                "ServiceDiscoveryComponent",
                CapabilityKind::ServiceDiscovery,
                ServiceDiscovery::factory,
            ),
            (
                "ScreenLockComponent",
                CapabilityKind::ScreenLock,
                ScreenLock::factory,
            ),
        ];

        for (identity, kind, factory) in standard {
            registry.entries.push(ComponentDescriptor {
                identity,
                kind,
                factory,
            });
        }
        registry
    }

    /// Add a component; identities and kinds must be unique
    pub fn register(
        &mut self,
        identity: &'static str,
        kind: CapabilityKind,
        factory: Factory,
    ) -> Result<()> {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.identity == identity || e.kind == kind)
        {
            return Err(Error::ConfigValidation(format!(
                "Component '{}' ({}) conflicts with registered component '{}' ({})",
                identity, kind, existing.identity, existing.kind
            )));
        }

        self.entries.push(ComponentDescriptor {
            identity,
            kind,
            factory,
        });
        Ok(())
    }

    /// Descriptors in registration order
    pub fn descriptors(&self) -> impl ExactSizeIterator<Item = &ComponentDescriptor> {
        self.entries.iter()
    }

    pub fn identities(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.identity).collect()
    }

    pub fn get(&self, kind: CapabilityKind) -> Option<&ComponentDescriptor> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// Construct the component for `kind`; factory errors are returned as-is
    pub async fn instantiate(
        &self,
        kind: CapabilityKind,
        ctx: &HostContext,
    ) -> Result<Arc<dyn Component>> {
        let descriptor = self.get(kind).ok_or_else(|| {
            Error::component_unavailable(kind.as_str(), "not present in the registry")
        })?;
        descriptor.instantiate(ctx).await
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Process-wide registry of the standard components, built on first use
pub fn standard() -> &'static Registry {
    static STANDARD: OnceLock<Registry> = OnceLock::new();
    STANDARD.get_or_init(Registry::with_standard_components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{CallResult, Invocation};
    use async_trait::async_trait;

    struct Probe;

    #[async_trait]
    impl Component for Probe {
        fn kind(&self) -> CapabilityKind {
            CapabilityKind::ScreenLock
        }

        fn procedures(&self) -> &'static [&'static str] {
            &["probe"]
        }

        async fn invoke(&self, _procedure: &str, _invocation: Invocation) -> Result<CallResult> {
            Ok(CallResult::value("probe"))
        }
    }

    fn probe_factory(_ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async { Ok(Arc::new(Probe) as Arc<dyn Component>) })
    }

    fn failing_factory(_ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async { Err(Error::x11_connection("no display")) })
    }

    #[test]
    fn test_standard_registry_has_four_components_in_order() {
        let identities = standard().identities();
        assert_eq!(
            identities,
            vec![
                "ScreenBrightnessComponent",
                "MouseServerComponent",
                "ServiceDiscoveryComponent",
                "ScreenLockComponent",
            ]
        );

        let kinds: Vec<_> = standard().descriptors().map(|d| d.kind).collect();
        assert_eq!(kinds, CapabilityKind::ALL.to_vec());
    }

    #[test]
    fn test_standard_identities_are_distinct() {
        let mut identities = standard().identities();
        identities.sort();
        identities.dedup();
        assert_eq!(identities.len(), 4);
    }

    #[test]
    fn test_standard_registry_is_idempotent() {
        let first = standard();
        let second = standard();
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.len(), 4);

        let a: Vec<_> = first.descriptors().map(|d| d.identity).collect();
        let b: Vec<_> = second.descriptors().map(|d| d.identity).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = Registry::new();
        registry
            .register("Probe", CapabilityKind::ScreenLock, probe_factory)
            .unwrap();

        assert!(registry
            .register("Probe", CapabilityKind::CursorControl, probe_factory)
            .is_err());
        assert!(registry
            .register("OtherProbe", CapabilityKind::ScreenLock, probe_factory)
            .is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_instantiate_runs_factory() {
        let mut registry = Registry::new();
        registry
            .register("Probe", CapabilityKind::ScreenLock, probe_factory)
            .unwrap();

        let ctx = HostContext::new(Config::default(), "test-host");
        let component = registry
            .instantiate(CapabilityKind::ScreenLock, &ctx)
            .await
            .unwrap();
        assert_eq!(component.kind(), CapabilityKind::ScreenLock);
        assert_eq!(component.procedures(), &["probe"]);
    }

    #[tokio::test]
    async fn test_instantiate_propagates_factory_error() {
        let mut registry = Registry::new();
        registry
            .register("Broken", CapabilityKind::CursorControl, failing_factory)
            .unwrap();

        let ctx = HostContext::new(Config::default(), "test-host");
        let err = match registry.instantiate(CapabilityKind::CursorControl, &ctx).await {
            Err(e) => e,
            Ok(_) => panic!("expected factory error"),
        };
        assert!(matches!(err, Error::X11Connection(_)));

        // Unknown kinds are reported, not panicked on
        assert!(registry
            .instantiate(CapabilityKind::ScreenLock, &ctx)
            .await
            .is_err());
    }
}
