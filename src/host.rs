// Component host
// Builds the enabled components from the registry and exposes their procedures on the router

use crate::component::{CapabilityKind, Component};
use crate::registry::{HostContext, Registry};
use crate::wamp::{RegistrationId, Router};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Summary of a running component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub identity: String,
    pub kind: CapabilityKind,
    pub procedures: Vec<String>,
}

struct RunningComponent {
    identity: &'static str,
    component: Arc<dyn Component>,
    registrations: Vec<(String, RegistrationId)>,
}

pub struct ComponentHost {
    router: Arc<Router>,
    running: Vec<RunningComponent>,
    skipped: Vec<(&'static str, String)>,
}

impl ComponentHost {
    /// Construct every enabled component in registry order
    ///
    /// Recoverable construction failures (no display, no bus, no device) leave the
    /// component out; anything else aborts startup after tearing down what was built.
    pub async fn start(registry: &Registry, ctx: &HostContext, router: Arc<Router>) -> Result<Self> {
        let mut host = Self {
            router,
            running: Vec::new(),
            skipped: Vec::new(),
        };

        for descriptor in registry.descriptors() {
            if !ctx.config.is_enabled(descriptor.kind) {
                info!("{} disabled in configuration", descriptor.identity);
                continue;
            }

            let component = match descriptor.instantiate(ctx).await {
                Ok(component) => component,
                Err(e) if e.is_recoverable() => {
                    warn!("{} unavailable: {}", descriptor.identity, e);
                    host.skipped.push((descriptor.identity, e.to_string()));
                    continue;
                }
                Err(e) => {
                    error!("Failed to start {}: {}", descriptor.identity, e);
                    host.shutdown().await;
                    return Err(e);
                }
            };

            if let Err(e) = host.expose(descriptor.identity, component.clone(), ctx) {
                error!("Failed to expose {}: {}", descriptor.identity, e);
                if let Err(stop) = component.shutdown().await {
                    warn!("{} did not shut down cleanly: {}", descriptor.identity, stop);
                }
                host.shutdown().await;
                return Err(e);
            }
        }

        info!(
            "{} component(s) running, {} procedure(s) registered",
            host.running.len(),
            host.router.procedures().len()
        );
        Ok(host)
    }

    fn expose(
        &mut self,
        identity: &'static str,
        component: Arc<dyn Component>,
        ctx: &HostContext,
    ) -> Result<()> {
        let mut registrations = Vec::new();

        for &suffix in component.procedures() {
            let uri = ctx.config.procedure_uri(suffix);
            match self.router.register_local(&uri, component.clone(), suffix) {
                Ok(id) => registrations.push((uri, id)),
                Err(e) => {
                    for (_, id) in &registrations {
                        let _ = self.router.unregister(None, *id);
                    }
                    return Err(e);
                }
            }
        }

        info!("{} exposes {} procedure(s)", identity, registrations.len());
        self.running.push(RunningComponent {
            identity,
            component,
            registrations,
        });
        Ok(())
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn components(&self) -> Vec<ComponentStatus> {
        self.running
            .iter()
            .map(|running| ComponentStatus {
                identity: running.identity.to_string(),
                kind: running.component.kind(),
                procedures: running
                    .registrations
                    .iter()
                    .map(|(uri, _)| uri.clone())
                    .collect(),
            })
            .collect()
    }

    /// Components left out at startup with the reason
    pub fn skipped(&self) -> &[(&'static str, String)] {
        &self.skipped
    }

    /// Stop components in reverse start order
    pub async fn shutdown(&mut self) {
        while let Some(running) = self.running.pop() {
            for (uri, id) in &running.registrations {
                if let Err(e) = self.router.unregister(None, *id) {
                    warn!("Failed to unregister {}: {}", uri, e);
                }
            }
            if let Err(e) = running.component.shutdown().await {
                warn!("{} did not shut down cleanly: {}", running.identity, e);
            } else {
                info!("{} stopped", running.identity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{CallResult, Invocation};
    use crate::config::Config;
    use crate::Error;
    use async_trait::async_trait;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    static SHUTDOWN_ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());
    static ADVERTISER_STOPS: AtomicUsize = AtomicUsize::new(0);

    /// Stands in for a component holding an external resource
    struct Advertiser;

    #[async_trait]
    impl Component for Advertiser {
        fn kind(&self) -> CapabilityKind {
            CapabilityKind::ServiceDiscovery
        }

        fn procedures(&self) -> &'static [&'static str] {
            &["discovery.info"]
        }

        async fn invoke(&self, _procedure: &str, _invocation: Invocation) -> Result<CallResult> {
            Ok(CallResult::empty())
        }

        async fn shutdown(&self) -> Result<()> {
            ADVERTISER_STOPS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn advertiser(_ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async { Ok(Arc::new(Advertiser) as Arc<dyn Component>) })
    }

    struct Fake {
        kind: CapabilityKind,
        name: &'static str,
    }

    #[async_trait]
    impl Component for Fake {
        fn kind(&self) -> CapabilityKind {
            self.kind
        }

        fn procedures(&self) -> &'static [&'static str] {
            match self.kind {
                CapabilityKind::BrightnessControl => &["screen.brightness.get"],
                CapabilityKind::ScreenLock => &["screen.lock", "screen.islocked"],
                _ => &["same.name"],
            }
        }

        async fn invoke(&self, _procedure: &str, _invocation: Invocation) -> Result<CallResult> {
            Ok(CallResult::value(self.name))
        }

        async fn shutdown(&self) -> Result<()> {
            SHUTDOWN_ORDER.lock().unwrap().push(self.name);
            Ok(())
        }
    }

    fn brightness(_ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async {
            Ok(Arc::new(Fake {
                kind: CapabilityKind::BrightnessControl,
                name: "brightness",
            }) as Arc<dyn Component>)
        })
    }

    fn lock(_ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async {
            Ok(Arc::new(Fake {
                kind: CapabilityKind::ScreenLock,
                name: "lock",
            }) as Arc<dyn Component>)
        })
    }

    fn ordered_brightness(_ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async {
            Ok(Arc::new(Fake {
                kind: CapabilityKind::BrightnessControl,
                name: "ordered-brightness",
            }) as Arc<dyn Component>)
        })
    }

    fn ordered_lock(_ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async {
            Ok(Arc::new(Fake {
                kind: CapabilityKind::ScreenLock,
                name: "ordered-lock",
            }) as Arc<dyn Component>)
        })
    }

    fn no_display(_ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async { Err(Error::x11_connection("no display")) })
    }

    fn broken(_ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async { Err(Error::ConfigValidation("bad settings".into())) })
    }

    fn router() -> Arc<Router> {
        Arc::new(Router::new("realm1", Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_start_registers_prefixed_procedures() {
        let mut registry = Registry::new();
        registry
            .register("Brightness", CapabilityKind::BrightnessControl, brightness)
            .unwrap();
        registry
            .register("Mouse", CapabilityKind::CursorControl, no_display)
            .unwrap();
        registry
            .register("Lock", CapabilityKind::ScreenLock, lock)
            .unwrap();

        let ctx = HostContext::new(Config::default(), "test-host");
        let host = ComponentHost::start(&registry, &ctx, router()).await.unwrap();

        let components = host.components();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].identity, "Brightness");
        assert_eq!(
            components[0].procedures,
            vec!["io.xconn.deskconn.deskconnd.screen.brightness.get"]
        );
        assert_eq!(host.skipped().len(), 1);
        assert_eq!(host.skipped()[0].0, "Mouse");

        let result = host
            .router()
            .call("io.xconn.deskconn.deskconnd.screen.lock", Invocation::default())
            .await
            .unwrap();
        assert_eq!(result.args, vec![serde_json::json!("lock")]);
    }

    #[tokio::test]
    async fn test_disabled_components_are_skipped() {
        let mut registry = Registry::new();
        registry
            .register("Brightness", CapabilityKind::BrightnessControl, brightness)
            .unwrap();

        let mut config = Config::default();
        config.components.enabled = vec![CapabilityKind::ScreenLock];
        let ctx = HostContext::new(config, "test-host");

        let host = ComponentHost::start(&registry, &ctx, router()).await.unwrap();
        assert!(host.components().is_empty());
        assert!(host.router().procedures().is_empty());
    }

    #[tokio::test]
    async fn test_unrecoverable_error_aborts() {
        let mut registry = Registry::new();
        registry
            .register("Brightness", CapabilityKind::BrightnessControl, brightness)
            .unwrap();
        registry
            .register("Broken", CapabilityKind::ScreenLock, broken)
            .unwrap();

        let router = router();
        let ctx = HostContext::new(Config::default(), "test-host");
        let err = match ComponentHost::start(&registry, &ctx, router.clone()).await {
            Err(e) => e,
            Ok(_) => panic!("expected startup failure"),
        };
        assert!(err.is_config_error());
        // Already started components are torn down again
        assert!(router.procedures().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_procedure_aborts() {
        let router = router();
        router
            .register_local(
                "io.xconn.deskconn.deskconnd.screen.islocked",
                Arc::new(Fake {
                    kind: CapabilityKind::ScreenLock,
                    name: "squatter",
                }),
                "screen.islocked",
            )
            .unwrap();

        let mut registry = Registry::new();
        registry
            .register("Lock", CapabilityKind::ScreenLock, lock)
            .unwrap();

        let ctx = HostContext::new(Config::default(), "test-host");
        let err = match ComponentHost::start(&registry, &ctx, router.clone()).await {
            Err(e) => e,
            Ok(_) => panic!("expected duplicate procedure"),
        };
        assert_eq!(err.wamp_uri(), "wamp.error.procedure_already_exists");
        // Partial registrations of the failed component are rolled back
        assert_eq!(
            router.procedures(),
            vec!["io.xconn.deskconn.deskconnd.screen.islocked"]
        );
    }

    #[tokio::test]
    async fn test_failed_expose_stops_the_component() {
        let router = router();
        router
            .register_local(
                "io.xconn.deskconn.deskconnd.discovery.info",
                Arc::new(Fake {
                    kind: CapabilityKind::ServiceDiscovery,
                    name: "squatter",
                }),
                "discovery.info",
            )
            .unwrap();

        let mut registry = Registry::new();
        registry
            .register("Discovery", CapabilityKind::ServiceDiscovery, advertiser)
            .unwrap();

        let ctx = HostContext::new(Config::default(), "test-host");
        assert!(ComponentHost::start(&registry, &ctx, router).await.is_err());
        assert_eq!(ADVERTISER_STOPS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_reverse_order() {
        let mut registry = Registry::new();
        registry
            .register("Brightness", CapabilityKind::BrightnessControl, ordered_brightness)
            .unwrap();
        registry
            .register("Lock", CapabilityKind::ScreenLock, ordered_lock)
            .unwrap();

        let ctx = HostContext::new(Config::default(), "test-host");
        let mut host = ComponentHost::start(&registry, &ctx, router()).await.unwrap();
        host.shutdown().await;

        // Other tests shut down their own fakes concurrently
        let order: Vec<_> = SHUTDOWN_ORDER
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|name| name.starts_with("ordered-"))
            .collect();
        assert_eq!(order, vec!["ordered-lock", "ordered-brightness"]);
        assert!(host.components().is_empty());
        assert!(host.router().procedures().is_empty());
    }
}
