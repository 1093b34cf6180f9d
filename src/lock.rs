// Screen lock component
// Locks the session through whichever screensaver service is on the session bus

use crate::component::{CallResult, CapabilityKind, Component, Invocation};
use crate::registry::HostContext;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PROCEDURE_LOCK: &str = "screen.lock";
pub const PROCEDURE_IS_LOCKED: &str = "screen.islocked";

const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";

/// A screensaver or session manager that can lock the screen
#[derive(Debug, PartialEq, Eq)]
pub struct LockProvider {
    pub service: &'static str,
    pub path: &'static str,
    pub interface: &'static str,
    pub lock_method: &'static str,
    /// Method answering "is the screen locked"; not every provider has one
    pub active_method: Option<&'static str>,
}

/// Probe order, first present service wins
pub static PROVIDERS: [LockProvider; 8] = [
    LockProvider {
        service: "org.gnome.ScreenSaver",
        path: "/org/gnome/ScreenSaver",
        interface: "org.gnome.ScreenSaver",
        lock_method: "Lock",
        active_method: Some("GetActive"),
    },
    LockProvider {
        service: "org.freedesktop.ScreenSaver",
        path: "/ScreenSaver",
        interface: "org.freedesktop.ScreenSaver",
        lock_method: "Lock",
        active_method: Some("GetActive"),
    },
    LockProvider {
        service: "com.canonical.Unity.Session",
        path: "/com/canonical/Unity/Session",
        interface: "com.canonical.Unity.Session",
        lock_method: "Lock",
        active_method: Some("IsLocked"),
    },
    LockProvider {
        service: "org.cinnamon.ScreenSaver",
        path: "/org/cinnamon/ScreenSaver",
        interface: "org.cinnamon.ScreenSaver",
        lock_method: "Lock",
        active_method: Some("GetActive"),
    },
    LockProvider {
        service: "org.mate.ScreenSaver",
        path: "/org/mate/ScreenSaver",
        interface: "org.mate.ScreenSaver",
        lock_method: "Lock",
        active_method: Some("GetActive"),
    },
    LockProvider {
        service: "org.xscreensaver",
        path: "/org/xscreensaver/ScreenSaver",
        interface: "org.xscreensaver.ScreenSaver",
        lock_method: "Lock",
        active_method: Some("GetActive"),
    },
    LockProvider {
        service: "org.lxqt.ScreenSaver",
        path: "/org/lxqt/ScreenSaver",
        interface: "org.lxqt.ScreenSaver",
        lock_method: "Lock",
        active_method: Some("GetActive"),
    },
    LockProvider {
        service: "org.xfce.SessionManager",
        path: "/org/xfce/SessionManager",
        interface: "org.xfce.SessionManager",
        lock_method: "Lock",
        active_method: None,
    },
];

/// Outcome of introspecting one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Service is not on the bus
    Missing,
    Available,
    /// Service exists but introspection failed
    Failed,
}

impl ProbeOutcome {
    fn from_reply(reply: &zbus::Result<zbus::Message>) -> Self {
        match reply {
            Ok(_) => ProbeOutcome::Available,
            Err(zbus::Error::MethodError(name, _, _)) if name.as_str() == SERVICE_UNKNOWN => {
                ProbeOutcome::Missing
            }
            Err(_) => ProbeOutcome::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub provider: Option<&'static LockProvider>,
    pub initialized: bool,
}

impl Selection {
    /// Selection decided by a single probe; `None` means keep probing
    pub fn from_probe(provider: &'static LockProvider, outcome: ProbeOutcome) -> Option<Self> {
        match outcome {
            ProbeOutcome::Missing => None,
            ProbeOutcome::Available => Some(Self {
                provider: Some(provider),
                initialized: true,
            }),
            ProbeOutcome::Failed => Some(Self {
                provider: Some(provider),
                initialized: false,
            }),
        }
    }
}

async fn probe(conn: &zbus::Connection) -> Selection {
    for provider in PROVIDERS.iter() {
        let reply = conn
            .call_method(
                Some(provider.service),
                provider.path,
                Some("org.freedesktop.DBus.Introspectable"),
                "Introspect",
                &(),
            )
            .await;

        let outcome = ProbeOutcome::from_reply(&reply);
        debug!("Lock provider {}: {:?}", provider.service, outcome);

        if let Some(selection) = Selection::from_probe(provider, outcome) {
            return selection;
        }
    }
    Selection::default()
}

fn not_initialized() -> Error {
    Error::LockUnavailable("screen lock provider not initialized".to_string())
}

pub struct ScreenLock {
    conn: Option<zbus::Connection>,
    selection: Selection,
}

impl ScreenLock {
    pub fn new(conn: zbus::Connection, selection: Selection) -> Self {
        Self {
            conn: Some(conn),
            selection,
        }
    }

    /// A lock component with no provider; every call reports it
    pub fn unavailable() -> Self {
        Self {
            conn: None,
            selection: Selection::default(),
        }
    }

    pub fn provider(&self) -> Option<&'static LockProvider> {
        self.selection.provider
    }

    pub fn factory(_ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async move {
            let conn = zbus::Connection::session()
                .await
                .map_err(|e| Error::dbus(format!("Failed to connect to the session bus: {}", e)))?;

            let selection = probe(&conn).await;
            match (selection.provider, selection.initialized) {
                (Some(provider), true) => info!("Screen lock provider: {}", provider.service),
                (Some(provider), false) => warn!(
                    "Screen lock provider {} found but could not be introspected",
                    provider.service
                ),
                (None, _) => warn!("No screen lock provider on the session bus"),
            }

            Ok(Arc::new(Self::new(conn, selection)) as Arc<dyn Component>)
        })
    }

    fn ready(&self) -> Result<&'static LockProvider> {
        match self.selection {
            Selection {
                provider: Some(provider),
                initialized: true,
            } => Ok(provider),
            _ => Err(not_initialized()),
        }
    }

    fn connection(&self) -> Result<&zbus::Connection> {
        self.conn.as_ref().ok_or_else(not_initialized)
    }

    pub async fn lock(&self) -> Result<()> {
        let provider = self.ready()?;
        let conn = self.connection()?;
        conn.call_method(
            Some(provider.service),
            provider.path,
            Some(provider.interface),
            provider.lock_method,
            &(),
        )
        .await
        .map_err(|e| Error::dbus(format!("{}.{} failed: {}", provider.interface, provider.lock_method, e)))?;
        Ok(())
    }

    pub async fn is_locked(&self) -> Result<bool> {
        let provider = self.ready()?;
        let method = provider.active_method.ok_or_else(|| {
            Error::LockUnavailable("provider does not support isLocked".to_string())
        })?;
        let conn = self.connection()?;

        let reply = conn
            .call_method(
                Some(provider.service),
                provider.path,
                Some(provider.interface),
                method,
                &(),
            )
            .await
            .map_err(|e| Error::dbus(format!("{}.{} failed: {}", provider.interface, method, e)))?;

        reply
            .body()
            .deserialize::<bool>()
            .map_err(|e| Error::dbus(format!("Unexpected {} reply: {}", method, e)))
    }
}

#[async_trait]
impl Component for ScreenLock {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::ScreenLock
    }

    fn procedures(&self) -> &'static [&'static str] {
        &[PROCEDURE_LOCK, PROCEDURE_IS_LOCKED]
    }

    async fn invoke(&self, procedure: &str, _invocation: Invocation) -> Result<CallResult> {
        match procedure {
            PROCEDURE_LOCK => {
                self.lock().await?;
                Ok(CallResult::empty())
            }
            PROCEDURE_IS_LOCKED => Ok(CallResult::value(self.is_locked().await?)),
            other => Err(Error::NoSuchProcedure(other.to_string())),
        }
    }
}
