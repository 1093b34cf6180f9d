// Screen brightness component
// Reads the backlight level from sysfs and writes it through logind or sysfs

use crate::component::{CallResult, CapabilityKind, Component, Invocation};
use crate::config::BrightnessBackendKind;
use crate::registry::HostContext;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PROCEDURE_GET: &str = "screen.brightness.get";
pub const PROCEDURE_SET: &str = "screen.brightness.set";

const MIN_PERCENT: i64 = 1;
const MAX_PERCENT: i64 = 100;

/// A backlight device under /sys/class/backlight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BacklightDevice {
    pub name: String,
    pub path: PathBuf,
    pub max_brightness: u32,
}

impl BacklightDevice {
    /// Find the first usable device under `base`, by name order
    ///
    /// A missing base directory or an empty one yields `None`.
    pub fn discover(base: &Path) -> Option<Self> {
        let entries = fs::read_dir(base).ok()?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        candidates.sort();

        candidates.into_iter().find_map(|path| {
            let name = path.file_name()?.to_str()?.to_string();
            let raw = fs::read_to_string(path.join("max_brightness")).ok()?;
            match raw.trim().parse::<u32>() {
                Ok(max_brightness) if max_brightness > 0 => Some(Self {
                    name,
                    path,
                    max_brightness,
                }),
                _ => {
                    debug!("Skipping backlight device {}: unusable max_brightness", name);
                    None
                }
            }
        })
    }

    /// Current raw brightness value
    pub fn read_raw(&self) -> Result<u32> {
        let brightness_path = self.path.join("brightness");
        let brightness_str = fs::read_to_string(&brightness_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                Error::permission_denied(brightness_path.clone())
            } else {
                Error::Io(e)
            }
        })?;

        brightness_str.trim().parse::<u32>().map_err(|e| {
            Error::Parse(format!(
                "Failed to parse brightness from '{}': {}",
                brightness_str.trim(),
                e
            ))
        })
    }

    /// Current brightness as a percentage of the maximum
    pub fn read_percent(&self) -> Result<u32> {
        let current = self.read_raw()?;
        Ok(raw_to_percent(current, self.max_brightness))
    }
}

/// Clamp a requested percentage into 1..=100
pub fn clamp_percent(percent: i64) -> u32 {
    percent.clamp(MIN_PERCENT, MAX_PERCENT) as u32
}

pub fn percent_to_raw(percent: u32, max_brightness: u32) -> u32 {
    ((percent as u64 * max_brightness as u64) / 100) as u32
}

pub fn raw_to_percent(raw: u32, max_brightness: u32) -> u32 {
    if max_brightness == 0 {
        return 0;
    }
    ((raw as u64 * 100) / max_brightness as u64) as u32
}

/// Writes a raw brightness value to a device
#[async_trait]
pub trait BrightnessBackend: Send + Sync {
    async fn write(&self, device: &BacklightDevice, value: u32) -> Result<()>;
}

/// systemd-logind session call, works without write access to sysfs
pub struct LogindBackend {
    conn: zbus::Connection,
}

impl LogindBackend {
    pub async fn connect() -> Result<Self> {
        let conn = zbus::Connection::system()
            .await
            .map_err(|e| Error::dbus(format!("Failed to connect to the system bus: {}", e)))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl BrightnessBackend for LogindBackend {
    async fn write(&self, device: &BacklightDevice, value: u32) -> Result<()> {
        self.conn
            .call_method(
                Some("org.freedesktop.login1"),
                "/org/freedesktop/login1/session/auto",
                Some("org.freedesktop.login1.Session"),
                "SetBrightness",
                &("backlight", device.name.as_str(), value),
            )
            .await
            .map_err(|e| Error::dbus(format!("logind SetBrightness failed: {}", e)))?;
        Ok(())
    }
}

/// Direct write to the brightness file
pub struct SysfsBackend;

#[async_trait]
impl BrightnessBackend for SysfsBackend {
    async fn write(&self, device: &BacklightDevice, value: u32) -> Result<()> {
        if value > device.max_brightness {
            return Err(Error::invalid_argument(format!(
                "Value {} exceeds maximum brightness {}",
                value, device.max_brightness
            )));
        }

        let brightness_path = device.path.join("brightness");

        // Try to write, with one retry for transient failures
        let mut last_error = None;
        for attempt in 0..2 {
            match fs::write(&brightness_path, value.to_string()) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        return Err(Error::permission_denied(brightness_path));
                    }
                    last_error = Some(e);
                    if attempt == 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        }

        Err(last_error.map(Error::Io).unwrap_or(Error::DeviceNotAvailable))
    }
}

pub struct ScreenBrightness {
    device: Option<BacklightDevice>,
    backend: Box<dyn BrightnessBackend>,
}

impl ScreenBrightness {
    pub fn new(device: Option<BacklightDevice>, backend: Box<dyn BrightnessBackend>) -> Self {
        Self { device, backend }
    }

    pub fn factory(ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async move {
            let settings = &ctx.config.brightness;
            let device = BacklightDevice::discover(&settings.backlight_path);

            match &device {
                Some(device) => info!(
                    "Backlight device {} (max {})",
                    device.name, device.max_brightness
                ),
                None => warn!(
                    "No backlight device under {}; brightness calls will fail",
                    settings.backlight_path.display()
                ),
            }

            let backend: Box<dyn BrightnessBackend> = match settings.backend {
                BrightnessBackendKind::Logind => Box::new(LogindBackend::connect().await?),
                BrightnessBackendKind::Sysfs => Box::new(SysfsBackend),
            };

            Ok(Arc::new(Self::new(device, backend)) as Arc<dyn Component>)
        })
    }

    pub fn device(&self) -> Option<&BacklightDevice> {
        self.device.as_ref()
    }

    pub fn get_brightness(&self) -> Result<u32> {
        let device = self.device.as_ref().ok_or(Error::DeviceNotAvailable)?;
        device.read_percent()
    }

    /// Set brightness in percent; out of range values are clamped
    pub async fn set_brightness(&self, percent: i64) -> Result<()> {
        let device = self.device.as_ref().ok_or(Error::DeviceNotAvailable)?;
        let percent = clamp_percent(percent);
        let value = percent_to_raw(percent, device.max_brightness);

        self.backend.write(device, value).await?;
        debug!("Brightness set to {}% (raw {})", percent, value);
        Ok(())
    }
}

#[async_trait]
impl Component for ScreenBrightness {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::BrightnessControl
    }

    fn procedures(&self) -> &'static [&'static str] {
        &[PROCEDURE_GET, PROCEDURE_SET]
    }

    async fn invoke(&self, procedure: &str, invocation: Invocation) -> Result<CallResult> {
        match procedure {
            PROCEDURE_GET => Ok(CallResult::value(self.get_brightness()?)),
            PROCEDURE_SET => {
                let percent = invocation.arg_i64(0)?;
                self.set_brightness(percent).await?;
                Ok(CallResult::empty())
            }
            other => Err(Error::NoSuchProcedure(other.to_string())),
        }
    }
}
