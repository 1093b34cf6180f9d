// Mouse server component
// Pointer motion, buttons and scrolling through the X11 XTEST extension

use crate::component::{CallResult, CapabilityKind, Component, Invocation};
use crate::registry::HostContext;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::xproto::{
    ConnectionExt as XprotoConnectionExt, Window, BUTTON_PRESS_EVENT, BUTTON_RELEASE_EVENT,
    MOTION_NOTIFY_EVENT,
};
use x11rb::protocol::xtest::{self, ConnectionExt as XtestConnectionExt};
use x11rb::rust_connection::RustConnection;

pub const PROCEDURE_POSITION: &str = "mouse.position";
pub const PROCEDURE_MOVE: &str = "mouse.move";
pub const PROCEDURE_MOVE_TO: &str = "mouse.move_to";
pub const PROCEDURE_CLICK: &str = "mouse.click";
pub const PROCEDURE_PRESS: &str = "mouse.press";
pub const PROCEDURE_RELEASE: &str = "mouse.release";
pub const PROCEDURE_SCROLL: &str = "mouse.scroll";

const MAX_CLICK_COUNT: i64 = 3;
const MAX_SCROLL_STEPS: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Left,
    Middle,
    Right,
}

impl Button {
    /// X11 core button number
    pub fn code(self) -> u8 {
        match self {
            Button::Left => 1,
            Button::Middle => 2,
            Button::Right => 3,
        }
    }

    fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::String(name) => match name.to_ascii_lowercase().as_str() {
                "left" => Ok(Button::Left),
                "middle" => Ok(Button::Middle),
                "right" => Ok(Button::Right),
                other => Err(Error::invalid_argument(format!(
                    "unknown button '{}' (expected left, middle or right)",
                    other
                ))),
            },
            Value::Number(n) => match n.as_i64() {
                Some(1) => Ok(Button::Left),
                Some(2) => Ok(Button::Middle),
                Some(3) => Ok(Button::Right),
                _ => Err(Error::invalid_argument(format!(
                    "button number {} out of range 1-3",
                    n
                ))),
            },
            other => Err(Error::invalid_argument(format!(
                "button must be a name or number, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    /// Wheel buttons 4-7
    pub fn code(self) -> u8 {
        match self {
            ScrollDirection::Up => 4,
            ScrollDirection::Down => 5,
            ScrollDirection::Left => 6,
            ScrollDirection::Right => 7,
        }
    }

    fn parse(value: &Value) -> Result<Self> {
        let name = value.as_str().ok_or_else(|| {
            Error::invalid_argument(format!("scroll direction must be a string, got {}", value))
        })?;
        match name.to_ascii_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "left" => Ok(ScrollDirection::Left),
            "right" => Ok(ScrollDirection::Right),
            other => Err(Error::invalid_argument(format!(
                "unknown scroll direction '{}' (expected up, down, left or right)",
                other
            ))),
        }
    }
}

/// A validated pointer request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseAction {
    Position,
    MoveBy { dx: i16, dy: i16 },
    MoveTo { x: i16, y: i16 },
    Click { button: Button, count: u8 },
    Press(Button),
    Release(Button),
    Scroll { direction: ScrollDirection, steps: u8 },
}

fn coordinate(invocation: &Invocation, index: usize, name: &str) -> Result<i16> {
    let value = invocation
        .arg_or_kwarg(index, name)
        .ok_or_else(|| Error::invalid_argument(format!("missing argument '{}'", name)))?;
    let number = value.as_i64().ok_or_else(|| {
        Error::invalid_argument(format!("'{}' must be an integer, got {}", name, value))
    })?;
    i16::try_from(number)
        .map_err(|_| Error::invalid_argument(format!("'{}' = {} is out of range", name, number)))
}

fn optional_count(invocation: &Invocation, index: usize, name: &str) -> Result<Option<i64>> {
    match invocation.arg_or_kwarg(index, name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            Error::invalid_argument(format!("'{}' must be an integer, got {}", name, value))
        }),
    }
}

fn button_arg(invocation: &Invocation, index: usize, default: Option<Button>) -> Result<Button> {
    match (invocation.arg_or_kwarg(index, "button"), default) {
        (Some(value), _) => Button::parse(value),
        (None, Some(button)) => Ok(button),
        (None, None) => Err(Error::invalid_argument("missing argument 'button'")),
    }
}

impl MouseAction {
    pub fn parse(procedure: &str, invocation: &Invocation) -> Result<Self> {
        match procedure {
            PROCEDURE_POSITION => Ok(MouseAction::Position),
            PROCEDURE_MOVE => Ok(MouseAction::MoveBy {
                dx: coordinate(invocation, 0, "dx")?,
                dy: coordinate(invocation, 1, "dy")?,
            }),
            PROCEDURE_MOVE_TO => Ok(MouseAction::MoveTo {
                x: coordinate(invocation, 0, "x")?,
                y: coordinate(invocation, 1, "y")?,
            }),
            PROCEDURE_CLICK => {
                let button = button_arg(invocation, 0, Some(Button::Left))?;
                let count = optional_count(invocation, 1, "count")?.unwrap_or(1);
                if !(1..=MAX_CLICK_COUNT).contains(&count) {
                    return Err(Error::invalid_argument(format!(
                        "click count {} out of range 1-{}",
                        count, MAX_CLICK_COUNT
                    )));
                }
                Ok(MouseAction::Click {
                    button,
                    count: count as u8,
                })
            }
            PROCEDURE_PRESS => Ok(MouseAction::Press(button_arg(invocation, 0, None)?)),
            PROCEDURE_RELEASE => Ok(MouseAction::Release(button_arg(invocation, 0, None)?)),
            PROCEDURE_SCROLL => {
                let direction = invocation
                    .arg_or_kwarg(0, "direction")
                    .ok_or_else(|| Error::invalid_argument("missing argument 'direction'"))
                    .and_then(ScrollDirection::parse)?;
                let steps = optional_count(invocation, 1, "steps")?
                    .unwrap_or(1)
                    .clamp(1, MAX_SCROLL_STEPS);
                Ok(MouseAction::Scroll {
                    direction,
                    steps: steps as u8,
                })
            }
            other => Err(Error::NoSuchProcedure(other.to_string())),
        }
    }
}

/// Check that an absolute position lies on a screen of the given size
pub fn validate_position(x: i16, y: i16, width: u16, height: u16) -> Result<()> {
    if x < 0 || y < 0 || x as i32 >= width as i32 || y as i32 >= height as i32 {
        return Err(Error::invalid_argument(format!(
            "position ({}, {}) is outside the {}x{} screen",
            x, y, width, height
        )));
    }
    Ok(())
}

struct Display {
    conn: RustConnection,
    root: Window,
    width: u16,
    height: u16,
}

impl Display {
    fn open() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).map_err(|e| {
            Error::x11_connection(format!("Failed to connect to X11 display: {}", e))
        })?;

        let ext = conn
            .extension_information(xtest::X11_EXTENSION_NAME)
            .map_err(|e| Error::X11Protocol(format!("Failed to query XTEST extension: {}", e)))?;
        if ext.is_none() {
            return Err(Error::component_unavailable(
                "MouseServerComponent",
                "X server does not support the XTEST extension",
            ));
        }

        let screen = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or_else(|| Error::X11Protocol("No X11 screens available".to_string()))?;
        let (root, width, height) = (screen.root, screen.width_in_pixels, screen.height_in_pixels);

        Ok(Self {
            conn,
            root,
            width,
            height,
        })
    }

    fn fake(&self, event_type: u8, detail: u8, x: i16, y: i16) -> Result<()> {
        self.conn
            .xtest_fake_input(event_type, detail, x11rb::CURRENT_TIME, self.root, x, y, 0)
            .map_err(|e| Error::X11Protocol(format!("XTEST fake input failed: {}", e)))?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.conn
            .flush()
            .map_err(|e| Error::X11Protocol(format!("Failed to flush X11 connection: {}", e)))
    }

    fn position(&self) -> Result<(i16, i16)> {
        let reply = self
            .conn
            .query_pointer(self.root)
            .map_err(|e| Error::X11Protocol(format!("Failed to query pointer: {}", e)))?
            .reply()
            .map_err(|e| Error::X11Protocol(format!("Failed to get pointer reply: {}", e)))?;
        Ok((reply.root_x, reply.root_y))
    }

    fn apply(&self, action: MouseAction) -> Result<CallResult> {
        match action {
            MouseAction::Position => {
                let (x, y) = self.position()?;
                return Ok(CallResult::values(vec![json!(x), json!(y)]));
            }
            MouseAction::MoveBy { dx, dy } => {
                // detail 1 marks the motion as relative
                self.fake(MOTION_NOTIFY_EVENT, 1, dx, dy)?;
            }
            MouseAction::MoveTo { x, y } => {
                validate_position(x, y, self.width, self.height)?;
                self.conn
                    .warp_pointer(x11rb::NONE, self.root, 0, 0, 0, 0, x, y)
                    .map_err(|e| Error::X11Protocol(format!("Failed to warp pointer: {}", e)))?;
            }
            MouseAction::Click { button, count } => {
                for _ in 0..count {
                    self.fake(BUTTON_PRESS_EVENT, button.code(), 0, 0)?;
                    self.fake(BUTTON_RELEASE_EVENT, button.code(), 0, 0)?;
                }
            }
            MouseAction::Press(button) => self.fake(BUTTON_PRESS_EVENT, button.code(), 0, 0)?,
            MouseAction::Release(button) => self.fake(BUTTON_RELEASE_EVENT, button.code(), 0, 0)?,
            MouseAction::Scroll { direction, steps } => {
                for _ in 0..steps {
                    self.fake(BUTTON_PRESS_EVENT, direction.code(), 0, 0)?;
                    self.fake(BUTTON_RELEASE_EVENT, direction.code(), 0, 0)?;
                }
            }
        }

        self.flush()?;
        Ok(CallResult::empty())
    }
}

pub struct MouseServer {
    display: Mutex<Display>,
}

impl MouseServer {
    pub fn factory(_ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async move {
            let screen = Display::open()?;
            let (width, height) = (screen.width, screen.height);
            info!("Mouse server attached to X11 screen {}x{}", width, height);
            Ok(Arc::new(MouseServer {
                display: Mutex::new(screen),
            }) as Arc<dyn Component>)
        })
    }
}

#[async_trait]
impl Component for MouseServer {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::CursorControl
    }

    fn procedures(&self) -> &'static [&'static str] {
        &[
            PROCEDURE_POSITION,
            PROCEDURE_MOVE,
            PROCEDURE_MOVE_TO,
            PROCEDURE_CLICK,
            PROCEDURE_PRESS,
            PROCEDURE_RELEASE,
            PROCEDURE_SCROLL,
        ]
    }

    async fn invoke(&self, procedure: &str, invocation: Invocation) -> Result<CallResult> {
        let action = MouseAction::parse(procedure, &invocation)?;
        debug!("Mouse action {:?}", action);

        let display = self
            .display
            .lock()
            .map_err(|_| Error::X11Protocol("X11 display lock poisoned".to_string()))?;
        display.apply(action)
    }
}
