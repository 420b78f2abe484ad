//! The user interface capability set.
//!
//! Everything the editor can ask of a terminal is expressed through
//! [`UserInterface`]. Two families of implementation exist: a local terminal
//! backend owned by the process, and [`RemoteUi`](crate::remote::RemoteUi),
//! which serialises every call onto a socket so the server can drive a
//! terminal owned by another process as if it were local.

use crate::display::{DisplayBuffer, DisplayCoord, DisplayLine, Face};
use crate::id_map::IdMap;
use crate::keys::Key;

/// Placement of a completion/selection menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuStyle {
    /// Anchored to the prompt area.
    Prompt,
    /// Anchored to a buffer coordinate.
    Inline,
}

/// Placement of an information box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoStyle {
    Prompt,
    Inline,
    InlineAbove,
    InlineBelow,
    MenuDoc,
}

/// UI option set shipped with `SetOptions` messages.
pub type UiOptions = IdMap<String>;

/// Callback invoked for every key event the interface produces.
pub type OnKey = Box<dyn FnMut(Key)>;

/// The capability set a terminal frontend exposes to the editor.
pub trait UserInterface {
    fn menu_show(
        &mut self,
        choices: &[DisplayLine],
        anchor: DisplayCoord,
        fg: Face,
        bg: Face,
        style: MenuStyle,
    );
    fn menu_select(&mut self, selected: i32);
    fn menu_hide(&mut self);

    fn info_show(
        &mut self,
        title: &str,
        content: &str,
        anchor: DisplayCoord,
        face: Face,
        style: InfoStyle,
    );
    fn info_hide(&mut self);

    fn draw(&mut self, display_buffer: &DisplayBuffer, default_face: Face, padding_face: Face);
    fn draw_status(&mut self, status_line: &DisplayLine, mode_line: &DisplayLine, default_face: Face);
    fn refresh(&mut self, force: bool);

    fn dimensions(&self) -> DisplayCoord;

    fn set_on_key(&mut self, on_key: OnKey);
    fn set_ui_options(&mut self, options: &UiOptions);
}

/// A user interface that displays nothing and produces no keys.
///
/// Used for headless contexts and as a stand-in in tests.
pub struct DummyUi {
    dimensions: DisplayCoord,
}

impl DummyUi {
    pub fn new() -> DummyUi {
        DummyUi {
            dimensions: DisplayCoord::new(24, 80),
        }
    }

    pub fn with_dimensions(dimensions: DisplayCoord) -> DummyUi {
        DummyUi { dimensions }
    }
}

impl Default for DummyUi {
    fn default() -> DummyUi {
        DummyUi::new()
    }
}

impl UserInterface for DummyUi {
    fn menu_show(
        &mut self,
        _choices: &[DisplayLine],
        _anchor: DisplayCoord,
        _fg: Face,
        _bg: Face,
        _style: MenuStyle,
    ) {
    }

    fn menu_select(&mut self, _selected: i32) {}

    fn menu_hide(&mut self) {}

    fn info_show(
        &mut self,
        _title: &str,
        _content: &str,
        _anchor: DisplayCoord,
        _face: Face,
        _style: InfoStyle,
    ) {
    }

    fn info_hide(&mut self) {}

    fn draw(&mut self, _display_buffer: &DisplayBuffer, _default_face: Face, _padding_face: Face) {}

    fn draw_status(
        &mut self,
        _status_line: &DisplayLine,
        _mode_line: &DisplayLine,
        _default_face: Face,
    ) {
    }

    fn refresh(&mut self, _force: bool) {}

    fn dimensions(&self) -> DisplayCoord {
        self.dimensions
    }

    fn set_on_key(&mut self, _on_key: OnKey) {}

    fn set_ui_options(&mut self, _options: &UiOptions) {}
}
