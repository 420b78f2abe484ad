//! Shared helpers for the integration tests: a recording UI, event-loop
//! pumping, and unique session names so tests can share a tmpdir.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use kakoune::display::{DisplayBuffer, DisplayCoord, DisplayLine, Face};
use kakoune::event_loop::EventLoop;
use kakoune::keys::Key;
use kakoune::ui::{InfoStyle, MenuStyle, OnKey, UiOptions, UserInterface};

/// Opt into log output for a test (visible with `--nocapture`).
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A session name unique across the test process.
pub fn unique_session() -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!(
        "kak-test-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Run the loop until `predicate` holds, panicking after a few seconds.
pub fn pump_until(event_loop: &EventLoop, mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(
            Instant::now() < deadline,
            "timed out waiting for condition"
        );
        event_loop
            .run_once(Some(Duration::from_millis(20)))
            .unwrap();
    }
}

/// Run the loop for a fixed number of idle pulses, for "nothing should
/// happen" assertions.
pub fn pump(event_loop: &EventLoop, pulses: usize) {
    for _ in 0..pulses {
        event_loop
            .run_once(Some(Duration::from_millis(10)))
            .unwrap();
    }
}

/// One observed `UserInterface` call.
#[derive(Debug, Clone, PartialEq)]
pub enum UiCall {
    MenuShow {
        choices: Vec<DisplayLine>,
        anchor: DisplayCoord,
        style: MenuStyle,
    },
    MenuSelect(i32),
    MenuHide,
    InfoShow {
        title: String,
        content: String,
        style: InfoStyle,
    },
    InfoHide,
    Draw {
        display_buffer: DisplayBuffer,
        default_face: Face,
    },
    DrawStatus {
        status_line: DisplayLine,
    },
    Refresh(bool),
    SetOptions(UiOptions),
}

struct UiState {
    calls: Vec<UiCall>,
    on_key: Option<OnKey>,
    dimensions: DisplayCoord,
}

/// A `UserInterface` that records every call and lets the test inject key
/// events, standing in for a terminal backend.
pub struct RecordingUi {
    state: Rc<RefCell<UiState>>,
}

/// Test-side handle onto a [`RecordingUi`] that has been handed to a
/// client.
#[derive(Clone)]
pub struct UiHandle {
    state: Rc<RefCell<UiState>>,
}

impl RecordingUi {
    pub fn new(dimensions: DisplayCoord) -> (RecordingUi, UiHandle) {
        let state = Rc::new(RefCell::new(UiState {
            calls: Vec::new(),
            on_key: None,
            dimensions,
        }));
        (
            RecordingUi {
                state: state.clone(),
            },
            UiHandle { state },
        )
    }
}

impl UiHandle {
    pub fn calls(&self) -> Vec<UiCall> {
        self.state.borrow().calls.clone()
    }

    /// Simulate the terminal producing a key event.
    pub fn press(&self, key: Key) {
        let callback = self.state.borrow_mut().on_key.take();
        if let Some(mut callback) = callback {
            callback(key);
            self.state.borrow_mut().on_key = Some(callback);
        }
    }
}

impl UserInterface for RecordingUi {
    fn menu_show(
        &mut self,
        choices: &[DisplayLine],
        anchor: DisplayCoord,
        _fg: Face,
        _bg: Face,
        style: MenuStyle,
    ) {
        self.state.borrow_mut().calls.push(UiCall::MenuShow {
            choices: choices.to_vec(),
            anchor,
            style,
        });
    }

    fn menu_select(&mut self, selected: i32) {
        self.state
            .borrow_mut()
            .calls
            .push(UiCall::MenuSelect(selected));
    }

    fn menu_hide(&mut self) {
        self.state.borrow_mut().calls.push(UiCall::MenuHide);
    }

    fn info_show(
        &mut self,
        title: &str,
        content: &str,
        _anchor: DisplayCoord,
        _face: Face,
        style: InfoStyle,
    ) {
        self.state.borrow_mut().calls.push(UiCall::InfoShow {
            title: title.to_string(),
            content: content.to_string(),
            style,
        });
    }

    fn info_hide(&mut self) {
        self.state.borrow_mut().calls.push(UiCall::InfoHide);
    }

    fn draw(&mut self, display_buffer: &DisplayBuffer, default_face: Face, _padding_face: Face) {
        self.state.borrow_mut().calls.push(UiCall::Draw {
            display_buffer: display_buffer.clone(),
            default_face,
        });
    }

    fn draw_status(
        &mut self,
        status_line: &DisplayLine,
        _mode_line: &DisplayLine,
        _default_face: Face,
    ) {
        self.state.borrow_mut().calls.push(UiCall::DrawStatus {
            status_line: status_line.clone(),
        });
    }

    fn refresh(&mut self, force: bool) {
        self.state.borrow_mut().calls.push(UiCall::Refresh(force));
    }

    fn dimensions(&self) -> DisplayCoord {
        self.state.borrow().dimensions
    }

    fn set_on_key(&mut self, on_key: OnKey) {
        self.state.borrow_mut().on_key = Some(on_key);
    }

    fn set_ui_options(&mut self, options: &UiOptions) {
        self.state
            .borrow_mut()
            .calls
            .push(UiCall::SetOptions(options.clone()));
    }
}
