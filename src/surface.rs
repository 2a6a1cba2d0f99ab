//! The boundary with the live game page.
//!
//! `GameSurface` is everything the automation needs from the page: one text
//! field, a set of word elements with their rendered color, and the completion
//! container with its action buttons. `CdpSurface` talks to a real browser;
//! `ScriptedSurface` below is a deterministic stand-in for tests.

use crate::clock::{Clock, ManualClock};
use crate::error::{ColorParseError, SurfaceError};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

/// A rendered foreground color as reported by computed style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl FromStr for Rgb {
    type Err = ColorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ColorParseError {
            input: s.to_string(),
        };
        let inner = s
            .trim()
            .strip_prefix("rgb(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(err)?;
        let channels = inner
            .split(',')
            .map(|part| part.trim().parse::<u8>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| err())?;
        match channels.as_slice() {
            [r, g, b] => Ok(Rgb::new(*r, *g, *b)),
            _ => Err(err()),
        }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgb({}, {}, {})", self.r, self.g, self.b)
    }
}

impl TryFrom<String> for Rgb {
    type Error = ColorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(rgb: Rgb) -> Self {
        rgb.to_string()
    }
}

/// A text-bearing element on the page. `color` is `None` when the computed
/// style isn't a plain `rgb(...)` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextElement {
    pub text: String,
    pub color: Option<Rgb>,
}

impl TextElement {
    pub fn new(text: impl Into<String>, color: Rgb) -> Self {
        Self {
            text: text.into(),
            color: Some(color),
        }
    }
}

/// Primitive operations on the game page.
pub trait GameSurface {
    /// Whether the single-line text input exists right now.
    fn has_text_field(&mut self) -> Result<bool, SurfaceError>;

    /// Set the field value through the native setter and fire an `input` event.
    fn set_field_value(&mut self, value: &str) -> Result<(), SurfaceError>;

    fn field_focused(&mut self) -> Result<bool, SurfaceError>;

    fn focus_field(&mut self) -> Result<(), SurfaceError>;

    /// Dispatch a Tab keydown/keyup on the focused element, or the body.
    fn press_tab(&mut self) -> Result<(), SurfaceError>;

    /// Word elements in document order.
    fn text_elements(&mut self) -> Result<Vec<TextElement>, SurfaceError>;

    /// Number of buttons in the completion container, `None` if the
    /// container itself is absent.
    fn action_controls(&mut self) -> Result<Option<usize>, SurfaceError>;

    /// Click the control at `index`. `Ok(false)` if it no longer exists.
    fn click_control(&mut self, index: usize) -> Result<bool, SurfaceError>;

    /// Full page reload.
    fn reload(&mut self) -> Result<(), SurfaceError>;
}

/// What a `ScriptedSurface` was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    SetValue(String),
    Focus,
    Tab,
    Click(usize),
    Reload,
}

const INACTIVE_COLOR: Rgb = Rgb::new(100, 116, 139);

#[derive(Debug)]
struct ScriptState {
    field_present: bool,
    field_value: String,
    /// Writes accepted before the field is pulled from the page.
    field_writes_left: Option<usize>,
    focused: bool,
    words: VecDeque<String>,
    upcoming_rounds: VecDeque<Vec<String>>,
    controls: Option<usize>,
    controls_at_next_click: Option<usize>,
    end_round_when_exhausted: bool,
    pending_failures: usize,
    calls: Vec<(Duration, SurfaceCall)>,
    clock: Option<ManualClock>,
}

impl ScriptState {
    fn check_failure(&mut self) -> Result<(), SurfaceError> {
        if self.pending_failures > 0 {
            self.pending_failures -= 1;
            return Err(SurfaceError::Protocol {
                detail: "scripted failure".to_string(),
            });
        }
        Ok(())
    }

    fn record(&mut self, call: SurfaceCall) {
        let at = self.clock.as_ref().map(|c| c.now()).unwrap_or_default();
        self.calls.push((at, call));
    }

    fn finish_round_if_exhausted(&mut self) {
        if self.words.is_empty() && self.end_round_when_exhausted {
            self.controls = Some(2);
        }
    }
}

/// Scripted fake of the game page.
///
/// Serves one active word at a time; a value ending in a space submits the
/// word and reveals the next. Once the words run out the completion container
/// shows restart and submit buttons. Clicking restart loads the next queued
/// round. Clones share state so a test can keep a handle for assertions.
#[derive(Clone, Debug)]
pub struct ScriptedSurface {
    state: Rc<RefCell<ScriptState>>,
}

impl ScriptedSurface {
    pub fn new<S: AsRef<str>>(words: &[S]) -> Self {
        Self {
            state: Rc::new(RefCell::new(ScriptState {
                field_present: true,
                field_value: String::new(),
                field_writes_left: None,
                focused: false,
                words: words.iter().map(|w| w.as_ref().to_string()).collect(),
                upcoming_rounds: VecDeque::new(),
                controls: None,
                controls_at_next_click: None,
                end_round_when_exhausted: true,
                pending_failures: 0,
                calls: Vec::new(),
                clock: None,
            })),
        }
    }

    /// Stamp every recorded call with the clock's current time.
    pub fn with_clock(self, clock: ManualClock) -> Self {
        self.state.borrow_mut().clock = Some(clock);
        self
    }

    /// Keep the completion container hidden even after the last word.
    pub fn keep_round_open(self) -> Self {
        self.state.borrow_mut().end_round_when_exhausted = false;
        self
    }

    /// Words served after the next restart click.
    pub fn queue_round<S: AsRef<str>>(&self, words: &[S]) {
        self.state
            .borrow_mut()
            .upcoming_rounds
            .push_back(words.iter().map(|w| w.as_ref().to_string()).collect());
    }

    pub fn set_field_present(&self, present: bool) {
        self.state.borrow_mut().field_present = present;
    }

    /// Remove the text field once `writes` more values have been set.
    pub fn remove_field_after(&self, writes: usize) {
        self.state.borrow_mut().field_writes_left = Some(writes);
    }

    pub fn set_controls(&self, controls: Option<usize>) {
        self.state.borrow_mut().controls = controls;
    }

    /// The container drops to `count` buttons right before the next click
    /// lands, as if the page re-rendered between observing and clicking.
    pub fn shrink_controls_before_next_click(&self, count: usize) {
        self.state.borrow_mut().controls_at_next_click = Some(count);
    }

    /// The next `count` surface calls fail with a protocol error.
    pub fn fail_next(&self, count: usize) {
        self.state.borrow_mut().pending_failures = count;
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.state
            .borrow()
            .calls
            .iter()
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn timed_calls(&self) -> Vec<(Duration, SurfaceCall)> {
        self.state.borrow().calls.clone()
    }

    pub fn applied_values(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::SetValue(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    pub fn clicks(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SurfaceCall::Click(i) => Some(i),
                _ => None,
            })
            .collect()
    }

    pub fn field_value(&self) -> String {
        self.state.borrow().field_value.clone()
    }

    pub fn remaining_words(&self) -> Vec<String> {
        self.state.borrow().words.iter().cloned().collect()
    }
}

impl GameSurface for ScriptedSurface {
    fn has_text_field(&mut self) -> Result<bool, SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.check_failure()?;
        Ok(state.field_present)
    }

    fn set_field_value(&mut self, value: &str) -> Result<(), SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.check_failure()?;
        if !state.field_present {
            return Err(SurfaceError::ElementNotFound {
                what: "text field".to_string(),
            });
        }
        state.record(SurfaceCall::SetValue(value.to_string()));
        if let Some(left) = state.field_writes_left {
            let left = left.saturating_sub(1);
            state.field_writes_left = (left > 0).then_some(left);
            state.field_present &= left > 0;
        }
        if state.field_value == value {
            return Ok(());
        }
        if value.ends_with(' ') {
            // the game accepts the word and clears the input
            state.words.pop_front();
            state.field_value.clear();
            state.finish_round_if_exhausted();
        } else {
            state.field_value = value.to_string();
        }
        Ok(())
    }

    fn field_focused(&mut self) -> Result<bool, SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.check_failure()?;
        Ok(state.focused)
    }

    fn focus_field(&mut self) -> Result<(), SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.check_failure()?;
        state.record(SurfaceCall::Focus);
        state.focused = true;
        Ok(())
    }

    fn press_tab(&mut self) -> Result<(), SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.check_failure()?;
        state.record(SurfaceCall::Tab);
        state.focused = state.field_present;
        Ok(())
    }

    fn text_elements(&mut self) -> Result<Vec<TextElement>, SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.check_failure()?;
        Ok(state
            .words
            .iter()
            .enumerate()
            .map(|(i, word)| {
                let color = if i == 0 { Rgb::WHITE } else { INACTIVE_COLOR };
                TextElement::new(word.clone(), color)
            })
            .collect())
    }

    fn action_controls(&mut self) -> Result<Option<usize>, SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.check_failure()?;
        Ok(state.controls)
    }

    fn click_control(&mut self, index: usize) -> Result<bool, SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.check_failure()?;
        state.record(SurfaceCall::Click(index));
        if let Some(count) = state.controls_at_next_click.take() {
            state.controls = Some(count);
        }
        if state.controls.map_or(true, |count| index >= count) {
            return Ok(false);
        }
        if index == 0 {
            state.controls = None;
            state.field_value.clear();
            state.focused = false;
            state.words = state.upcoming_rounds.pop_front().unwrap_or_default().into();
        }
        Ok(true)
    }

    fn reload(&mut self) -> Result<(), SurfaceError> {
        let mut state = self.state.borrow_mut();
        state.check_failure()?;
        state.record(SurfaceCall::Reload);
        state.focused = false;
        state.field_value.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_computed_style_colors() {
        assert_eq!("rgb(255, 255, 255)".parse::<Rgb>(), Ok(Rgb::WHITE));
        assert_eq!("  rgb(1,2,3) ".parse::<Rgb>(), Ok(Rgb::new(1, 2, 3)));
        assert!("rgba(255, 255, 255, 0.5)".parse::<Rgb>().is_err());
        assert!("rgb(256, 0, 0)".parse::<Rgb>().is_err());
        assert!("rgb(1, 2)".parse::<Rgb>().is_err());
        assert!("#ffffff".parse::<Rgb>().is_err());
    }

    #[test]
    fn color_serializes_as_css_string() {
        let json = serde_json::to_string(&Rgb::new(10, 20, 30)).unwrap();
        assert_eq!(json, "\"rgb(10, 20, 30)\"");
        let back: Rgb = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Rgb::new(10, 20, 30));
    }

    #[test]
    fn scripted_surface_marks_first_word_active() {
        let mut surface = ScriptedSurface::new(&["fox", "jumps"]);
        let elements = surface.text_elements().unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0], TextElement::new("fox", Rgb::WHITE));
        assert_ne!(elements[1].color, Some(Rgb::WHITE));
    }

    #[test]
    fn trailing_space_advances_to_next_word() {
        let mut surface = ScriptedSurface::new(&["fox", "jumps"]);
        surface.set_field_value("fox").unwrap();
        surface.set_field_value("fox ").unwrap();
        assert_eq!(surface.remaining_words(), vec!["jumps".to_string()]);
        assert_eq!(surface.field_value(), "");
        assert_eq!(surface.action_controls().unwrap(), None);
    }

    #[test]
    fn field_can_be_pulled_after_some_writes() {
        let mut surface = ScriptedSurface::new(&["jumps"]);
        surface.remove_field_after(2);
        surface.set_field_value("j").unwrap();
        assert!(surface.has_text_field().unwrap());
        surface.set_field_value("ju").unwrap();
        assert!(!surface.has_text_field().unwrap());
        assert_matches!(
            surface.set_field_value("jum"),
            Err(SurfaceError::ElementNotFound { .. })
        );
        assert_eq!(surface.applied_values(), vec!["j", "ju"]);
    }

    #[test]
    fn completion_controls_appear_after_last_word() {
        let mut surface = ScriptedSurface::new(&["ok"]);
        surface.set_field_value("ok ").unwrap();
        assert_eq!(surface.action_controls().unwrap(), Some(2));
        surface.queue_round(&["next"]);
        assert!(surface.click_control(0).unwrap());
        assert_eq!(surface.action_controls().unwrap(), None);
        assert_eq!(surface.remaining_words(), vec!["next".to_string()]);
    }

    #[test]
    fn clicking_a_missing_control_reports_false() {
        let mut surface = ScriptedSurface::new(&["ok"]);
        assert!(!surface.click_control(1).unwrap());
        surface.set_controls(Some(1));
        assert!(!surface.click_control(1).unwrap());
    }

    #[test]
    fn scripted_failures_are_consumed() {
        let mut surface = ScriptedSurface::new(&["ok"]);
        surface.fail_next(1);
        assert_matches!(
            surface.has_text_field(),
            Err(SurfaceError::Protocol { .. })
        );
        assert!(surface.has_text_field().unwrap());
    }

    #[test]
    fn calls_are_stamped_with_clock() {
        let clock = ManualClock::new();
        let mut surface = ScriptedSurface::new(&["a"]).with_clock(clock.clone());
        clock.advance(Duration::from_millis(250));
        surface.press_tab().unwrap();
        assert_eq!(
            surface.timed_calls(),
            vec![(Duration::from_millis(250), SurfaceCall::Tab)]
        );
    }
}
