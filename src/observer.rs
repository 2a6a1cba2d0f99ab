//! Reads game state off the page.
//!
//! The game exposes no explicit events. The expected word is the one drawn in
//! the sentinel color, and a round is over once the completion container holds
//! both of its buttons.

use crate::error::{Retry, SurfaceError};
use crate::surface::{GameSurface, Rgb};
use std::fmt;

/// Index of the restart button inside the completion container.
pub const RESTART_CONTROL: usize = 0;
/// Index of the submit-score button inside the completion container.
pub const SUBMIT_CONTROL: usize = 1;

/// The word the game currently expects. Never empty, already trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWord {
    text: String,
}

impl ActiveWord {
    pub fn new(raw: &str) -> Option<Self> {
        let text = raw.trim();
        (!text.is_empty()).then(|| Self {
            text: text.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for ActiveWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A clickable button in the completion container, by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHandle {
    pub index: usize,
}

/// Snapshot of the completion container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionControls {
    container_present: bool,
    handles: Vec<ControlHandle>,
}

impl ActionControls {
    pub fn from_count(count: Option<usize>) -> Self {
        Self {
            container_present: count.is_some(),
            handles: (0..count.unwrap_or(0))
                .map(|index| ControlHandle { index })
                .collect(),
        }
    }

    pub fn handles(&self) -> &[ControlHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Both buttons are showing: the round is over.
    pub fn signals_completion(&self) -> bool {
        self.handles.len() >= 2
    }

    pub fn submit(&self) -> Result<ControlHandle, Retry> {
        self.control(SUBMIT_CONTROL)
    }

    pub fn restart(&self) -> Result<ControlHandle, Retry> {
        self.control(RESTART_CONTROL)
    }

    fn control(&self, index: usize) -> Result<ControlHandle, Retry> {
        if !self.container_present {
            return Err(Retry::TransientAbsence("completion container"));
        }
        self.handles
            .get(index)
            .copied()
            .ok_or(Retry::ActionFailure {
                needed: index + 1,
                found: self.handles.len(),
            })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GameStateObserver {
    active_color: Rgb,
}

impl GameStateObserver {
    pub fn new(active_color: Rgb) -> Self {
        Self { active_color }
    }

    /// First non-empty element drawn in the active color, if the input is on
    /// the page at all.
    pub fn observe_active_word<S: GameSurface + ?Sized>(
        &self,
        surface: &mut S,
    ) -> Result<Option<ActiveWord>, SurfaceError> {
        if !surface.has_text_field()? {
            return Ok(None);
        }
        Ok(surface
            .text_elements()?
            .into_iter()
            .filter(|el| el.color == Some(self.active_color))
            .find_map(|el| ActiveWord::new(&el.text)))
    }

    pub fn observe_round_end<S: GameSurface + ?Sized>(
        &self,
        surface: &mut S,
    ) -> Result<bool, SurfaceError> {
        Ok(self.observe_action_controls(surface)?.signals_completion())
    }

    pub fn observe_action_controls<S: GameSurface + ?Sized>(
        &self,
        surface: &mut S,
    ) -> Result<ActionControls, SurfaceError> {
        Ok(ActionControls::from_count(surface.action_controls()?))
    }
}

impl Default for GameStateObserver {
    fn default() -> Self {
        Self::new(Rgb::WHITE)
    }
}
