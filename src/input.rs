use crate::error::SurfaceError;
use crate::surface::GameSurface;

/// Proof that the text field was found on this tick. Not kept across ticks.
#[derive(Debug)]
pub struct TextField {
    _located: (),
}

/// Writes to the page. Holds no state of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputDriver;

impl InputDriver {
    pub fn locate_field<S: GameSurface + ?Sized>(
        &self,
        surface: &mut S,
    ) -> Result<Option<TextField>, SurfaceError> {
        Ok(surface
            .has_text_field()?
            .then_some(TextField { _located: () }))
    }

    /// Replace the field contents with `value`. Sets rather than appends, so
    /// repeating a call leaves the same value behind.
    pub fn apply_text<S: GameSurface + ?Sized>(
        &self,
        surface: &mut S,
        _field: &TextField,
        value: &str,
    ) -> Result<(), SurfaceError> {
        surface.set_field_value(value)
    }

    pub fn focus<S: GameSurface + ?Sized>(
        &self,
        surface: &mut S,
        _field: &TextField,
    ) -> Result<(), SurfaceError> {
        if surface.field_focused()? {
            return Ok(());
        }
        surface.focus_field()
    }

    /// Tab into the game's input when it wants an explicit focus gesture.
    pub fn advance_focus<S: GameSurface + ?Sized>(
        &self,
        surface: &mut S,
    ) -> Result<(), SurfaceError> {
        surface.press_tab()
    }
}
