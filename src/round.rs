//! One round of play as an explicit state machine.
//!
//! Typing → AwaitingCompletion → Submitting → Restarting → Typing, forever.
//! Every call to [`RoundController::step`] runs exactly one tick of the current
//! state, re-observing the page first. Missing elements end the tick with a
//! [`StepOutcome::Waiting`]; only surface errors escape.

use crate::clock::Clock;
use crate::error::{Retry, SurfaceError};
use crate::input::{InputDriver, TextField};
use crate::observer::{ActiveWord, GameStateObserver};
use crate::surface::{GameSurface, Rgb};
use crate::timing;
use chrono::{DateTime, Local};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum RoundState {
    Typing,
    AwaitingCompletion,
    Submitting,
    Restarting,
}

impl RoundState {
    /// The only state reachable from `self`.
    pub fn successor(self) -> RoundState {
        match self {
            RoundState::Typing => RoundState::AwaitingCompletion,
            RoundState::AwaitingCompletion => RoundState::Submitting,
            RoundState::Submitting => RoundState::Restarting,
            RoundState::Restarting => RoundState::Typing,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Round {
    pub number: u64,
    pub started_at: Duration,
    pub started_wall: DateTime<Local>,
    pub state: RoundState,
    pub words_typed: usize,
    pub typos: usize,
}

impl Round {
    pub fn begin(number: u64, started_at: Duration) -> Self {
        Self {
            number,
            started_at,
            started_wall: Local::now(),
            state: RoundState::Typing,
            words_typed: 0,
            typos: 0,
        }
    }
}

/// The characters put into the field for the current word.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypedBuffer {
    text: String,
    typo: bool,
}

impl TypedBuffer {
    pub fn push(&mut self, c: char) {
        self.text.push(c);
    }

    /// Swap the last character for `c`. Only one typo is kept per word.
    pub fn replace_last(&mut self, c: char) {
        if self.text.pop().is_some() {
            self.text.push(c);
            self.typo = true;
        }
    }

    pub fn has_typo(&self) -> bool {
        self.typo
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Buffer plus the trailing space the game treats as "word done".
    pub fn submission(&self) -> String {
        format!("{} ", self.text)
    }
}

/// Fixed waits and knobs for the controller. Built from [`crate::config::Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSettings {
    pub round_duration: Duration,
    pub focus_settle: Duration,
    pub completion_settle: Duration,
    pub post_submit: Duration,
    pub restart_response: Duration,
    pub retry_wait: Duration,
    pub field_poll: Duration,
    pub word_poll: Duration,
    pub post_word_pause: Duration,
    pub error_probability: f64,
    pub active_color: Rgb,
}

impl Default for RoundSettings {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_millis(15_000),
            focus_settle: Duration::from_millis(600),
            completion_settle: Duration::from_millis(10_000),
            post_submit: Duration::from_millis(5_000),
            restart_response: Duration::from_millis(1_000),
            retry_wait: Duration::from_millis(2_000),
            field_poll: Duration::from_millis(1_000),
            word_poll: Duration::from_millis(500),
            post_word_pause: Duration::from_millis(150),
            error_probability: 0.02,
            active_color: Rgb::WHITE,
        }
    }
}

/// What a single tick accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Transitioned { from: RoundState, to: RoundState },
    WordTyped { word: String, typed: String },
    Waiting(Retry),
}

pub struct RoundController<S, C, R> {
    surface: S,
    clock: C,
    rng: R,
    settings: RoundSettings,
    observer: GameStateObserver,
    input: InputDriver,
    round: Round,
}

impl<S: GameSurface, C: Clock, R: Rng> RoundController<S, C, R> {
    pub fn new(surface: S, clock: C, rng: R, settings: RoundSettings) -> Self {
        let round = Round::begin(1, clock.now());
        Self {
            surface,
            clock,
            rng,
            observer: GameStateObserver::new(settings.active_color),
            input: InputDriver,
            settings,
            round,
        }
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn state(&self) -> RoundState {
        self.round.state
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Tab into the game, let it settle, and start the round clock.
    pub fn begin(&mut self) -> Result<(), SurfaceError> {
        self.input.advance_focus(&mut self.surface)?;
        self.clock.sleep(self.settings.focus_settle);
        self.round.started_at = self.clock.now();
        self.round.started_wall = Local::now();
        self.round.state = RoundState::Typing;
        info!(round = self.round.number, "round started");
        Ok(())
    }

    /// Throw away the current round and line up a fresh one in `Typing`.
    /// The caller is expected to `begin()` it.
    pub fn reset(&mut self) {
        self.round = Round::begin(self.round.number + 1, self.clock.now());
    }

    pub fn step(&mut self) -> Result<StepOutcome, SurfaceError> {
        match self.round.state {
            RoundState::Typing => self.step_typing(),
            RoundState::AwaitingCompletion => {
                self.clock.sleep(self.settings.completion_settle);
                Ok(self.advance())
            }
            RoundState::Submitting => self.step_submitting(),
            RoundState::Restarting => self.step_restarting(),
        }
    }

    fn advance(&mut self) -> StepOutcome {
        let from = self.round.state;
        let to = from.successor();
        self.round.state = to;
        debug!(round = self.round.number, %from, %to, "round transition");
        StepOutcome::Transitioned { from, to }
    }

    fn wait_and_retry(&mut self, retry: Retry, wait: Duration) -> StepOutcome {
        self.clock.sleep(wait);
        StepOutcome::Waiting(retry)
    }

    fn step_typing(&mut self) -> Result<StepOutcome, SurfaceError> {
        let elapsed = self.clock.now().saturating_sub(self.round.started_at);
        let out_of_time = elapsed >= self.settings.round_duration;
        if out_of_time || self.observer.observe_round_end(&mut self.surface)? {
            info!(
                round = self.round.number,
                elapsed_ms = elapsed.as_millis() as u64,
                out_of_time,
                words = self.round.words_typed,
                "round over"
            );
            return Ok(self.advance());
        }

        let Some(field) = self.input.locate_field(&mut self.surface)? else {
            let wait = self.settings.field_poll;
            return Ok(self.wait_and_retry(Retry::TransientAbsence("text field"), wait));
        };
        if let Err(err) = self.input.focus(&mut self.surface, &field) {
            return self.field_lost(err);
        }

        let Some(word) = self.observer.observe_active_word(&mut self.surface)? else {
            let wait = self.settings.word_poll;
            return Ok(self.wait_and_retry(Retry::TransientAbsence("active word"), wait));
        };

        self.type_word(&field, &word)
    }

    /// The field can be swapped out under us as the round ends. Treat that as
    /// a missing field and let the next tick look again.
    fn field_lost(&mut self, err: SurfaceError) -> Result<StepOutcome, SurfaceError> {
        match err {
            SurfaceError::ElementNotFound { what } => {
                debug!(round = self.round.number, %what, "text field went away mid-word");
                let wait = self.settings.field_poll;
                Ok(self.wait_and_retry(Retry::TransientAbsence("text field"), wait))
            }
            err => Err(err),
        }
    }

    fn type_word(
        &mut self,
        field: &TextField,
        word: &ActiveWord,
    ) -> Result<StepOutcome, SurfaceError> {
        debug!(round = self.round.number, %word, "typing word");
        self.clock.sleep(timing::pre_word_reading_delay(&mut self.rng));

        let mut buffer = TypedBuffer::default();
        for intended in word.text().chars() {
            buffer.push(intended);
            let roll_typo = !buffer.has_typo();
            if roll_typo && timing::inject_typo(&mut self.rng, self.settings.error_probability) {
                let wrong = timing::typo_letter(&mut self.rng, intended);
                buffer.replace_last(wrong);
                debug!(%word, %intended, %wrong, "injected typo");
            }
            if let Err(err) = self.input.apply_text(&mut self.surface, field, buffer.as_str()) {
                return self.field_lost(err);
            }

            self.clock.sleep(timing::character_delay(&mut self.rng));
            if let Some(pause) = timing::micro_hesitation(&mut self.rng) {
                self.clock.sleep(pause);
            }
        }

        let typed = buffer.submission();
        if let Err(err) = self.input.apply_text(&mut self.surface, field, &typed) {
            return self.field_lost(err);
        }
        self.clock.sleep(timing::inter_word_delay(&mut self.rng));
        self.clock.sleep(self.settings.post_word_pause);

        self.round.words_typed += 1;
        if buffer.has_typo() {
            self.round.typos += 1;
        }
        Ok(StepOutcome::WordTyped {
            word: word.text().to_string(),
            typed,
        })
    }

    /// The button at `index` was gone by the time we clicked. Report what the
    /// container holds now.
    fn missed_click(&mut self, index: usize) -> Result<Retry, SurfaceError> {
        let controls = self.observer.observe_action_controls(&mut self.surface)?;
        Ok(Retry::ActionFailure {
            needed: index + 1,
            found: controls.len(),
        })
    }

    fn step_submitting(&mut self) -> Result<StepOutcome, SurfaceError> {
        let controls = self.observer.observe_action_controls(&mut self.surface)?;
        let submit = match controls.submit() {
            Ok(handle) => handle,
            Err(retry) => {
                warn!(round = self.round.number, %retry, "cannot submit score yet");
                let wait = self.settings.retry_wait;
                return Ok(self.wait_and_retry(retry, wait));
            }
        };

        if !self.surface.click_control(submit.index)? {
            let retry = self.missed_click(submit.index)?;
            warn!(round = self.round.number, %retry, "submit button vanished");
            let wait = self.settings.retry_wait;
            return Ok(self.wait_and_retry(retry, wait));
        }
        info!(
            round = self.round.number,
            words = self.round.words_typed,
            typos = self.round.typos,
            "score submitted"
        );
        self.clock.sleep(self.settings.post_submit);
        Ok(self.advance())
    }

    fn step_restarting(&mut self) -> Result<StepOutcome, SurfaceError> {
        let controls = self.observer.observe_action_controls(&mut self.surface)?;
        let restart = match controls.restart() {
            Ok(handle) => handle,
            Err(retry) => {
                warn!(round = self.round.number, %retry, "cannot restart yet");
                let wait = self.settings.retry_wait;
                return Ok(self.wait_and_retry(retry, wait));
            }
        };

        if !self.surface.click_control(restart.index)? {
            let retry = self.missed_click(restart.index)?;
            warn!(round = self.round.number, %retry, "restart button vanished");
            let wait = self.settings.retry_wait;
            return Ok(self.wait_and_retry(retry, wait));
        }
        self.clock.sleep(self.settings.restart_response);
        self.input.advance_focus(&mut self.surface)?;
        self.clock.sleep(self.settings.focus_settle);

        let from = self.round.state;
        self.round = Round::begin(self.round.number + 1, self.clock.now());
        info!(round = self.round.number, "new round started");
        Ok(StepOutcome::Transitioned {
            from,
            to: self.round.state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::surface::{ScriptedSurface, SurfaceCall};
    use assert_matches::assert_matches;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn no_typos() -> RoundSettings {
        RoundSettings {
            error_probability: 0.0,
            ..RoundSettings::default()
        }
    }

    fn controller(
        surface: &ScriptedSurface,
        clock: &ManualClock,
        settings: RoundSettings,
    ) -> RoundController<ScriptedSurface, ManualClock, StdRng> {
        RoundController::new(
            surface.clone(),
            clock.clone(),
            StdRng::seed_from_u64(7),
            settings,
        )
    }

    #[test]
    fn successor_cycle_is_closed() {
        let mut state = RoundState::Typing;
        let mut seen = vec![state];
        for _ in 0..4 {
            state = state.successor();
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                RoundState::Typing,
                RoundState::AwaitingCompletion,
                RoundState::Submitting,
                RoundState::Restarting,
                RoundState::Typing,
            ]
        );
    }

    #[test]
    fn typed_buffer_tracks_single_typo() {
        let mut buffer = TypedBuffer::default();
        buffer.push('f');
        buffer.push('o');
        buffer.replace_last('q');
        assert_eq!(buffer.as_str(), "fq");
        assert!(buffer.has_typo());
        assert_eq!(buffer.submission(), "fq ");
    }

    #[test]
    fn replace_last_on_empty_buffer_is_ignored() {
        let mut buffer = TypedBuffer::default();
        buffer.replace_last('x');
        assert_eq!(buffer.as_str(), "");
        assert!(!buffer.has_typo());
    }

    #[test]
    fn types_word_one_character_at_a_time() {
        let clock = ManualClock::new();
        let surface = ScriptedSurface::new(&["fox", "jumps"]);
        let mut ctl = controller(&surface, &clock, no_typos());
        ctl.begin().unwrap();

        let outcome = ctl.step().unwrap();
        assert_eq!(
            outcome,
            StepOutcome::WordTyped {
                word: "fox".into(),
                typed: "fox ".into()
            }
        );
        assert_eq!(surface.applied_values(), vec!["f", "fo", "fox", "fox "]);
        assert_eq!(ctl.round().words_typed, 1);
    }

    #[test]
    fn round_end_signal_leaves_typing_on_next_tick() {
        let clock = ManualClock::new();
        let surface = ScriptedSurface::new(&["alpha", "beta", "gamma"]);
        let mut ctl = controller(&surface, &clock, no_typos());
        ctl.begin().unwrap();

        assert_matches!(ctl.step().unwrap(), StepOutcome::WordTyped { .. });
        surface.set_controls(Some(2));
        assert_eq!(
            ctl.step().unwrap(),
            StepOutcome::Transitioned {
                from: RoundState::Typing,
                to: RoundState::AwaitingCompletion
            }
        );
        assert_eq!(surface.remaining_words(), vec!["beta", "gamma"]);
    }

    #[test]
    fn round_budget_ends_typing() {
        let clock = ManualClock::new();
        let surface = ScriptedSurface::new(&["alpha"]).keep_round_open();
        let mut ctl = controller(&surface, &clock, no_typos());
        ctl.begin().unwrap();
        clock.advance(Duration::from_millis(15_000));
        assert_eq!(
            ctl.step().unwrap(),
            StepOutcome::Transitioned {
                from: RoundState::Typing,
                to: RoundState::AwaitingCompletion
            }
        );
        assert!(surface.applied_values().is_empty());
    }

    #[test]
    fn missing_field_waits_field_poll() {
        let clock = ManualClock::new();
        let surface = ScriptedSurface::new(&["alpha"]);
        surface.set_field_present(false);
        let mut ctl = controller(&surface, &clock, no_typos());
        let before = clock.now();
        assert_eq!(
            ctl.step().unwrap(),
            StepOutcome::Waiting(Retry::TransientAbsence("text field"))
        );
        assert_eq!(clock.now() - before, Duration::from_millis(1_000));
        assert_eq!(ctl.state(), RoundState::Typing);
    }

    #[test]
    fn missing_word_waits_word_poll() {
        let clock = ManualClock::new();
        let surface = ScriptedSurface::new::<&str>(&[]).keep_round_open();
        let mut ctl = controller(&surface, &clock, no_typos());
        assert_eq!(
            ctl.step().unwrap(),
            StepOutcome::Waiting(Retry::TransientAbsence("active word"))
        );
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);
    }

    #[test]
    fn submitting_without_container_stays_put() {
        let clock = ManualClock::new();
        let surface = ScriptedSurface::new::<&str>(&[]).keep_round_open();
        let mut ctl = controller(&surface, &clock, no_typos());
        clock.advance(Duration::from_secs(20));
        ctl.step().unwrap(); // Typing -> AwaitingCompletion
        ctl.step().unwrap(); // AwaitingCompletion -> Submitting
        assert_eq!(ctl.state(), RoundState::Submitting);

        for _ in 0..3 {
            assert_eq!(
                ctl.step().unwrap(),
                StepOutcome::Waiting(Retry::TransientAbsence("completion container"))
            );
            assert_eq!(ctl.state(), RoundState::Submitting);
        }
        assert!(surface.clicks().is_empty());

        surface.set_controls(Some(2));
        assert_eq!(
            ctl.step().unwrap(),
            StepOutcome::Transitioned {
                from: RoundState::Submitting,
                to: RoundState::Restarting
            }
        );
    }

    #[test]
    fn submit_clicks_index_one_then_restart_clicks_index_zero() {
        let clock = ManualClock::new();
        let surface = ScriptedSurface::new(&["go"]);
        surface.queue_round(&["again"]);
        let mut ctl = controller(&surface, &clock, no_typos());
        ctl.begin().unwrap();

        assert_matches!(ctl.step().unwrap(), StepOutcome::WordTyped { .. });
        let mut states = vec![ctl.state()];
        for _ in 0..4 {
            ctl.step().unwrap();
            states.push(ctl.state());
        }
        assert_eq!(
            states,
            vec![
                RoundState::Typing,
                RoundState::AwaitingCompletion,
                RoundState::Submitting,
                RoundState::Restarting,
                RoundState::Typing,
            ]
        );
        assert_eq!(surface.clicks(), vec![1, 0]);
        assert_eq!(ctl.round().number, 2);
        assert_eq!(ctl.round().words_typed, 0);
        assert_eq!(surface.calls().last(), Some(&SurfaceCall::Tab));
    }

    #[test]
    fn field_vanishing_mid_word_waits_instead_of_failing() {
        let clock = ManualClock::new();
        let surface = ScriptedSurface::new(&["jumps", "over"]);
        let mut ctl = controller(&surface, &clock, no_typos());
        ctl.begin().unwrap();
        surface.remove_field_after(2);

        assert_eq!(
            ctl.step().unwrap(),
            StepOutcome::Waiting(Retry::TransientAbsence("text field"))
        );
        assert_eq!(ctl.state(), RoundState::Typing);
        assert_eq!(ctl.round().words_typed, 0);
        assert_eq!(clock.sleeps().last(), Some(&Duration::from_millis(1_000)));
        assert_eq!(surface.applied_values(), vec!["j", "ju"]);

        // the game swapped the field for the completion container
        surface.set_controls(Some(2));
        assert_eq!(
            ctl.step().unwrap(),
            StepOutcome::Transitioned {
                from: RoundState::Typing,
                to: RoundState::AwaitingCompletion
            }
        );
    }

    #[test]
    fn missed_submit_click_reports_current_controls() {
        let clock = ManualClock::new();
        let surface = ScriptedSurface::new::<&str>(&[]).keep_round_open();
        surface.set_controls(Some(2));
        let mut ctl = controller(&surface, &clock, no_typos());
        ctl.step().unwrap(); // Typing -> AwaitingCompletion
        ctl.step().unwrap(); // AwaitingCompletion -> Submitting

        surface.shrink_controls_before_next_click(1);
        assert_eq!(
            ctl.step().unwrap(),
            StepOutcome::Waiting(Retry::ActionFailure {
                needed: 2,
                found: 1
            })
        );
        assert_eq!(ctl.state(), RoundState::Submitting);
        assert_eq!(clock.sleeps().last(), Some(&Duration::from_millis(2_000)));
    }

    #[test]
    fn restart_waits_when_controls_disappear() {
        let clock = ManualClock::new();
        let surface = ScriptedSurface::new::<&str>(&[]).keep_round_open();
        surface.set_controls(Some(2));
        let mut ctl = controller(&surface, &clock, no_typos());
        for _ in 0..3 {
            ctl.step().unwrap();
        }
        assert_eq!(ctl.state(), RoundState::Restarting);

        surface.set_controls(Some(0));
        assert_eq!(
            ctl.step().unwrap(),
            StepOutcome::Waiting(Retry::ActionFailure {
                needed: 1,
                found: 0
            })
        );
        assert_eq!(ctl.state(), RoundState::Restarting);
        assert_eq!(surface.clicks(), vec![1]);
    }

    #[test]
    fn typos_never_stretch_the_buffer() {
        let clock = ManualClock::new();
        let words = ["keyboard", "mechanical", "switch", "latency", "cadence"];
        let surface = ScriptedSurface::new(&words);
        let settings = RoundSettings {
            error_probability: 0.5,
            round_duration: Duration::from_secs(600),
            ..RoundSettings::default()
        };
        let mut ctl = controller(&surface, &clock, settings);
        ctl.begin().unwrap();

        for word in words {
            match ctl.step().unwrap() {
                StepOutcome::WordTyped { word: w, typed } => {
                    assert_eq!(w, word);
                    assert_eq!(typed.chars().count(), word.chars().count() + 1);
                    let differing = typed
                        .trim_end()
                        .chars()
                        .zip(word.chars())
                        .filter(|(a, b)| a != b)
                        .count();
                    assert!(differing <= 1, "{typed:?} vs {word:?}");
                }
                other => panic!("expected a typed word, got {other:?}"),
            }
        }
        for value in surface.applied_values() {
            assert!(value.chars().count() <= "mechanical".len() + 1);
        }
    }

    #[test]
    fn reset_starts_fresh_round() {
        let clock = ManualClock::new();
        let surface = ScriptedSurface::new::<&str>(&[]);
        let mut ctl = controller(&surface, &clock, no_typos());
        clock.advance(Duration::from_secs(20));
        ctl.step().unwrap();
        assert_eq!(ctl.state(), RoundState::AwaitingCompletion);
        ctl.reset();
        assert_eq!(ctl.state(), RoundState::Typing);
        assert_eq!(ctl.round().number, 2);
        assert_eq!(ctl.round().started_at, clock.now());
    }
}
