use log::{info, warn};

use crate::engine::{warn_issue, Engine};
use crate::error::SessionError;
use crate::llm::{ModelClient, Turn};
use crate::scene::{self, Scene};

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Append-only record of every exchange in one game.
///
/// Entries only ever arrive in user/model pairs, and the model entry is the
/// raw reply text, fences and all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_exchange(&mut self, exchange: [Turn; 2]) {
        self.turns.extend(exchange);
    }

    pub fn as_slice(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Playing,
    Ended,
}

/// One playthrough: the engine plus everything that outlives a single turn.
pub struct GameSession<C> {
    engine: Engine<C>,
    history: History,
    scene: Option<Scene>,
    state: SessionState,
    turns: usize,
}

impl<C: ModelClient> GameSession<C> {
    pub fn new(engine: Engine<C>) -> Self {
        Self {
            engine,
            history: History::new(),
            scene: None,
            state: SessionState::NotStarted,
            turns: 0,
        }
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Completed follow-up turns, not counting the opening.
    pub fn turns(&self) -> usize {
        self.turns
    }

    pub fn engine(&self) -> &Engine<C> {
        &self.engine
    }

    /// Ask the model for the opening scene and seed history with it.
    pub fn start(&mut self) -> Result<&Scene, SessionError> {
        if self.state != SessionState::NotStarted {
            return Err(SessionError::AlreadyStarted);
        }

        let reply = self.engine.start_new_game()?;
        let (scene, exchange) = reply.into_turns();
        self.history.push_exchange(exchange);
        info!("Game started (history={} entries)", self.history.len());
        Ok(self.enter(scene))
    }

    /// Play the choice with `choice_id` from the current scene.
    ///
    /// On failure nothing changes, so the same choice can be retried.
    pub fn choose(&mut self, choice_id: &str) -> Result<&Scene, SessionError> {
        let current = match (self.state, &self.scene) {
            (SessionState::NotStarted, _) | (_, None) => return Err(SessionError::NotStarted),
            (SessionState::Ended, _) => return Err(SessionError::GameOver),
            (SessionState::Playing, Some(scene)) => scene,
        };

        let choice_text = current
            .choice(choice_id)
            .ok_or_else(|| SessionError::UnknownChoice(choice_id.to_string()))?
            .text
            .clone();

        let reply = self
            .engine
            .next_turn(self.history.as_slice(), &choice_text)?;
        let (scene, exchange) = reply.into_turns();

        for issue in scene::continuity(current, &scene) {
            warn_issue(&issue);
        }

        self.history.push_exchange(exchange);
        self.turns += 1;
        info!(
            "Turn {} complete: choice '{choice_id}' (history={} entries)",
            self.turns,
            self.history.len()
        );
        Ok(self.enter(scene))
    }

    /// Throw away the current playthrough.
    pub fn restart(&mut self) {
        info!("Session restarted after {} turns", self.turns);
        self.history = History::new();
        self.scene = None;
        self.state = SessionState::NotStarted;
        self.turns = 0;
    }

    fn enter(&mut self, scene: Scene) -> &Scene {
        self.state = if scene.is_ending {
            match scene.ending_type {
                Some(ending) => info!("Story ended: {ending} ending"),
                None => warn!("Story ended without an ending type"),
            }
            SessionState::Ended
        } else {
            SessionState::Playing
        };
        self.scene.insert(scene)
    }
}
