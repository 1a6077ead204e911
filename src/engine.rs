use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::EngineError;
use crate::llm::{GenerationConfig, ModelClient, Turn};
use crate::prompts::{self, Prompts};
use crate::sanitize::sanitize;
use crate::scene::{self, Scene, SceneIssue};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Longest single wait between retries, however many are configured.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded retry with exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Wait before the first retry; doubles on each subsequent one, up to
    /// [`MAX_BACKOFF`].
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff: Duration::ZERO,
        }
    }

    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(retry))
            .min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub temperature: f32,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            temperature: 0.9,
            retry: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// A parsed scene plus the exact exchange that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub scene: Scene,
    /// The user message that was sent.
    pub prompt: String,
    /// The model's reply, before sanitizing.
    pub raw: String,
}

impl Reply {
    /// The two history entries this exchange contributes.
    pub fn into_turns(self) -> (Scene, [Turn; 2]) {
        (self.scene, [Turn::user(self.prompt), Turn::model(self.raw)])
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Request/parse boundary between the story and the model.
///
/// The engine keeps no conversation state of its own: the opening turn uses
/// no history, and follow-up turns replay whatever history the caller passes.
pub struct Engine<C> {
    client: C,
    config: EngineConfig,
    prompts: Prompts,
}

impl<C: ModelClient> Engine<C> {
    pub fn new(client: C, config: EngineConfig, prompts: Prompts) -> Self {
        Self {
            client,
            config,
            prompts,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: self.config.temperature,
        }
    }

    /// Send the governing prompt and opening scenario as a single user turn.
    pub fn start_new_game(&mut self) -> Result<Reply, EngineError> {
        let prompt = self.prompts.opening_message();
        info!("Starting new game via {}", self.client.name());

        let turns = [Turn::user(prompt.as_str())];
        let (scene, raw) = self.request(&turns)?;
        Ok(Reply { scene, prompt, raw })
    }

    /// Continue the story after the player picked `choice_text`.
    ///
    /// `history` is replayed in front of the new instruction and is never
    /// modified; appending the returned exchange is the caller's job.
    pub fn next_turn(&mut self, history: &[Turn], choice_text: &str) -> Result<Reply, EngineError> {
        let prompt = prompts::follow_up(choice_text);
        info!(
            "Next turn after {} history entries, choice: \"{choice_text}\"",
            history.len()
        );

        let mut turns = Vec::with_capacity(history.len() + 1);
        turns.extend_from_slice(history);
        turns.push(Turn::user(prompt.as_str()));

        let (scene, raw) = self.request(&turns)?;
        Ok(Reply { scene, prompt, raw })
    }

    fn request(&mut self, turns: &[Turn]) -> Result<(Scene, String), EngineError> {
        let config = self.generation_config();
        let retry = self.config.retry;
        let mut attempt = 0;

        loop {
            // Retryability is judged before the client error loses its status.
            let result = match self.client.generate_structured(turns, &config) {
                Ok(raw) => interpret(&raw)
                    .map(|scene| (scene, raw))
                    .map_err(|e| (e.is_transient(), e)),
                Err(e) => Err((e.is_retryable(), EngineError::from(e))),
            };

            match result {
                Ok(ok) => return Ok(ok),
                Err((retryable, e)) if retryable && attempt < retry.max_retries => {
                    let wait = retry.backoff(attempt);
                    attempt += 1;
                    warn!(
                        "Model turn failed ({e}); retry {attempt}/{} in {wait:?}",
                        retry.max_retries
                    );
                    thread::sleep(wait);
                }
                Err((_, e)) => {
                    warn!("Model turn failed: {e}");
                    return Err(e);
                }
            }
        }
    }
}

/// Turn raw reply text into a scene: empty check, sanitize, parse, validate.
pub fn interpret(raw: &str) -> Result<Scene, EngineError> {
    if raw.trim().is_empty() {
        return Err(EngineError::EmptyResponse);
    }

    let cleaned = sanitize(raw);
    if cleaned.is_empty() {
        return Err(EngineError::EmptyResponse);
    }
    debug!("Sanitized reply: {cleaned}");

    let scene = scene::parse_scene(&cleaned).map_err(|e| EngineError::MalformedResponse {
        reason: e.to_string(),
        raw: raw.to_string(),
    })?;

    for issue in scene::validate(&scene).iter().filter(|i| !i.is_blocking()) {
        warn_issue(issue);
    }
    debug!("Parsed scene: {scene:?}");
    Ok(scene)
}

pub(crate) fn warn_issue(issue: &SceneIssue) {
    warn!("Scene check: {issue}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::ScriptedClient;
    use crate::llm::{ClientError, Role};
    use crate::scene::fixtures::{ending_json, opening_json, reunion_json};
    use crate::scene::EndingType;

    fn engine(client: ScriptedClient) -> Engine<ScriptedClient> {
        let config = EngineConfig {
            retry: RetryPolicy::none(),
            ..EngineConfig::default()
        };
        Engine::new(client, config, Prompts::default())
    }

    fn retrying_engine(client: ScriptedClient, max_retries: u32) -> Engine<ScriptedClient> {
        let config = EngineConfig {
            temperature: 0.9,
            retry: RetryPolicy {
                max_retries,
                base_backoff: Duration::ZERO,
            },
        };
        Engine::new(client, config, Prompts::default())
    }

    #[test]
    fn test_start_new_game_sends_single_user_turn() {
        let mut engine = engine(ScriptedClient::ok([opening_json()]));
        let reply = engine.start_new_game().unwrap();

        assert!(!reply.scene.is_ending);
        assert_eq!(reply.scene.choices.len(), 2);
        assert_eq!(reply.raw, opening_json());

        let (turns, config) = &engine.client().requests[0];
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].content, Prompts::default().opening_message());
        assert_eq!(reply.prompt, turns[0].content);
        assert!((config.temperature - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_fenced_reply_is_parsed_but_stored_raw() {
        let fenced = format!("```json\n{}\n```", opening_json());
        let mut engine = engine(ScriptedClient::ok([fenced.clone()]));
        let reply = engine.start_new_game().unwrap();
        assert_eq!(reply.raw, fenced);
        assert_eq!(reply.scene.choices[0].id, "knock");
    }

    #[test]
    fn test_empty_reply() {
        for empty in ["", "   \n\t", "```\n```"] {
            let mut engine = engine(ScriptedClient::ok([empty]));
            assert_eq!(engine.start_new_game().unwrap_err(), EngineError::EmptyResponse);
        }
    }

    #[test]
    fn test_not_json_is_malformed() {
        let mut engine = engine(ScriptedClient::ok(["not json"]));
        match engine.start_new_game().unwrap_err() {
            EngineError::MalformedResponse { raw, .. } => assert_eq!(raw, "not json"),
            other => panic!("expected MalformedResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_transport_failures_surface() {
        let mut engine = engine(ScriptedClient::new([Err(ClientError::Status {
            status: 503,
            body: "overloaded".into(),
        })]));
        let err = engine.start_new_game().unwrap_err();
        assert!(matches!(err, EngineError::TransportFailure(ref msg) if msg.contains("503")));

        let mut engine = engine_with_timeout();
        assert!(matches!(
            engine.start_new_game().unwrap_err(),
            EngineError::Timeout(_)
        ));
    }

    fn engine_with_timeout() -> Engine<ScriptedClient> {
        engine(ScriptedClient::new([Err(ClientError::Timeout(
            Duration::from_secs(30),
        ))]))
    }

    #[test]
    fn test_next_turn_does_not_touch_history() {
        let history = vec![Turn::user("opening prompt"), Turn::model(opening_json())];
        let snapshot = history.clone();
        let mut engine = engine(ScriptedClient::ok([reunion_json(), reunion_json()]));

        let first = engine.next_turn(&history, "Turn around and leave").unwrap();
        let second = engine.next_turn(&history, "Turn around and leave").unwrap();

        assert_eq!(history, snapshot);
        assert_eq!(first, second);
        assert_eq!(first.scene.speaker.as_deref(), Some("Lin"));
    }

    #[test]
    fn test_next_turn_replays_history_then_instruction() {
        let history = vec![Turn::user("opening prompt"), Turn::model(opening_json())];
        let mut engine = engine(ScriptedClient::ok([reunion_json()]));
        let reply = engine.next_turn(&history, "Knock on the door").unwrap();

        let (turns, _) = &engine.client().requests[0];
        assert_eq!(turns.len(), 3);
        assert_eq!(&turns[..2], &history[..]);
        assert_eq!(turns[2].role, Role::User);
        assert!(turns[2].content.contains("\"Knock on the door\""));
        assert_eq!(turns[2].content, reply.prompt);
    }

    #[test]
    fn test_reply_into_turns() {
        let mut engine = engine(ScriptedClient::ok([ending_json()]));
        let reply = engine.next_turn(&[], "Stay").unwrap();
        let (scene, [user, model]) = reply.into_turns();
        assert_eq!(scene.ending_type, Some(EndingType::Good));
        assert_eq!(user.role, Role::User);
        assert_eq!(model, Turn::model(ending_json()));
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let client = ScriptedClient::new([
            Err(ClientError::Transport("connection reset".into())),
            Ok(String::new()),
            Ok(opening_json()),
        ]);
        let mut engine = retrying_engine(client, 2);
        let reply = engine.start_new_game().unwrap();
        assert_eq!(reply.scene.choices.len(), 2);
        assert_eq!(engine.client().requests.len(), 3);
    }

    #[test]
    fn test_retries_are_bounded() {
        let client = ScriptedClient::new([
            Err(ClientError::Transport("a".into())),
            Err(ClientError::Transport("b".into())),
            Ok(opening_json()),
        ]);
        let mut engine = retrying_engine(client, 1);
        assert_eq!(
            engine.start_new_game().unwrap_err(),
            EngineError::TransportFailure("request failed: b".into())
        );
        assert_eq!(engine.client().remaining(), 1);
    }

    #[test]
    fn test_malformed_is_not_retried() {
        let client = ScriptedClient::ok(["{\"narrative\": 3}", opening_json().as_str()]);
        let mut engine = retrying_engine(client, 3);
        assert!(matches!(
            engine.start_new_game().unwrap_err(),
            EngineError::MalformedResponse { .. }
        ));
        assert_eq!(engine.client().requests.len(), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(RetryPolicy::none().backoff(5), Duration::ZERO);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 40,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(5), Duration::from_secs(16));
        assert_eq!(policy.backoff(6), MAX_BACKOFF);
        assert_eq!(policy.backoff(20), MAX_BACKOFF);
        assert_eq!(policy.backoff(39), MAX_BACKOFF);
    }

    #[test]
    fn test_client_rejection_is_not_retried() {
        let client = ScriptedClient::new([
            Err(ClientError::Status {
                status: 401,
                body: "API key not valid".into(),
            }),
            Ok(opening_json()),
        ]);
        let mut engine = retrying_engine(client, 3);
        let err = engine.start_new_game().unwrap_err();
        assert!(matches!(err, EngineError::TransportFailure(ref msg) if msg.contains("401")));
        assert_eq!(engine.client().requests.len(), 1);
    }

    #[test]
    fn test_rate_limit_is_retried() {
        let client = ScriptedClient::new([
            Err(ClientError::Status {
                status: 429,
                body: "quota".into(),
            }),
            Ok(opening_json()),
        ]);
        let mut engine = retrying_engine(client, 1);
        assert!(engine.start_new_game().is_ok());
        assert_eq!(engine.client().requests.len(), 2);
    }
}
