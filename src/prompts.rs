use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Persona, style rules and the JSON contract. Sent once, at the start of
/// every game, as part of the first user turn.
pub const GOVERNING_PROMPT: &str = r#"You are the engine of a high-fidelity interactive visual novel.
Write literary, emotionally precise prose. Keep each beat short enough to read on one screen.
Write the narrative, dialogue, speaker names and choice text in Chinese.

Reply with exactly one JSON object and nothing else, using these keys:
  "narrative"             (string, required)  scene description in the second person
  "dialogue"              (string, optional)  a line spoken by a character, without quotes
  "speaker"               (string, optional)  who speaks the dialogue; omit for narration only
  "backgroundDescription" (string, required)  English description of the SCENERY ONLY for an image
                                              generator. Never mention people, faces or bodies.
  "characterMood"         (string, optional)  one of NEUTRAL, HAPPY, SAD, ANGRY, SHY, SURPRISED
  "choices"               (array, required)   2 to 4 objects {"id", "text", "sentiment"};
                                              ids are unique, sentiment is one of
                                              romantic, neutral, cold, bold, shy, sad, heroic
  "isEnding"              (boolean, required)
  "endingType"            (string, only when isEnding is true) one of good, bad, neutral

When "isEnding" is true, "choices" must be an empty array.
Steer the story towards an ending within roughly fifteen turns."#;

/// The fixed opening situation of the story.
pub const OPENING_SCENARIO: &str = "Start the game. Scene: the protagonist stands outside a hotel room door on \"that night\". \
It is raining outside. The arrangement is already paid for. He grips his phone, his heartbeat a mix of longing and shame, \
and he cannot bring himself to knock. In Chinese, describe his inner conflict, the damp smell of the corridor and his hesitation.";

/// Builds the user message for one follow-up turn.
///
/// The leave/flee clause is conditional and goes out on every turn; the
/// model decides whether it applies.
pub fn follow_up(choice_text: &str) -> String {
    format!(
        "(System reminder: reply with valid JSON following the rules above.)\n\n\
         I choose: \"{choice_text}\". Continue the story in Chinese. \
         If this is a choice to run away or leave, perform a time skip right now \
         and move straight to the \"reunion\" scene."
    )
}

/// Prompt set used by an engine. The governing prompt may be replaced from a
/// file; the opening scenario and follow-up wording stay fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompts {
    pub governing: String,
    pub opening: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            governing: GOVERNING_PROMPT.to_string(),
            opening: OPENING_SCENARIO.to_string(),
        }
    }
}

impl Prompts {
    pub fn with_governing_file(path: &Path) -> Result<Self> {
        let governing = fs::read_to_string(path)
            .with_context(|| format!("failed to read prompt file {}", path.display()))?;
        anyhow::ensure!(
            !governing.trim().is_empty(),
            "prompt file {} is empty",
            path.display()
        );
        Ok(Self {
            governing,
            ..Self::default()
        })
    }

    /// The single user message that opens a game.
    pub fn opening_message(&self) -> String {
        format!("{}\n\n{}", self.governing.trim(), self.opening)
    }
}
