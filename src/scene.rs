use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Advisory enums
// ---------------------------------------------------------------------------

/// Expression of the speaking character. Presentation-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mood {
    Neutral,
    Happy,
    Sad,
    Angry,
    Shy,
    Surprised,
}

impl FromStr for Mood {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEUTRAL" => Ok(Self::Neutral),
            "HAPPY" => Ok(Self::Happy),
            "SAD" => Ok(Self::Sad),
            "ANGRY" => Ok(Self::Angry),
            "SHY" => Ok(Self::Shy),
            "SURPRISED" => Ok(Self::Surprised),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// Emotional flavour of a choice. Never consumed by engine logic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Romantic,
    #[default]
    Neutral,
    Cold,
    Bold,
    Shy,
    Sad,
    Heroic,
}

impl FromStr for Sentiment {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "romantic" => Ok(Self::Romantic),
            "neutral" => Ok(Self::Neutral),
            "cold" => Ok(Self::Cold),
            "bold" => Ok(Self::Bold),
            "shy" => Ok(Self::Shy),
            "sad" => Ok(Self::Sad),
            "heroic" => Ok(Self::Heroic),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Romantic => "romantic",
            Self::Neutral => "neutral",
            Self::Cold => "cold",
            Self::Bold => "bold",
            Self::Shy => "shy",
            Self::Sad => "sad",
            Self::Heroic => "heroic",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndingType {
    Good,
    Bad,
    Neutral,
}

impl FromStr for EndingType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" => Ok(Self::Good),
            "bad" => Ok(Self::Bad),
            "neutral" => Ok(Self::Neutral),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

impl fmt::Display for EndingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Good => f.write_str("good"),
            Self::Bad => f.write_str("bad"),
            Self::Neutral => f.write_str("neutral"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant '{0}'")]
pub struct UnknownVariant(String);

// ---------------------------------------------------------------------------
// Scene / Choice
// ---------------------------------------------------------------------------

/// One player-selectable action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub text: String,
    #[serde(default, deserialize_with = "lenient_sentiment")]
    pub sentiment: Sentiment,
}

/// One narrative beat, as produced by the model for a single turn.
///
/// Scenes are built fresh from each reply and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub narrative: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<String>,
    /// `None` means the beat is narration only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Scenic prompt for the background image. Never describes characters.
    pub background_description: String,
    #[serde(
        rename = "characterMood",
        alias = "mood",
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub mood: Option<Mood>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub is_ending: bool,
    #[serde(
        default,
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub ending_type: Option<EndingType>,
}

impl Scene {
    /// The line shown in the text box: dialogue when present, narration otherwise.
    pub fn main_text(&self) -> &str {
        self.dialogue
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(&self.narrative)
    }

    /// Narration to show above the dialogue, when the two are distinct.
    pub fn narration_header(&self) -> Option<&str> {
        if self.main_text() == self.narrative {
            None
        } else {
            Some(&self.narrative)
        }
    }

    pub fn choice(&self, id: &str) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == id)
    }
}

// ---------------------------------------------------------------------------
// Lenient field decoding
// ---------------------------------------------------------------------------

/// Advisory enums: anything that is not a known variant becomes `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok()))
}

fn lenient_sentiment<'de, D>(deserializer: D) -> Result<Sentiment, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient(deserializer)?.unwrap_or_default())
}

/// Models sometimes number their choices; accept `1` as well as `"1"`.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "choice id must be a string or number, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Parsing & validation
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("invalid scene JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("scene rejected: {}", join_issues(.0))]
    Rejected(Vec<SceneIssue>),
}

fn join_issues(issues: &[SceneIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Something off about a scene. Blocking issues make the scene unplayable;
/// the rest are only worth a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneIssue {
    EmptyNarrative,
    NoChoices,
    DuplicateChoiceId(String),
    EmptyChoiceText(String),
    EmptyBackground,
    ChoicesOnEnding(usize),
    MissingEndingType,
    EndingTypeWithoutEnding,
    SpeakerChanged { from: String, to: String },
}

impl SceneIssue {
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::EmptyNarrative
                | Self::NoChoices
                | Self::DuplicateChoiceId(_)
                | Self::EmptyChoiceText(_)
        )
    }
}

impl fmt::Display for SceneIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyNarrative => write!(f, "narrative is empty"),
            Self::NoChoices => write!(f, "scene is not an ending but offers no choices"),
            Self::DuplicateChoiceId(id) => write!(f, "choice id '{id}' appears more than once"),
            Self::EmptyChoiceText(id) => write!(f, "choice '{id}' has no text"),
            Self::EmptyBackground => write!(f, "background description is empty"),
            Self::ChoicesOnEnding(n) => write!(f, "ending scene still offers {n} choice(s)"),
            Self::MissingEndingType => write!(f, "ending scene has no endingType"),
            Self::EndingTypeWithoutEnding => write!(f, "endingType set on a non-ending scene"),
            Self::SpeakerChanged { from, to } => write!(f, "speaker changed from '{from}' to '{to}'"),
        }
    }
}

/// Parse sanitized model output into a playable scene.
///
/// Missing required fields or any blocking [`SceneIssue`] is an error.
pub fn parse_scene(text: &str) -> Result<Scene, SceneError> {
    let scene: Scene = serde_json::from_str(text)?;
    let blocking: Vec<SceneIssue> = validate(&scene)
        .into_iter()
        .filter(SceneIssue::is_blocking)
        .collect();
    if blocking.is_empty() {
        Ok(scene)
    } else {
        Err(SceneError::Rejected(blocking))
    }
}

/// Check a scene on its own.
pub fn validate(scene: &Scene) -> Vec<SceneIssue> {
    let mut issues = Vec::new();

    if scene.narrative.trim().is_empty() {
        issues.push(SceneIssue::EmptyNarrative);
    }
    if scene.background_description.trim().is_empty() {
        issues.push(SceneIssue::EmptyBackground);
    }

    if scene.is_ending {
        if !scene.choices.is_empty() {
            issues.push(SceneIssue::ChoicesOnEnding(scene.choices.len()));
        }
        if scene.ending_type.is_none() {
            issues.push(SceneIssue::MissingEndingType);
        }
    } else {
        if scene.choices.is_empty() {
            issues.push(SceneIssue::NoChoices);
        }
        if scene.ending_type.is_some() {
            issues.push(SceneIssue::EndingTypeWithoutEnding);
        }
    }

    let mut seen = HashSet::new();
    for choice in &scene.choices {
        if !seen.insert(choice.id.as_str()) {
            issues.push(SceneIssue::DuplicateChoiceId(choice.id.clone()));
        }
        if choice.text.trim().is_empty() {
            issues.push(SceneIssue::EmptyChoiceText(choice.id.clone()));
        }
    }

    issues
}

/// Check a scene against the one it follows.
pub fn continuity(previous: &Scene, next: &Scene) -> Vec<SceneIssue> {
    match (&previous.speaker, &next.speaker) {
        (Some(from), Some(to)) if from != to => vec![SceneIssue::SpeakerChanged {
            from: from.clone(),
            to: to.clone(),
        }],
        _ => Vec::new(),
    }
}
