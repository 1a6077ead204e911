//! Background image URLs for scenes, plus a best-effort prefetch.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;

pub const DEFAULT_BASE_URL: &str = "https://image.pollinations.ai/prompt";

/// Appended to every scenic description before it is sent.
pub const DEFAULT_STYLE: &str = "Makoto Shinkai style, anime masterpiece, 8k resolution, highly detailed, \
emotional lighting, cinematic composition, vibrant colors, lens flare, atmospheric, visual novel background";

/// Shown while an image loads, or when it never does.
pub const PLACEHOLDER_BACKGROUND: &str = "placeholder://background/rainy-night";

/// Seeds only vary the picture; they are not meant for reproducibility.
pub const SEED_RANGE: std::ops::Range<u32> = 0..1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedMode {
    Random,
    Fixed(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundRequest {
    pub base_url: String,
    pub style: String,
    pub width: u32,
    pub height: u32,
    pub seed: SeedMode,
}

impl Default for BackgroundRequest {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            style: DEFAULT_STYLE.to_string(),
            width: 1920,
            height: 1080,
            seed: SeedMode::Random,
        }
    }
}

impl BackgroundRequest {
    /// Image URL for a scene's background description, or `None` when the
    /// description is blank.
    pub fn url(&self, description: &str) -> Option<String> {
        let description = description.trim();
        if description.is_empty() {
            return None;
        }

        let prompt = format!("{description}, {}", self.style);
        let url = format!(
            "{}/{}?width={}&height={}&nologo=true&seed={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(&prompt),
            self.width,
            self.height,
            self.seed()
        );
        debug!("Background URL: {url}");
        Some(url)
    }

    fn seed(&self) -> u32 {
        match self.seed {
            SeedMode::Fixed(seed) => seed,
            SeedMode::Random => rand::thread_rng().gen_range(SEED_RANGE),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrefetchError {
    #[error("image request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("image endpoint answered {0}")]
    Status(u16),
}

/// Fetch an image on a background thread. Never blocks the caller.
pub fn prefetch(url: String, timeout: Duration) -> JoinHandle<Result<usize, PrefetchError>> {
    thread::spawn(move || {
        let result = fetch(&url, timeout);
        match &result {
            Ok(bytes) => info!("Background ready ({bytes} bytes)"),
            Err(e) => warn!("Background unavailable, keeping placeholder: {e}"),
        }
        result
    })
}

fn fetch(url: &str, timeout: Duration) -> Result<usize, PrefetchError> {
    let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
    let response = client.get(url).send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(PrefetchError::Status(status.as_u16()));
    }
    Ok(response.bytes()?.len())
}

/// A scene's background as the player sees it: the placeholder until the
/// image has been fetched, then its URL. A failed fetch keeps the
/// placeholder for good.
pub struct Backdrop {
    url: Option<String>,
    pending: Option<JoinHandle<Result<usize, PrefetchError>>>,
    loaded: bool,
}

impl Backdrop {
    /// Start fetching the background for `description`. Blank descriptions
    /// have no image and settle on the placeholder immediately.
    pub fn load(request: &BackgroundRequest, description: &str, timeout: Duration) -> Self {
        let url = request.url(description);
        let pending = url.clone().map(|url| prefetch(url, timeout));
        Self {
            url,
            pending,
            loaded: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// What to show right now. Collects a finished fetch without waiting on
    /// an unfinished one.
    pub fn current(&mut self) -> &str {
        if self.pending.as_ref().is_some_and(|h| h.is_finished()) {
            if let Some(handle) = self.pending.take() {
                self.loaded = matches!(handle.join(), Ok(Ok(_)));
            }
        }
        match &self.url {
            Some(url) if self.loaded => url,
            _ => PLACEHOLDER_BACKGROUND,
        }
    }
}
