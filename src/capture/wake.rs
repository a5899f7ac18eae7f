//! Wake phrase matching on transcript text

/// Case-insensitive substring matcher over a set of wake aliases
#[derive(Debug, Clone)]
pub struct WakeMatcher {
    phrases: Vec<String>,
}

impl WakeMatcher {
    /// Create a matcher; aliases are trimmed and lowercased, empty ones dropped
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }

    /// Normalized aliases
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Return the first alias contained in `transcript`, if any
    pub fn find(&self, transcript: &str) -> Option<&str> {
        let normalized = transcript.to_lowercase();
        self.phrases
            .iter()
            .find(|phrase| normalized.contains(phrase.as_str()))
            .map(String::as_str)
    }
}
