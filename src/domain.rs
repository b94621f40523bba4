use serde::{Deserialize, Serialize};
use snafu::{ensure, Snafu};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubredditId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostId(pub String);

impl PostId {
    /// The id without its kind prefix (`t3_abc123` becomes `abc123`), as
    /// used in link paths. Ids without a kind prefix are returned as-is.
    pub fn bare(&self) -> &str {
        let id = &*self.0;
        match id.as_bytes() {
            [b't', kind, b'_', _, ..] if kind.is_ascii_digit() => &id[3..],
            _ => id,
        }
    }
}

/// A case-normalized Reddit handle. Two handles that differ only in
/// case or surrounding whitespace are the same subscriber.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Username(String);

impl Username {
    pub fn new(raw: &str) -> Result<Self, InvalidUsername> {
        let name = raw.trim().to_lowercase();
        ensure!(!name.is_empty(), InvalidUsernameSnafu);
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("A username must not be empty"))]
pub struct InvalidUsername {}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubredditName(pub String);

/// A "post created" event as delivered by the host.
#[derive(Debug, Clone, Deserialize)]
pub struct PostCreate {
    #[serde(default)]
    pub post: Option<Post>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub author_id: UserId,
    pub subreddit_id: SubredditId,
    #[serde(default)]
    pub permalink: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub text: String,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub notified: usize,
    pub failed: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuAction {
    Subscribe,
    Unsubscribe,
}

impl MenuAction {
    pub const ALL: [MenuAction; 2] = [MenuAction::Subscribe, MenuAction::Unsubscribe];

    pub fn path(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Subscribe => "Notify Me of New Posts",
            Self::Unsubscribe => "Stop New Post Notifications",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Subscribe => "Get a PM when a new post is made in this subreddit.",
            Self::Unsubscribe => "Stop receiving PMs about new posts.",
        }
    }

    pub fn success_text(self) -> &'static str {
        match self {
            Self::Subscribe => "Subscribed! You'll get a message for new posts.",
            Self::Unsubscribe => "Unsubscribed. You will no longer receive notifications.",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Appearance {
    Success,
    Neutral,
}

/// A short notice shown to the acting user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub appearance: Appearance,
    pub text: String,
}

impl Toast {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            appearance: Appearance::Success,
            text: text.into(),
        }
    }

    pub fn neutral(text: impl Into<String>) -> Self {
        Self {
            appearance: Appearance::Neutral,
            text: text.into(),
        }
    }
}
