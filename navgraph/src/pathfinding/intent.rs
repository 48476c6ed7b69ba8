//! Keyword tables mapping free text onto screen types.

use crate::utils::{normalize, split_identifier};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScreenType {
    Home,
    Settings,
    Profile,
    Search,
    Messages,
    Notifications,
    Help,
    About,
    Login,
    Cart,
    Media,
    Unknown,
}

impl ScreenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenType::Home => "HOME",
            ScreenType::Settings => "SETTINGS",
            ScreenType::Profile => "PROFILE",
            ScreenType::Search => "SEARCH",
            ScreenType::Messages => "MESSAGES",
            ScreenType::Notifications => "NOTIFICATIONS",
            ScreenType::Help => "HELP",
            ScreenType::About => "ABOUT",
            ScreenType::Login => "LOGIN",
            ScreenType::Cart => "CART",
            ScreenType::Media => "MEDIA",
            ScreenType::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        KEYWORDS
            .iter()
            .map(|(ty, _)| *ty)
            .chain(std::iter::once(ScreenType::Unknown))
            .find(|ty| ty.as_str() == value)
    }

    /// Best-effort type of a screen from its surface label, e.g.
    /// `com.app.ui.SettingsActivity` is [`ScreenType::Settings`]. Only the
    /// class name counts; package segments are ignored.
    pub fn infer(surface_label: &str) -> Self {
        let class_name = surface_label.rsplit('.').next().unwrap_or(surface_label);
        let words = split_identifier(class_name);
        for (ty, keywords) in KEYWORDS {
            if keywords
                .iter()
                .any(|k| !k.contains(' ') && words.iter().any(|w| w == k))
            {
                return *ty;
            }
        }
        ScreenType::Unknown
    }
}

// Tried in order; the first table with a matching keyword wins.
const KEYWORDS: &[(ScreenType, &[&str])] = &[
    (
        ScreenType::Settings,
        &["settings", "setting", "preferences", "preference", "prefs", "options", "config", "configuration"],
    ),
    (
        ScreenType::Notifications,
        &["notifications", "notification", "alerts", "alert"],
    ),
    (
        ScreenType::Messages,
        &["messages", "message", "inbox", "chat", "chats", "conversation", "conversations", "mail"],
    ),
    (
        ScreenType::Profile,
        &["profile", "account", "my account", "user"],
    ),
    (ScreenType::Search, &["search", "find", "lookup", "explore"]),
    (
        ScreenType::Help,
        &["help", "support", "faq", "feedback", "contact us"],
    ),
    (
        ScreenType::About,
        &["about", "info", "version", "licenses", "legal"],
    ),
    (
        ScreenType::Login,
        &["login", "log in", "sign in", "signin", "auth", "authentication"],
    ),
    (
        ScreenType::Cart,
        &["cart", "basket", "checkout", "bag"],
    ),
    (
        ScreenType::Media,
        &["gallery", "photos", "videos", "player", "camera", "music"],
    ),
    (
        ScreenType::Home,
        &["home", "main", "start", "dashboard", "feed", "launcher"],
    ),
];

/// Resolves a spoken or typed keyword to a screen type. Pure table lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentMatcher;

impl IntentMatcher {
    pub fn new() -> Self {
        Self
    }

    /// `None` when no table matches.
    pub fn resolve(&self, keyword: &str) -> Option<ScreenType> {
        let phrase = normalize(keyword);
        if phrase.is_empty() {
            return None;
        }
        let words: Vec<&str> = phrase.split(' ').collect();

        // Multi-word keywords match as phrases, single words as whole words
        KEYWORDS.iter().find_map(|(ty, keywords)| {
            let hit = keywords.iter().any(|k| {
                if k.contains(' ') {
                    phrase.contains(k)
                } else {
                    words.contains(k)
                }
            });
            hit.then_some(*ty)
        })
    }
}
