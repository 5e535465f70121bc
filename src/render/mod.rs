use chrono::{DateTime, Local, Utc};
use pulldown_cmark::{html, Event, Options, Parser};
use serde::Serialize;

use crate::model::user::{initials_of, UserProfile};

const GUEST_GREETING: &str = "Ace your studies";
pub const TAGLINE: &str =
    "Turn complex topics into clear concepts using proven methods like First Principles and Mind Maps.";

#[derive(Debug, Clone, Serialize)]
pub struct StarterPrompt {
    pub title: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
}

pub const STARTER_PROMPTS: [StarterPrompt; 4] = [
    StarterPrompt {
        title: "Core Concepts",
        description: "Break it down with First Principles",
        prompt: "Break down the core concepts of [Topic] using First Principles.",
    },
    StarterPrompt {
        title: "Mind Map",
        description: "Visualize connections",
        prompt: "Create a text-based Mind Map for [Topic] to show how everything connects.",
    },
    StarterPrompt {
        title: "Real World",
        description: "Connect theory to reality",
        prompt: "Give me a real-world example of [Topic] so I never forget it.",
    },
    StarterPrompt {
        title: "Summarize",
        description: "Attach a PDF to summarize",
        prompt: "Analyze this document and extract the key exam topics.",
    },
];

/// Data for the empty-chat screen.
#[derive(Debug, Clone, Serialize)]
pub struct Welcome {
    pub greeting: String,
    pub tagline: &'static str,
    pub initials: String,
    pub starters: &'static [StarterPrompt],
}

pub fn welcome(profile: Option<&UserProfile>) -> Welcome {
    Welcome {
        greeting: greeting(profile),
        tagline: TAGLINE,
        initials: initials_of(profile.and_then(|p| p.full_name.as_deref())),
        starters: &STARTER_PROMPTS,
    }
}

pub fn greeting(profile: Option<&UserProfile>) -> String {
    match profile.and_then(UserProfile::first_name) {
        Some(first) => format!("Welcome, {first}"),
        None => GUEST_GREETING.to_string(),
    }
}

/// Markdown reply as HTML. Raw HTML in the source is shown as text.
pub fn render_markdown(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(text, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// `HH:MM` in server-local time.
pub fn format_time(ts_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
        .map(|utc| utc.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_supports_tables_and_escapes_html() {
        let html = render_markdown("| a | b |\n|---|---|\n| 1 | 2 |\n\n~~old~~ <script>x</script>");
        assert!(html.contains("<table>"));
        assert!(html.contains("<del>old</del>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn task_lists_render_checkboxes() {
        let html = render_markdown("- [x] read chapter\n- [ ] flashcards");
        assert!(html.contains("checkbox"));
    }

    #[test]
    fn greeting_uses_first_name() {
        let profile = UserProfile {
            id: "u".into(),
            full_name: Some("Chanda Mulenga".into()),
            ..Default::default()
        };
        assert_eq!(greeting(Some(&profile)), "Welcome, Chanda");
        assert_eq!(greeting(None), "Ace your studies");

        let w = welcome(Some(&profile));
        assert_eq!(w.initials, "CM");
        assert_eq!(w.starters.len(), 4);
        assert_eq!(welcome(None).initials, "GU");
    }

    #[test]
    fn time_is_hours_and_minutes() {
        let formatted = format_time(0);
        assert_eq!(formatted.len(), 5);
        assert_eq!(&formatted[2..3], ":");
    }
}
