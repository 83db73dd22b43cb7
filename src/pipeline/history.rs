use crate::{pricing::PriceHint, types::ChatMessageRecord};

pub const TRUNCATION_MARKER: &str = "... (truncated)";
const TITLE_CHARS: usize = 50;

/// Bounds how much of a chat is replayed into the next prompt.
#[derive(Debug, Clone, Copy)]
pub struct HistoryWindow {
    pub max_turns: usize,
    pub max_chars: usize,
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self {
            max_turns: 8,
            max_chars: 500,
        }
    }
}

impl HistoryWindow {
    /// How many turns to load so the window is still full after the
    /// current turn is dropped.
    pub fn fetch_limit(&self) -> usize {
        self.max_turns + 1
    }

    /// Renders the newest `max_turns` turns other than `current_id`, oldest
    /// first, one `Role: content` line each.
    pub fn render(&self, turns: &[ChatMessageRecord], current_id: &str) -> String {
        let prior = turns
            .iter()
            .filter(|turn| turn.id != current_id)
            .collect::<Vec<_>>();
        let start = prior.len().saturating_sub(self.max_turns);

        prior[start..]
            .iter()
            .map(|turn| {
                format!(
                    "{}: {}",
                    turn.role.speaker(),
                    truncate_chars(&turn.content, self.max_chars)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn build_prompt(history: &str, message: &str, hint: &PriceHint) -> String {
    let mut prompt = if history.is_empty() {
        message.to_owned()
    } else {
        format!("Previous conversation:\n{history}\n\nUser: {message}")
    };
    prompt.push_str(&hint.annotation());
    prompt
}

/// First 50 characters of the opening message, with `...` when cut.
pub fn chat_title(message: &str) -> String {
    if message.chars().count() > TITLE_CHARS {
        let mut title = message.chars().take(TITLE_CHARS).collect::<String>();
        title.push_str("...");
        title
    } else {
        message.to_owned()
    }
}

fn truncate_chars(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_owned();
    }
    let mut truncated = content.chars().take(max_chars).collect::<String>();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
