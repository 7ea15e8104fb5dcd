//! Linear-scan search over threads and message text.
//!
//! Results come back in thread-list order (newest thread first), not ranked
//! by relevance.
//!
//! Only `text` parts are searched. A query that appears only inside a `code`
//! part or an attachment name produces no hit.

use serde::Serialize;

use iris_core::ids::{MessageId, ThreadId};
use iris_store::StoreState;

/// Longest snippet returned, ellipses included.
pub const SNIPPET_MAX_CHARS: usize = 96;

const ELLIPSIS: char = '…';

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub thread_id: ThreadId,
    pub thread_title: String,
    /// Message holding the content match. `None` for title matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl SearchHit {
    pub fn is_title_match(&self) -> bool {
        self.snippet.is_none()
    }
}

/// Case-insensitive substring search honouring the active project filter.
///
/// A title match wins and carries no snippet. Otherwise the first text part
/// containing the query, in message then part order, yields the snippet and
/// ends the scan of that thread.
pub fn search(state: &StoreState, query: &str) -> Vec<SearchHit> {
    let needle = fold(query.trim());
    if needle.is_empty() {
        return Vec::new();
    }

    let mut hits = Vec::new();
    for thread in state.visible_threads() {
        let title = thread.title.clone();
        if find_folded(&fold(&thread.title), &needle).is_some() {
            hits.push(SearchHit {
                thread_id: thread.id.clone(),
                thread_title: title,
                message_id: None,
                snippet: None,
            });
            continue;
        }

        let content_hit = state.messages(&thread.id).iter().find_map(|message| {
            message.parts.iter().filter_map(|p| p.as_text()).find_map(|text| {
                let chars: Vec<char> = text.chars().collect();
                let folded: Vec<char> = chars.iter().map(|c| fold_char(*c)).collect();
                find_folded(&folded, &needle)
                    .map(|at| (message.id.clone(), snippet_around(&chars, at, needle.len())))
            })
        });

        if let Some((message_id, snippet)) = content_hit {
            hits.push(SearchHit {
                thread_id: thread.id.clone(),
                thread_title: title,
                message_id: Some(message_id),
                snippet: Some(snippet),
            });
        }
    }
    hits
}

/// Window of at most [`SNIPPET_MAX_CHARS`] characters centred on the match,
/// with an ellipsis on each side that was cut.
pub fn snippet_around(chars: &[char], match_at: usize, match_len: usize) -> String {
    if chars.len() <= SNIPPET_MAX_CHARS {
        return chars.iter().collect();
    }

    let window = SNIPPET_MAX_CHARS - 2;
    let centre = match_at + match_len / 2;
    let start = centre.saturating_sub(window / 2).min(chars.len() - window);
    let end = start + window;

    let mut out = String::with_capacity(SNIPPET_MAX_CHARS * 4);
    if start > 0 {
        out.push(ELLIPSIS);
    }
    out.extend(&chars[start..end]);
    if end < chars.len() {
        out.push(ELLIPSIS);
    }
    out
}

// Case folding is one char to one char so that match offsets in the folded
// text are offsets in the original.
fn fold_char(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn fold(s: &str) -> Vec<char> {
    s.chars().map(fold_char).collect()
}

fn find_folded(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
