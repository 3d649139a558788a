//! Option selection policy: smart keywords first, rotation fallback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use eoka::Page;

use crate::observe::PageElement;
use crate::Result;

/// Lexical signals that an option leads to a premium/personalized path.
/// English-biased on purpose; non-English funnels fall back to rotation.
pub const SMART_WORDS: &[&str] = &[
    "personal",
    "plan",
    "result",
    "unlock",
    "recommend",
    "premium",
    "custom",
];

/// Rotation never spreads over more than this many leading candidates.
const ROTATION_SPAN: usize = 4;

/// Process-wide fallback selection index. One cursor is created in `main` and
/// handed to every run so ambiguous choices diversify across the whole
/// process lifetime, not per funnel. Cloning shares the counter.
#[derive(Debug, Clone, Default)]
pub struct RotationCursor(Arc<AtomicUsize>);

impl RotationCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the cursor and map it onto `candidates` options.
    pub fn next(&self, candidates: usize) -> usize {
        let span = candidates.clamp(1, ROTATION_SPAN);
        self.0.fetch_add(1, Ordering::Relaxed) % span
    }
}

/// Pick an option index from the candidate labels.
///
/// Policy: any smart-keyword hit wins; otherwise rotate across ambiguous
/// candidates; a sole candidate is simply taken.
pub fn choose_index(labels: &[&str], cursor: &RotationCursor) -> (usize, String) {
    for (i, label) in labels.iter().enumerate() {
        let lower = label.to_lowercase();
        if let Some(word) = SMART_WORDS.iter().find(|w| lower.contains(*w)) {
            return (i, format!("smart keyword \"{word}\""));
        }
    }
    if labels.len() >= 2 {
        let idx = cursor.next(labels.len());
        (idx, format!("rotation fallback #{idx}"))
    } else {
        (0, "sole candidate".into())
    }
}

const LABEL_CLICK_JS: &str = r#"
(() => {
    const el = document.querySelector(__SEL__);
    if (!el) return false;
    let lbl = null;
    if (el.id) lbl = document.querySelector('label[for=' + JSON.stringify(el.id) + ']');
    if (!lbl) lbl = el.closest('label');
    if (!lbl) return false;
    lbl.click();
    return true;
})()
"#;

/// Activate a chosen option. Escalation: native click on the control, click
/// an associated label, click the nearest clickable ancestor, then a direct
/// script click on the control as the last resort.
pub async fn activate_option(
    page: &Page,
    option: &PageElement,
    trace: &mut Vec<String>,
) -> Result<bool> {
    // 1. native check/click on the control itself
    match page.click(&option.selector).await {
        Ok(()) => {
            trace.push(format!("option click {}", option.selector));
            return Ok(true);
        }
        Err(e) if crate::is_session_closed(&e) => {
            return Err(crate::Error::SessionClosed(e.to_string()));
        }
        Err(_) => {}
    }

    // 2. an associated label often carries the real hit area
    let js = LABEL_CLICK_JS.replace(
        "__SEL__",
        &serde_json::to_string(&option.selector).unwrap_or_else(|_| "\"\"".into()),
    );
    if let Ok(true) = page.evaluate::<bool>(&js).await {
        trace.push(format!("option label click {}", option.selector));
        return Ok(true);
    }

    // 3. styled wrapper around a visually-hidden control
    if super::click_clickable_ancestor(page, &option.selector, trace).await? {
        return Ok(true);
    }

    // 4. direct script click
    let js = format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
        serde_json::to_string(&option.selector).unwrap_or_else(|_| "\"\"".into())
    );
    match page.evaluate::<bool>(&js).await {
        Ok(true) => {
            trace.push(format!("option script click {}", option.selector));
            Ok(true)
        }
        _ => {
            trace.push(format!("option activation failed {}", option.selector));
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_cycles_monotonically() {
        let cursor = RotationCursor::new();
        let labels = ["a", "b", "c", "d"];
        let picks: Vec<usize> = (0..8).map(|_| choose_index(&labels, &cursor).0).collect();
        assert_eq!(picks, vec![0, 1, 2, 3, 0, 1, 2, 3]);
    }

    #[test]
    fn test_rotation_never_repeats_consecutively() {
        let cursor = RotationCursor::new();
        let labels = ["left", "right"];
        let mut last = None;
        for _ in 0..10 {
            let (idx, _) = choose_index(&labels, &cursor);
            assert_ne!(Some(idx), last);
            last = Some(idx);
        }
    }

    #[test]
    fn test_rotation_span_caps_at_four() {
        let cursor = RotationCursor::new();
        let labels = ["a", "b", "c", "d", "e", "f"];
        for _ in 0..12 {
            let (idx, _) = choose_index(&labels, &cursor);
            assert!(idx < 4);
        }
    }

    #[test]
    fn test_smart_keyword_wins_over_rotation() {
        let cursor = RotationCursor::new();
        let labels = ["Basic", "Personal plan", "Other"];
        for _ in 0..5 {
            let (idx, why) = choose_index(&labels, &cursor);
            assert_eq!(idx, 1);
            assert!(why.contains("smart keyword"));
        }
    }

    #[test]
    fn test_sole_candidate() {
        let cursor = RotationCursor::new();
        let (idx, why) = choose_index(&["only"], &cursor);
        assert_eq!(idx, 0);
        assert_eq!(why, "sole candidate");
    }

    #[test]
    fn test_cursor_is_shared_across_clones() {
        let cursor = RotationCursor::new();
        let other = cursor.clone();
        let labels = ["a", "b", "c", "d"];
        assert_eq!(choose_index(&labels, &cursor).0, 0);
        assert_eq!(choose_index(&labels, &other).0, 1);
        assert_eq!(choose_index(&labels, &cursor).0, 2);
    }
}
