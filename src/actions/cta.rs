//! Call-to-action discovery: affirmative verbs first, structure last.

use eoka::Page;

use crate::observe::{PageElement, PageSnapshot};
use crate::Result;

/// Affirmative verbs, in preference order.
pub const CTA_WORDS: &[&str] = &[
    "continue", "next", "start", "unlock", "claim", "yes", "submit", "see", "get", "show",
    "reveal", "proceed", "go", "let's",
];

/// Structural fallbacks when nothing matches by text.
const FALLBACK_SELECTORS: &[&str] = &[
    "button[type='submit']",
    "input[type='submit']",
    "[class*='next']",
    "[class*='continue']",
    "[id*='next']",
];

/// Whole-word match against the CTA vocabulary. Word-level on purpose:
/// "Forget password?" must not match "get".
pub fn is_cta_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    CTA_WORDS.iter().any(|w| {
        lower
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .any(|token| token == *w)
    })
}

/// Strict pass: proper clickable controls only, vocabulary order decides.
pub fn find_strict(snap: &PageSnapshot) -> Option<&PageElement> {
    for word in CTA_WORDS {
        let hit = snap.elements.iter().find(|e| {
            e.is_clickable_control()
                && e.text
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric() && c != '\'')
                    .any(|token| token == *word)
        });
        if hit.is_some() {
            return hit;
        }
    }
    None
}

/// Loose pass: anything clickable-ish whose text carries the vocabulary.
pub fn find_loose(snap: &PageSnapshot) -> Option<&PageElement> {
    snap.elements
        .iter()
        .find(|e| (e.pointer || e.has_onclick || e.is_clickable_control()) && is_cta_text(&e.text))
}

/// Full CTA click: strict by-text, loose by-text, then structural fallbacks.
pub async fn click_cta(page: &Page, snap: &PageSnapshot, trace: &mut Vec<String>) -> Result<bool> {
    if let Some(el) = find_strict(snap) {
        trace.push(format!("cta[strict] \"{}\"", el.text.trim()));
        if super::resilient_click(page, &el.selector, trace).await? {
            return Ok(true);
        }
    }
    if let Some(el) = find_loose(snap) {
        trace.push(format!("cta[loose] \"{}\"", el.text.trim()));
        if super::resilient_click(page, &el.selector, trace).await? {
            return Ok(true);
        }
    }
    for sel in FALLBACK_SELECTORS {
        match page.try_click(sel).await {
            Ok(true) => {
                trace.push(format!("cta[structural] {sel}"));
                return Ok(true);
            }
            Ok(false) => {}
            Err(e) => {
                if crate::is_session_closed(&e) {
                    return Err(crate::Error::SessionClosed(e.to_string()));
                }
            }
        }
    }
    Ok(false)
}

/// Strict CTA click only — for screens where a loose match would eat an
/// answer option.
pub async fn click_cta_strict(
    page: &Page,
    snap: &PageSnapshot,
    trace: &mut Vec<String>,
) -> Result<bool> {
    let Some(el) = find_strict(snap) else {
        return Ok(false);
    };
    trace.push(format!("cta[strict] \"{}\"", el.text.trim()));
    super::resilient_click(page, &el.selector, trace).await
}

/// Whether a control currently reports itself disabled.
pub async fn control_disabled(page: &Page, selector: &str) -> bool {
    let js = format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; \
         return !!(el.disabled || el.getAttribute('aria-disabled') === 'true'); }})()",
        serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".into())
    );
    page.evaluate::<bool>(&js).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eoka::BoundingBox;

    fn button(text: &str) -> PageElement {
        PageElement {
            tag: "button".into(),
            role: None,
            text: text.into(),
            placeholder: None,
            name: None,
            id: None,
            aria_label: None,
            autocomplete: None,
            input_type: None,
            selector: format!("button.{}", text.to_lowercase().replace(' ', "-")),
            checked: false,
            pointer: true,
            has_onclick: false,
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 160.0,
                height: 44.0,
            },
        }
    }

    fn snap(elements: Vec<PageElement>) -> PageSnapshot {
        PageSnapshot {
            url: "https://funnel.example/quiz".into(),
            text: String::new(),
            html_len: 1000,
            html_prefix: "<html>".into(),
            elements,
        }
    }

    #[test]
    fn test_word_level_matching() {
        assert!(is_cta_text("Continue"));
        assert!(is_cta_text("See my results"));
        assert!(is_cta_text("Let's go!"));
        // substrings never match
        assert!(!is_cta_text("Forget password?"));
        assert!(!is_cta_text("Unstarted"));
        assert!(!is_cta_text("Eyes"));
    }

    #[test]
    fn test_strict_prefers_vocabulary_order() {
        let s = snap(vec![button("Get started"), button("Continue")]);
        // "continue" sits before "get" in the vocabulary
        assert_eq!(find_strict(&s).unwrap().text, "Continue");
    }

    #[test]
    fn test_strict_ignores_plain_divs() {
        let mut div = button("Continue");
        div.tag = "div".into();
        let s = snap(vec![div]);
        assert!(find_strict(&s).is_none());
        // but the loose pass picks it up via pointer styling
        assert!(find_loose(&s).is_some());
    }

    #[test]
    fn test_no_match() {
        let s = snap(vec![button("Male"), button("Female")]);
        assert!(find_strict(&s).is_none());
        assert!(find_loose(&s).is_none());
    }
}
