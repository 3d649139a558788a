//! Best-effort dismissal of cookie/consent overlays. Never raises — absence
//! of a popup is the common case, not an error.

use eoka::Page;

/// Full-phrase consent button texts. Matched against the entire trimmed,
/// lowercased text: substring matching on short words like "ok" would eat
/// quiz option buttons that happen to contain them.
const CONSENT_PHRASES: &[&str] = &[
    "accept",
    "accept all",
    "accept all cookies",
    "accept cookies",
    "allow all",
    "allow cookies",
    "i agree",
    "agree",
    "agree and continue",
    "got it",
    "ok",
    "okay",
    "i understand",
    "continue without accepting",
];

/// Known consent-framework hooks.
const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "#didomi-notice-agree-button",
    ".fc-cta-consent",
    ".cc-allow",
    ".cc-dismiss",
    "#cookiescript_accept",
    ".cmpboxbtnyes",
    ".cookie-consent-accept",
];

/// Generic close icons, tried last.
const CLOSE_SELECTORS: &[&str] = &[
    "[aria-label='Close']",
    "[aria-label='close']",
    ".modal-close",
    ".popup-close",
    ".close-button",
    "button.close",
];

/// Dismiss whatever consent/popup chrome is in the way. Returns a trace of
/// what was clicked; every failure is absorbed.
pub async fn close_popups(page: &Page) -> Vec<String> {
    let mut trace = Vec::new();

    let js = format!(
        r#"(() => {{
            const phrases = {phrases};
            for (const el of document.querySelectorAll('button, [role="button"], a')) {{
                const text = (el.textContent || '').trim().toLowerCase();
                if (phrases.includes(text)) {{ el.click(); return text; }}
            }}
            return null;
        }})()"#,
        phrases = serde_json::to_string(CONSENT_PHRASES).unwrap_or_else(|_| "[]".into())
    );
    if let Ok(Some(hit)) = page.evaluate::<Option<String>>(&js).await {
        trace.push(format!("consent button \"{hit}\""));
        page.wait(300).await;
    }

    for sel in CONSENT_SELECTORS {
        if let Ok(true) = page.try_click(sel).await {
            trace.push(format!("consent selector {sel}"));
            page.wait(300).await;
            break;
        }
    }

    for sel in CLOSE_SELECTORS {
        if let Ok(true) = page.try_click(sel).await {
            trace.push(format!("close icon {sel}"));
            page.wait(300).await;
            break;
        }
    }

    trace
}
