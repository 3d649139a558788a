//! Per-archetype interaction procedures.
//!
//! `dispatch` routes the classified screen to one of five procedures built
//! from the shared strategy primitives. Transient failures stay inside the
//! strategy chains; only a dead browser session escapes.

use eoka::Page;
use tracing::debug;

use crate::actions::{self, cta, select, ActionOutcome, RotationCursor};
use crate::classify::{self, Archetype};
use crate::config::Profile;
use crate::observe::{self, PageElement, PageSnapshot};
use crate::{Error, Result};

/// Submission vocabulary for explicit email submit controls.
const SUBMIT_WORDS: &[&str] = &[
    "submit", "send", "continue", "join", "subscribe", "sign up", "get started",
];

/// Broad structural sweep for unclassified screens.
const OTHER_FALLBACK_SELECTORS: &[&str] = &[
    "button[type='submit']",
    "input[type='submit']",
    "[class*='next']",
    "[class*='continue']",
    "[id*='next']",
    "[class*='btn'][class*='primary']",
];

/// Run the procedure for `archetype` against the live page.
pub async fn dispatch(
    page: &Page,
    snap: &PageSnapshot,
    archetype: Archetype,
    profile: &Profile,
    cursor: &RotationCursor,
) -> Result<ActionOutcome> {
    debug!("dispatching {archetype}");
    match archetype {
        Archetype::Question => question(page, snap, cursor).await,
        Archetype::Input => input(page, snap, profile).await,
        Archetype::Email => email(page, snap, profile).await,
        Archetype::Info => info(page, snap).await,
        Archetype::Other => other(page, snap, cursor).await,
        Archetype::Paywall => {
            // terminal signal for the driver, not an interaction target
            let mut out = ActionOutcome::new();
            out.note("paywall: terminal screen, no action");
            Ok(out)
        }
    }
}

fn option_label(el: &PageElement) -> &str {
    let t = el.text.trim();
    if !t.is_empty() {
        return t;
    }
    el.aria_label.as_deref().unwrap_or("")
}

async fn pick_and_activate(
    page: &Page,
    options: &[&PageElement],
    cursor: &RotationCursor,
    out: &mut ActionOutcome,
) -> Result<bool> {
    let labels: Vec<&str> = options.iter().map(|e| option_label(e)).collect();
    let (idx, why) = select::choose_index(&labels, cursor);
    out.note(format!(
        "picked option {}/{} \"{}\" ({why})",
        idx + 1,
        options.len(),
        labels[idx]
    ));
    select::activate_option(page, options[idx], &mut out.trace).await
}

async fn question(page: &Page, snap: &PageSnapshot, cursor: &RotationCursor) -> Result<ActionOutcome> {
    let mut out = ActionOutcome::new();

    let radios = classify::option_controls(snap);
    let picked = if !radios.is_empty() {
        pick_and_activate(page, &radios, cursor, &mut out).await?
    } else {
        let buttons = classify::option_buttons(snap);
        if !buttons.is_empty() {
            pick_and_activate(page, &buttons, cursor, &mut out).await?
        } else {
            let cards = classify::option_cards(snap);
            if !cards.is_empty() {
                pick_and_activate(page, &cards, cursor, &mut out).await?
            } else {
                out.note("no option candidates found");
                false
            }
        }
    };

    // some screens need both an answer and an explicit continue
    let cta_clicked = cta::click_cta_strict(page, snap, &mut out.trace).await?;
    let mut confirmed = false;
    if !cta_clicked {
        confirmed = actions::press_confirm(page, &mut out.trace).await?;
    }

    out.performed = picked || cta_clicked || confirmed;
    Ok(out)
}

/// Value for a data-entry field: descriptor hints first, then a guess from
/// the surrounding body copy.
fn guess_value(field: &PageElement, body_text: &str, profile: &Profile) -> String {
    let desc = field.descriptor();
    if desc.contains("height") {
        return profile.height_cm.to_string();
    }
    if desc.contains("weight") {
        return profile.weight_kg.to_string();
    }
    if desc.contains("age") {
        return profile.age.to_string();
    }
    if desc.contains("mail") {
        return profile.email.clone();
    }
    if desc.contains("name") {
        return profile.name.clone();
    }
    let body = body_text.to_lowercase();
    if body.contains("height") {
        profile.height_cm.to_string()
    } else if body.contains("weight") {
        profile.weight_kg.to_string()
    } else if body.contains("age") || body.contains("old are you") {
        profile.age.to_string()
    } else {
        profile.name.clone()
    }
}

async fn input(page: &Page, snap: &PageSnapshot, profile: &Profile) -> Result<ActionOutcome> {
    let mut out = ActionOutcome::new();

    let fields = classify::text_entry_fields(snap);
    if fields.is_empty() {
        out.note("no fillable fields, treating as informational");
        out.performed = cta::click_cta(page, snap, &mut out.trace).await?;
        return Ok(out);
    }

    let mut filled: Vec<String> = Vec::new();
    for field in &fields {
        let value = guess_value(field, &snap.text, profile);
        if actions::resilient_fill(page, &field.selector, &value, &mut out.trace).await? {
            filled.push(field.selector.clone());
            out.performed = true;
        }
    }

    if let Some(el) = cta::find_strict(snap) {
        if cta::control_disabled(page, &el.selector).await {
            // the framework missed the edit; re-fire events and retry once
            out.note("submit control disabled, re-firing field events");
            for sel in &filled {
                actions::dispatch_field_events(page, sel, &mut out.trace).await?;
            }
        }
        if actions::resilient_click(page, &el.selector, &mut out.trace).await? {
            out.performed = true;
        }
    }
    Ok(out)
}

async fn fingerprint_changed(page: &Page, before: &str) -> Result<bool> {
    match observe::fingerprint(page).await {
        Ok(fp) => Ok(fp != before),
        Err(Error::SessionClosed(m)) => Err(Error::SessionClosed(m)),
        Err(_) => Ok(false),
    }
}

/// Escalating email submission; stops the moment the document moves.
async fn submit_email(
    page: &Page,
    snap: &PageSnapshot,
    field_selector: &str,
    before: &str,
    out: &mut ActionOutcome,
) -> Result<bool> {
    // some forms submit on blur validation
    if page.human().press_key("Tab").await.is_ok() {
        out.note("blur via tab");
        if fingerprint_changed(page, before).await? {
            out.note("document changed after blur");
            return Ok(true);
        }
    }

    if actions::press_confirm(page, &mut out.trace).await? {
        if fingerprint_changed(page, before).await? {
            out.note("document changed after confirm key");
            return Ok(true);
        }
    }

    // explicit submit control scoped to submission vocabulary
    let submit = snap.elements.iter().find(|e| {
        e.is_clickable_control() && {
            let t = e.text.to_lowercase();
            SUBMIT_WORDS.iter().any(|w| t.contains(w))
        }
    });
    if let Some(el) = submit {
        if actions::resilient_click(page, &el.selector, &mut out.trace).await?
            && fingerprint_changed(page, before).await?
        {
            out.note("document changed after submit control");
            return Ok(true);
        }
    }

    for sel in ["button[type='submit']", "input[type='submit']"] {
        if let Ok(true) = page.try_click(sel).await {
            out.note(format!("generic submit control {sel}"));
            if fingerprint_changed(page, before).await? {
                return Ok(true);
            }
        }
    }

    // in-page form submission as the last resort
    let js = format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; \
         const form = el.form || el.closest('form'); if (!form) return false; \
         if (form.requestSubmit) form.requestSubmit(); else form.submit(); return true; }})()",
        serde_json::to_string(field_selector).unwrap_or_else(|_| "\"\"".into())
    );
    match page.evaluate::<bool>(&js).await {
        Ok(true) => {
            out.note("in-page form submit");
            if fingerprint_changed(page, before).await? {
                return Ok(true);
            }
        }
        Ok(false) => {}
        Err(e) if crate::is_session_closed(&e) => {
            return Err(Error::SessionClosed(e.to_string()))
        }
        Err(_) => {}
    }
    Ok(false)
}

async fn email(page: &Page, snap: &PageSnapshot, profile: &Profile) -> Result<ActionOutcome> {
    let mut out = ActionOutcome::new();

    let field = classify::email_field(snap).or_else(|| classify::email_like_field(snap));
    match field {
        None => {
            // nothing email-shaped after all; fall back to descriptor filling
            out.note("no email-like field found, falling back to generic fill");
            let fields = classify::text_entry_fields(snap);
            for f in &fields {
                let value = guess_value(f, &snap.text, profile);
                if actions::resilient_fill(page, &f.selector, &value, &mut out.trace).await? {
                    out.performed = true;
                }
            }
        }
        Some(f) => {
            let before = snap.fingerprint();
            if actions::resilient_fill(page, &f.selector, &profile.email, &mut out.trace).await? {
                out.performed = true;
            }
            if submit_email(page, snap, &f.selector, &before, &mut out).await? {
                out.performed = true;
            }
        }
    }

    // newsletters hide required consent checkboxes next to the email field
    let ticked = tick_consent_boxes(page).await?;
    if ticked > 0 {
        out.note(format!("ticked {ticked} consent checkbox(es)"));
        out.performed = true;
    }

    if cta::click_cta_strict(page, snap, &mut out.trace).await? {
        out.performed = true;
    }
    Ok(out)
}

/// Check every unchecked checkbox: wrapping label first, then the nearest
/// pointer-styled ancestor with a synthetic event, then the control itself.
const TICK_CONSENT_JS: &str = r#"
(() => {
    let ticked = 0;
    for (const box of document.querySelectorAll('input[type="checkbox"]')) {
        if (box.checked) continue;
        let lbl = box.closest('label');
        if (!lbl && box.id) lbl = document.querySelector('label[for=' + JSON.stringify(box.id) + ']');
        if (lbl) { lbl.click(); ticked++; continue; }
        let node = box.parentElement;
        let hit = false;
        for (let depth = 0; node && depth < 6; depth++) {
            if (getComputedStyle(node).cursor === 'pointer' || node.onclick) {
                node.dispatchEvent(new MouseEvent('click', { bubbles: true }));
                hit = true;
                ticked++;
                break;
            }
            node = node.parentElement;
        }
        if (!hit) {
            box.dispatchEvent(new MouseEvent('click', { bubbles: true }));
            ticked++;
        }
    }
    return ticked;
})()
"#;

async fn tick_consent_boxes(page: &Page) -> Result<u32> {
    match page.evaluate::<u32>(TICK_CONSENT_JS).await {
        Ok(n) => Ok(n),
        Err(e) if crate::is_session_closed(&e) => Err(Error::SessionClosed(e.to_string())),
        Err(_) => Ok(0),
    }
}

async fn info(page: &Page, snap: &PageSnapshot) -> Result<ActionOutcome> {
    let mut out = ActionOutcome::new();
    out.performed = cta::click_cta(page, snap, &mut out.trace).await?;
    if !out.performed {
        // any visible generic button beats standing still
        if let Some(el) = snap.elements.iter().find(|e| e.is_clickable_control()) {
            out.note(format!("falling back to first button \"{}\"", el.text.trim()));
            out.performed = actions::resilient_click(page, &el.selector, &mut out.trace).await?;
        }
    }
    Ok(out)
}

async fn other(page: &Page, snap: &PageSnapshot, cursor: &RotationCursor) -> Result<ActionOutcome> {
    let mut out = ActionOutcome::new();

    if cta::click_cta(page, snap, &mut out.trace).await? {
        out.performed = true;
        return Ok(out);
    }

    // possibly a misclassified question
    let buttons = classify::option_buttons(snap);
    if !buttons.is_empty() {
        out.note("no cta; trying option buttons");
        if pick_and_activate(page, &buttons, cursor, &mut out).await? {
            out.performed = true;
            return Ok(out);
        }
    }
    let cards = classify::option_cards(snap);
    if !cards.is_empty() {
        out.note("no cta; trying option cards");
        if pick_and_activate(page, &cards, cursor, &mut out).await? {
            out.performed = true;
            return Ok(out);
        }
    }

    for sel in OTHER_FALLBACK_SELECTORS {
        match page.try_click(sel).await {
            Ok(true) => {
                out.note(format!("structural fallback {sel}"));
                out.performed = true;
                return Ok(out);
            }
            Ok(false) => {}
            Err(e) if crate::is_session_closed(&e) => {
                return Err(Error::SessionClosed(e.to_string()))
            }
            Err(_) => {}
        }
    }
    out.note("nothing actionable found");
    Ok(out)
}
