//! Page snapshot — one JS round trip harvests everything classification needs.
//!
//! The snapshot is immutable and carries no handles back into the browser, so
//! the classifier stays pure and unit-testable against hand-built snapshots.

use eoka::{BoundingBox, Page};
use serde::Deserialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::{Error, Result};

/// One visible element harvested from the page.
#[derive(Debug, Clone)]
pub struct PageElement {
    /// Lowercase HTML tag name.
    pub tag: String,
    /// ARIA role if set.
    pub role: Option<String>,
    /// Visible text (label text for form controls), whitespace-collapsed.
    pub text: String,
    pub placeholder: Option<String>,
    pub name: Option<String>,
    pub id: Option<String>,
    pub aria_label: Option<String>,
    pub autocomplete: Option<String>,
    /// Input type for `<input>`/`<select>`/`<textarea>`, else None.
    pub input_type: Option<String>,
    /// Unique CSS selector, usable for later interaction.
    pub selector: String,
    /// Checked state (radio/checkbox, native or aria-checked).
    pub checked: bool,
    /// Computed `cursor: pointer` styling.
    pub pointer: bool,
    /// Has an onclick handler attribute or property.
    pub has_onclick: bool,
    /// Bounding box in viewport coordinates.
    pub bbox: BoundingBox,
}

impl PageElement {
    /// Accessible descriptor: everything a funnel author might use to hint at
    /// the field's meaning, joined and lowercased.
    pub fn descriptor(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for p in [
            &self.placeholder,
            &self.name,
            &self.id,
            &self.aria_label,
            &self.autocomplete,
        ]
        .into_iter()
        .flatten()
        {
            parts.push(p);
        }
        parts.join(" ").to_lowercase()
    }

    pub fn is_form_control(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "select" | "textarea")
    }

    /// A free-text or numeric entry field.
    pub fn is_text_entry(&self) -> bool {
        match self.input_type.as_deref() {
            Some("text") | Some("number") | Some("tel") | Some("search") | Some("textarea") => {
                true
            }
            _ => false,
        }
    }

    pub fn is_email_input(&self) -> bool {
        self.input_type.as_deref() == Some("email")
    }

    pub fn is_radio_like(&self) -> bool {
        self.input_type.as_deref() == Some("radio") || self.role.as_deref() == Some("radio")
    }

    pub fn is_checkbox_like(&self) -> bool {
        self.input_type.as_deref() == Some("checkbox")
            || self.role.as_deref() == Some("checkbox")
    }

    /// Radio or checkbox, native or ARIA.
    pub fn is_option_control(&self) -> bool {
        self.is_radio_like() || self.is_checkbox_like()
    }

    /// Button-shaped clickable: button, link, role=button, submit input.
    pub fn is_clickable_control(&self) -> bool {
        matches!(self.tag.as_str(), "button" | "a")
            || self.role.as_deref() == Some("button")
            || matches!(self.input_type.as_deref(), Some("submit") | Some("button"))
    }

    /// Trimmed text if it is in the short-label range (1–59 chars).
    pub fn short_text(&self) -> Option<&str> {
        let t = self.text.trim();
        if t.is_empty() || t.len() > 59 {
            None
        } else {
            Some(t)
        }
    }
}

/// Read-only view of one document state.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    /// Current address.
    pub url: String,
    /// Visible body text, whitespace-collapsed, bounded.
    pub text: String,
    /// Length of the whitespace-normalized markup.
    pub html_len: u64,
    /// Leading slice of the normalized markup.
    pub html_prefix: String,
    /// Visible elements, document order.
    pub elements: Vec<PageElement>,
}

impl PageSnapshot {
    /// Cheap equality key for stagnation detection. Approximate by design:
    /// equal fingerprints are treated as "the page did not change".
    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.url, self.html_len, &self.html_prefix)
    }
}

/// Fingerprint = address + normalized markup length + markup-prefix hash.
pub fn fingerprint_of(url: &str, html_len: u64, html_prefix: &str) -> String {
    let mut hasher = DefaultHasher::new();
    html_prefix.hash(&mut hasher);
    format!("{}::{}::{:x}", url, html_len, hasher.finish())
}

#[derive(Deserialize)]
struct RawSnapshot {
    url: String,
    text: String,
    len: u64,
    prefix: String,
    elements: Vec<RawElement>,
}

#[derive(Deserialize)]
struct RawElement {
    tag: String,
    role: Option<String>,
    text: String,
    placeholder: Option<String>,
    name: Option<String>,
    id: Option<String>,
    aria_label: Option<String>,
    autocomplete: Option<String>,
    input_type: Option<String>,
    selector: String,
    checked: bool,
    pointer: bool,
    has_onclick: bool,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// JavaScript that harvests visible elements plus the page-level fingerprint
/// ingredients in a single evaluation.
const SNAPSHOT_JS: &str = r#"
(() => {
    const INTERACTIVE = 'a, button, input, select, textarea, [role="button"], [role="link"], [role="radio"], [role="checkbox"], [role="tab"], [onclick]';
    const elements = [];
    const seen = new Set();
    const pushedNodes = [];

    function isVisible(rect, style) {
        if (rect.width < 2 || rect.height < 2) return false;
        if (style.display === 'none' || style.visibility === 'hidden') return false;
        if (parseFloat(style.opacity) < 0.1) return false;
        return true;
    }

    function labelFor(el) {
        if (el.id) {
            const lbl = document.querySelector('label[for=' + JSON.stringify(el.id) + ']');
            if (lbl) return lbl.textContent.trim();
        }
        const wrap = el.closest('label');
        if (wrap) {
            const clone = wrap.cloneNode(true);
            clone.querySelectorAll('input, select, textarea').forEach(c => c.remove());
            const t = clone.textContent.trim();
            if (t) return t;
        }
        return '';
    }

    function selectorFor(el, tag, inputType, placeholder, ariaLabel) {
        if (el.id) return '#' + CSS.escape(el.id);
        const isFormEl = tag === 'input' || tag === 'select' || tag === 'textarea';
        if (isFormEl && el.name) {
            if ((inputType === 'radio' || inputType === 'checkbox') && el.value) {
                return tag + '[name=' + JSON.stringify(el.name) + '][value=' + JSON.stringify(el.value) + ']';
            }
            return tag + '[name=' + JSON.stringify(el.name) + ']';
        }
        if (ariaLabel) return tag + '[aria-label=' + JSON.stringify(ariaLabel) + ']';
        if (tag === 'input' && inputType && placeholder) {
            return 'input[type=' + JSON.stringify(inputType) + '][placeholder=' + JSON.stringify(placeholder) + ']';
        }
        if (el.getAttribute('data-testid')) {
            return '[data-testid=' + JSON.stringify(el.getAttribute('data-testid')) + ']';
        }
        const parts = [];
        let node = el;
        while (node && node !== document.body && parts.length < 5) {
            let s = node.tagName.toLowerCase();
            if (node.id) { parts.unshift('#' + CSS.escape(node.id)); break; }
            const parent = node.parentElement;
            if (parent) {
                const sibs = Array.from(parent.children).filter(c => c.tagName === node.tagName);
                if (sibs.length > 1) s += ':nth-of-type(' + (sibs.indexOf(node) + 1) + ')';
            }
            parts.unshift(s);
            node = parent;
        }
        return parts.join(' > ');
    }

    function push(el, asPointerCard) {
        const rect = el.getBoundingClientRect();
        const style = getComputedStyle(el);
        if (!isVisible(rect, style)) return;

        const tag = el.tagName.toLowerCase();
        const isFormEl = tag === 'input' || tag === 'select' || tag === 'textarea';
        const inputType = el.getAttribute('type') || '';

        let text = '';
        if (isFormEl) {
            text = labelFor(el);
        } else {
            text = (el.textContent || '').trim().replace(/\s+/g, ' ');
        }
        if (text.length > 90) text = text.substring(0, 87) + '...';

        const placeholder = el.getAttribute('placeholder') || '';
        const ariaLabel = el.getAttribute('aria-label') || '';
        const selector = selectorFor(el, tag, inputType, placeholder, ariaLabel);
        if (seen.has(selector)) return;
        seen.add(selector);
        pushedNodes.push(el);

        elements.push({
            tag,
            role: el.getAttribute('role') || null,
            text,
            placeholder: placeholder || null,
            name: el.getAttribute('name') || null,
            id: el.id || null,
            aria_label: ariaLabel || null,
            autocomplete: el.getAttribute('autocomplete') || null,
            input_type: tag === 'input' ? (inputType || 'text')
                : (tag === 'select' ? 'select' : (tag === 'textarea' ? 'textarea' : null)),
            selector,
            checked: !!el.checked || el.getAttribute('aria-checked') === 'true',
            pointer: asPointerCard || style.cursor === 'pointer',
            has_onclick: !!(el.onclick || el.getAttribute('onclick')),
            x: Math.round(rect.x),
            y: Math.round(rect.y),
            width: Math.round(rect.width),
            height: Math.round(rect.height),
        });
    }

    for (const node of document.querySelectorAll('*')) {
        if (node.matches(INTERACTIVE)) { push(node, false); continue; }
        // pointer-styled tiles: funnel option "cards" that are plain divs
        if (getComputedStyle(node).cursor !== 'pointer') continue;
        if (node.closest('a, button')) continue;
        if (pushedNodes.some(p => p.contains(node))) continue;
        const own = (node.textContent || '').trim();
        if (!own || own.length > 90) continue;
        push(node, true);
    }

    const html = document.documentElement ? document.documentElement.outerHTML : '';
    const norm = html.replace(/\s+/g, ' ');
    const body = document.body ? (document.body.innerText || '') : '';
    return JSON.stringify({
        url: location.href,
        text: body.trim().replace(/\s+/g, ' ').substring(0, 20000),
        len: norm.length,
        prefix: norm.substring(0, 180),
        elements,
    });
})()
"#;

/// Fingerprint ingredients only — used for cheap mid-step re-checks.
const FINGERPRINT_JS: &str = r#"
(() => {
    const html = document.documentElement ? document.documentElement.outerHTML : '';
    const norm = html.replace(/\s+/g, ' ');
    return JSON.stringify({ url: location.href, len: norm.length, prefix: norm.substring(0, 180) });
})()
"#;

#[derive(Deserialize)]
struct RawFingerprint {
    url: String,
    len: u64,
    prefix: String,
}

/// Take a full snapshot of the current document state.
pub async fn snapshot(page: &Page) -> Result<PageSnapshot> {
    let json_str: String = page
        .evaluate(SNAPSHOT_JS)
        .await
        .map_err(Error::from_browser)?;
    let raw: RawSnapshot = serde_json::from_str(&json_str)?;

    Ok(PageSnapshot {
        url: raw.url,
        text: raw.text,
        html_len: raw.len,
        html_prefix: raw.prefix,
        elements: raw
            .elements
            .into_iter()
            .map(|r| PageElement {
                tag: r.tag,
                role: r.role,
                text: r.text,
                placeholder: r.placeholder,
                name: r.name,
                id: r.id,
                aria_label: r.aria_label,
                autocomplete: r.autocomplete,
                input_type: r.input_type,
                selector: r.selector,
                checked: r.checked,
                pointer: r.pointer,
                has_onclick: r.has_onclick,
                bbox: BoundingBox {
                    x: r.x,
                    y: r.y,
                    width: r.width,
                    height: r.height,
                },
            })
            .collect(),
    })
}

/// Compute the current document fingerprint without a full harvest.
pub async fn fingerprint(page: &Page) -> Result<String> {
    let json_str: String = page
        .evaluate(FINGERPRINT_JS)
        .await
        .map_err(Error::from_browser)?;
    let raw: RawFingerprint = serde_json::from_str(&json_str)?;
    Ok(fingerprint_of(&raw.url, raw.len, &raw.prefix))
}
