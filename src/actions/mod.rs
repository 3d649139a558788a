//! Shared interaction primitives.
//!
//! Every primitive is an ordered list of strategies executed until one
//! applies. A strategy reports a tri-state [`StrategyOutcome`] instead of
//! throwing: transient browser failures degrade to `Failed` and the chain
//! moves on, while a dead session is the one error allowed to escape.

pub mod cta;
pub mod select;

pub use select::RotationCursor;

use eoka::Page;

use crate::{Error, Result};

/// What the dispatcher did on one screen.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    /// Whether any meaningful action was performed.
    pub performed: bool,
    /// Ordered audit trail of what was attempted.
    pub trace: Vec<String>,
}

impl ActionOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note(&mut self, line: impl Into<String>) {
        self.trace.push(line.into());
    }
}

/// Result of one strategy attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// The strategy did its thing.
    Applied,
    /// Preconditions absent (e.g. element gone); try the next strategy only
    /// if it could still apply.
    NotApplicable,
    /// The attempt ran and failed; the chain continues.
    Failed(String),
}

/// Absorb a browser error into a failed strategy, unless the session itself
/// is gone — that one aborts the run.
fn absorb(err: eoka::Error, what: &str) -> Result<StrategyOutcome> {
    if crate::is_session_closed(&err) {
        Err(Error::SessionClosed(err.to_string()))
    } else {
        Ok(StrategyOutcome::Failed(format!("{what}: {err}")))
    }
}

fn js_quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into())
}

#[derive(Debug, Clone, Copy)]
enum ClickStrategy {
    /// Driver-level click with actionability checks.
    Native,
    /// Direct element invocation in page, bypassing occlusion checks.
    ScriptInvoke,
    /// Synthetic bubbling MouseEvent as the last resort.
    SyntheticEvent,
}

impl ClickStrategy {
    fn name(&self) -> &'static str {
        match self {
            ClickStrategy::Native => "native",
            ClickStrategy::ScriptInvoke => "script",
            ClickStrategy::SyntheticEvent => "synthetic",
        }
    }
}

const CLICK_CHAIN: &[ClickStrategy] = &[
    ClickStrategy::Native,
    ClickStrategy::ScriptInvoke,
    ClickStrategy::SyntheticEvent,
];

async fn apply_click(page: &Page, selector: &str, strategy: ClickStrategy) -> Result<StrategyOutcome> {
    match strategy {
        ClickStrategy::Native => match page.click(selector).await {
            Ok(()) => Ok(StrategyOutcome::Applied),
            Err(e) => absorb(e, "click"),
        },
        ClickStrategy::ScriptInvoke => {
            let js = format!(
                "(() => {{ const el = document.querySelector({sel}); if (!el) return false; el.click(); return true; }})()",
                sel = js_quote(selector)
            );
            match page.evaluate::<bool>(&js).await {
                Ok(true) => Ok(StrategyOutcome::Applied),
                Ok(false) => Ok(StrategyOutcome::NotApplicable),
                Err(e) => absorb(e, "script click"),
            }
        }
        ClickStrategy::SyntheticEvent => {
            let js = format!(
                "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
                 el.dispatchEvent(new MouseEvent('click', {{ bubbles: true, cancelable: true }})); return true; }})()",
                sel = js_quote(selector)
            );
            match page.evaluate::<bool>(&js).await {
                Ok(true) => Ok(StrategyOutcome::Applied),
                Ok(false) => Ok(StrategyOutcome::NotApplicable),
                Err(e) => absorb(e, "synthetic click"),
            }
        }
    }
}

/// Click escalation chain. Returns whether any strategy applied.
pub async fn resilient_click(page: &Page, selector: &str, trace: &mut Vec<String>) -> Result<bool> {
    for strategy in CLICK_CHAIN {
        match apply_click(page, selector, *strategy).await? {
            StrategyOutcome::Applied => {
                trace.push(format!("click[{}] {selector}", strategy.name()));
                return Ok(true);
            }
            StrategyOutcome::NotApplicable => {
                trace.push(format!("click[{}] {selector}: no element", strategy.name()));
                // the element is gone; later strategies cannot find it either
                return Ok(false);
            }
            StrategyOutcome::Failed(why) => {
                trace.push(format!("click[{}] {selector}: {why}", strategy.name()));
            }
        }
    }
    Ok(false)
}

/// Force a value through the platform's native property setter and fire the
/// change-detection events reactive front-ends listen for. Plain programmatic
/// assignment is invisible to them.
const FORCE_VALUE_JS: &str = r#"
(() => {
    const el = document.querySelector(__SEL__);
    if (!el) return false;
    const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
    const desc = Object.getOwnPropertyDescriptor(proto, 'value');
    if (desc && desc.set) { desc.set.call(el, __VAL__); } else { el.value = __VAL__; }
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return true;
})()
"#;

/// Fill escalation: focus + keystroke fill, then always force the value with
/// native-setter event dispatch on top.
pub async fn resilient_fill(
    page: &Page,
    selector: &str,
    value: &str,
    trace: &mut Vec<String>,
) -> Result<bool> {
    let mut ok = false;

    // focus first; failures here are unimportant
    if let Err(e) = page.click(selector).await {
        if crate::is_session_closed(&e) {
            return Err(Error::SessionClosed(e.to_string()));
        }
    }
    match page.fill(selector, value).await {
        Ok(()) => {
            trace.push(format!("fill[keys] {selector} = \"{value}\""));
            ok = true;
        }
        Err(e) => match absorb(e, "fill")? {
            StrategyOutcome::Failed(why) => trace.push(format!("fill[keys] {selector}: {why}")),
            _ => {}
        },
    }

    let js = FORCE_VALUE_JS
        .replace("__SEL__", &js_quote(selector))
        .replace("__VAL__", &js_quote(value));
    match page.evaluate::<bool>(&js).await {
        Ok(true) => {
            trace.push(format!("fill[native-setter] {selector}"));
            ok = true;
        }
        Ok(false) => trace.push(format!("fill[native-setter] {selector}: no element")),
        Err(e) => match absorb(e, "native setter")? {
            StrategyOutcome::Failed(why) => {
                trace.push(format!("fill[native-setter] {selector}: {why}"))
            }
            _ => {}
        },
    }
    Ok(ok)
}

/// Re-fire input/change on an already-filled field (used when a submit
/// control stays disabled because the framework missed the edit).
pub async fn dispatch_field_events(
    page: &Page,
    selector: &str,
    trace: &mut Vec<String>,
) -> Result<()> {
    let js = format!(
        "(() => {{ const el = document.querySelector({sel}); if (!el) return false; \
         el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
         el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
        sel = js_quote(selector)
    );
    match page.evaluate::<bool>(&js).await {
        Ok(true) => trace.push(format!("re-fired input/change on {selector}")),
        Ok(false) => {}
        Err(e) => {
            absorb(e, "field events")?;
        }
    }
    Ok(())
}

/// Bounded upward walk from an element to the nearest thing that looks
/// clickable (pointer styling, click handler, or a label), then click it.
const ANCESTOR_CLICK_JS: &str = r#"
(() => {
    let node = document.querySelector(__SEL__);
    if (!node) return false;
    for (let depth = 0; node && depth < 6; depth++) {
        const style = getComputedStyle(node);
        if (style.cursor === 'pointer' || node.onclick || node.tagName === 'LABEL') {
            node.click();
            return true;
        }
        node = node.parentElement;
    }
    return false;
})()
"#;

/// Click the nearest clickable ancestor of `selector` (depth-capped walk).
pub async fn click_clickable_ancestor(
    page: &Page,
    selector: &str,
    trace: &mut Vec<String>,
) -> Result<bool> {
    let js = ANCESTOR_CLICK_JS.replace("__SEL__", &js_quote(selector));
    match page.evaluate::<bool>(&js).await {
        Ok(true) => {
            trace.push(format!("clickable-ancestor {selector}"));
            Ok(true)
        }
        Ok(false) => Ok(false),
        Err(e) => match absorb(e, "ancestor walk")? {
            StrategyOutcome::Failed(why) => {
                trace.push(format!("clickable-ancestor {selector}: {why}"));
                Ok(false)
            }
            _ => Ok(false),
        },
    }
}

/// Send the default confirm key.
pub async fn press_confirm(page: &Page, trace: &mut Vec<String>) -> Result<bool> {
    match page.human().press_key("Enter").await {
        Ok(_) => {
            trace.push("confirm key (Enter)".into());
            Ok(true)
        }
        Err(e) => match absorb(e, "confirm key")? {
            StrategyOutcome::Failed(why) => {
                trace.push(format!("confirm key: {why}"));
                Ok(false)
            }
            _ => Ok(false),
        },
    }
}
