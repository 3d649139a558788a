//! Screen classification — archetype detection over a page snapshot.
//!
//! The rules form a priority chain and the first match wins. Ordering is the
//! whole point: funnel screens are ambiguous from markup alone (a paywall can
//! carry a promo-code text field, an email screen can carry a stray name
//! field), so the chain commits to the strongest, most specific signal first.

use regex::Regex;
use std::fmt;

use crate::observe::{PageElement, PageSnapshot};

/// Structural role of one funnel screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Archetype {
    Question,
    Info,
    Input,
    Email,
    Paywall,
    Other,
}

impl Archetype {
    pub fn label(&self) -> &'static str {
        match self {
            Archetype::Question => "question",
            Archetype::Info => "info",
            Archetype::Input => "input",
            Archetype::Email => "email",
            Archetype::Paywall => "paywall",
            Archetype::Other => "other",
        }
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One classification verdict, produced fresh per step.
#[derive(Debug, Clone)]
pub struct Classification {
    pub archetype: Archetype,
    pub reason: String,
}

/// Controls that sell: a purchase/subscription call to action.
const PURCHASE_WORDS: &[&str] = &[
    "buy",
    "subscribe",
    "purchase",
    "checkout",
    "start trial",
    "start my trial",
    "start free trial",
    "get my plan",
    "get the plan",
    "get your plan",
    "claim offer",
    "claim discount",
    "upgrade",
    "order now",
    "pay now",
    "add to cart",
];

/// Subscription/billing vocabulary seen in paywall copy.
const BILLING_WORDS: &[&str] = &[
    "per month",
    "per week",
    "per year",
    "/mo",
    "/week",
    "/year",
    "billed",
    "billing",
    "subscription",
    "trial",
    "plan",
    "renews",
    "cancel anytime",
    "money-back",
    "money back",
];

/// Broad commerce vocabulary, weaker than billing terms.
const COMMERCE_WORDS: &[&str] = &[
    "price", "discount", "offer", "sale", "deal", "guarantee", "payment", "secure", "save",
];

/// Urgency/scarcity vocabulary typical of late-funnel offers.
const URGENCY_WORDS: &[&str] = &[
    "limited",
    "expires",
    "ends in",
    "last chance",
    "only today",
    "% off",
    "special offer",
    "hurry",
];

/// Descriptor hints marking a data-entry field's meaning.
const INPUT_HINT_WORDS: &[&str] = &["height", "weight", "age", "name"];

/// Navigational/consent button texts that never count as quiz options.
/// Matched against the entire trimmed text — a closed pattern, not substrings.
const NAV_WORDS: &[&str] = &[
    "back",
    "next",
    "continue",
    "skip",
    "close",
    "ok",
    "okay",
    "got it",
    "accept",
    "accept all",
    "agree",
    "i agree",
    "login",
    "log in",
    "sign in",
    "sign up",
    "menu",
    "settings",
    "privacy",
    "privacy policy",
    "terms",
    "terms of use",
    "learn more",
    "cancel",
    "submit",
    "start",
    "get started",
    "start quiz",
];

/// Language names recognized for the language-switcher exclusion.
const LANGUAGE_NAMES: &[&str] = &[
    "english",
    "español",
    "spanish",
    "deutsch",
    "german",
    "français",
    "french",
    "italiano",
    "italian",
    "português",
    "portuguese",
    "polski",
    "polish",
    "nederlands",
    "dutch",
    "русский",
    "russian",
    "türkçe",
    "turkish",
    "svenska",
    "norsk",
    "dansk",
    "suomi",
    "čeština",
    "magyar",
    "română",
    "українська",
    "日本語",
    "한국어",
    "中文",
];

/// Minimum rendered box for a pointer-styled "card" option.
const CARD_MIN_WIDTH: f64 = 40.0;
const CARD_MIN_HEIGHT: f64 = 30.0;

fn contains_any(haystack: &str, words: &[&str]) -> bool {
    words.iter().any(|w| haystack.contains(w))
}

fn is_nav_text(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    NAV_WORDS.iter().any(|w| t == *w) || t.starts_with("continue with")
}

fn is_language_name(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    LANGUAGE_NAMES.iter().any(|w| t == *w)
}

// =============================================================================
// Candidate extraction — shared between the classifier and the dispatcher
// =============================================================================

/// Radio/checkbox option controls, native or ARIA.
pub fn option_controls(snap: &PageSnapshot) -> Vec<&PageElement> {
    snap.elements.iter().filter(|e| e.is_option_control()).collect()
}

/// Short-text clickable controls that plausibly are answer options.
/// Navigational/consent buttons are excluded by a closed text pattern, and a
/// cluster of four or more language names is treated as a language switcher
/// and dropped entirely.
pub fn option_buttons(snap: &PageSnapshot) -> Vec<&PageElement> {
    let candidates: Vec<&PageElement> = snap
        .elements
        .iter()
        .filter(|e| e.is_clickable_control())
        .filter(|e| e.short_text().is_some())
        .filter(|e| !is_nav_text(&e.text))
        .collect();

    let language_count = candidates
        .iter()
        .filter(|e| is_language_name(&e.text))
        .count();
    if language_count >= 4 {
        return candidates
            .into_iter()
            .filter(|e| !is_language_name(&e.text))
            .collect();
    }
    candidates
}

/// Pointer-styled non-control "cards": short own text and a real rendered box.
pub fn option_cards(snap: &PageSnapshot) -> Vec<&PageElement> {
    snap.elements
        .iter()
        .filter(|e| e.pointer)
        .filter(|e| !e.is_clickable_control() && !e.is_form_control())
        .filter(|e| e.short_text().is_some())
        .filter(|e| e.bbox.width >= CARD_MIN_WIDTH && e.bbox.height >= CARD_MIN_HEIGHT)
        .collect()
}

/// Visible free-text/numeric entry fields.
pub fn text_entry_fields(snap: &PageSnapshot) -> Vec<&PageElement> {
    snap.elements.iter().filter(|e| e.is_text_entry()).collect()
}

/// The email-typed input, if any.
pub fn email_field(snap: &PageSnapshot) -> Option<&PageElement> {
    snap.elements.iter().find(|e| e.is_email_input())
}

/// Strongest email-flavored text input: descriptor mentions mail.
pub fn email_like_field(snap: &PageSnapshot) -> Option<&PageElement> {
    snap.elements
        .iter()
        .find(|e| e.is_text_entry() && e.descriptor().contains("mail"))
}

/// Clickable controls carrying purchase/subscription vocabulary.
pub fn purchase_controls(snap: &PageSnapshot) -> Vec<&PageElement> {
    snap.elements
        .iter()
        .filter(|e| e.is_clickable_control() || e.pointer)
        .filter(|e| {
            let t = e.text.to_lowercase();
            !t.is_empty() && contains_any(&t, PURCHASE_WORDS)
        })
        .collect()
}

// =============================================================================
// Classifier
// =============================================================================

/// Heuristic archetype detector. Read-only over the snapshot, deterministic
/// for identical document state.
pub struct Classifier {
    price: Regex,
}

impl Classifier {
    pub fn new() -> Self {
        // currency symbol or ISO code followed by an amount
        let price = Regex::new(r"(?i)(?:[$€£¥₹]|\b(?:usd|eur|gbp|cad|aud)\b)\s?\d+(?:[.,]\d{1,2})?")
            .expect("price pattern compiles");
        Self { price }
    }

    /// First matching rule wins; the order encodes precedence.
    pub fn classify(&self, snap: &PageSnapshot, step: u32) -> Classification {
        // 1. Paywall is gated past the first screen: funnels rarely open
        //    with an offer and first-paint false positives are costly.
        if step > 1 {
            if let Some(reason) = self.paywall(snap, step) {
                return Classification {
                    archetype: Archetype::Paywall,
                    reason,
                };
            }
        }
        // 2. Email before the generic input rule: a stray text field next to
        //    an email capture must not demote the screen to plain data entry.
        if let Some(reason) = email_screen(snap) {
            return Classification {
                archetype: Archetype::Email,
                reason,
            };
        }
        // 3. Input, only when no choice controls are present.
        if let Some(reason) = input_screen(snap) {
            return Classification {
                archetype: Archetype::Input,
                reason,
            };
        }
        // 4. Question: radios, then option buttons, then cards.
        if let Some(reason) = question_screen(snap) {
            return Classification {
                archetype: Archetype::Question,
                reason,
            };
        }
        // 5. Info: a single call to action over real copy.
        if let Some(reason) = info_screen(snap) {
            return Classification {
                archetype: Archetype::Info,
                reason,
            };
        }
        Classification {
            archetype: Archetype::Other,
            reason: "no rule matched".into(),
        }
    }

    /// Staged thresholds: the deeper the funnel, the fewer corroborating
    /// signals a sell screen needs.
    fn paywall(&self, snap: &PageSnapshot, step: u32) -> Option<String> {
        let text = snap.text.to_lowercase();
        let price_hits = self.price.find_iter(&snap.text).count();
        let purchase = purchase_controls(snap).len();
        let billing = contains_any(&text, BILLING_WORDS);
        let commerce = contains_any(&text, COMMERCE_WORDS);
        let urgency = contains_any(&text, URGENCY_WORDS);

        if purchase >= 1 && (price_hits >= 2 || (price_hits >= 1 && billing)) {
            return Some(format!(
                "{purchase} purchase control(s) with {price_hits} price token(s){}",
                if billing { " and billing vocabulary" } else { "" }
            ));
        }
        if step >= 10 && price_hits >= 1 && purchase >= 1 && commerce {
            return Some(format!(
                "step {step}: price token, purchase control and commerce vocabulary"
            ));
        }
        if step >= 15 && price_hits >= 1 && urgency {
            return Some(format!("step {step}: price token with urgency vocabulary"));
        }
        if step >= 20 && purchase >= 1 && billing {
            return Some(format!(
                "step {step}: purchase control with subscription vocabulary, no price required"
            ));
        }
        None
    }

    /// Distinct price tokens in document order, for paywall diagnostics.
    pub fn price_tokens(&self, text: &str) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();
        for m in self.price.find_iter(text) {
            let tok = m.as_str().trim().to_string();
            if !tokens.contains(&tok) {
                tokens.push(tok);
            }
        }
        tokens
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

fn email_screen(snap: &PageSnapshot) -> Option<String> {
    if email_field(snap).is_some() {
        return Some("email-typed input present".into());
    }
    if let Some(el) = email_like_field(snap) {
        return Some(format!(
            "input descriptor \"{}\" looks like email capture",
            el.descriptor()
        ));
    }
    None
}

fn input_screen(snap: &PageSnapshot) -> Option<String> {
    // radio/checkbox presence always defers to the question rule
    if !option_controls(snap).is_empty() {
        return None;
    }
    let fields = text_entry_fields(snap);
    if !fields.is_empty() {
        return Some(format!(
            "{} free-text field(s), no choice controls",
            fields.len()
        ));
    }
    // descriptor hints can rescue inputs of unknown type
    let hinted = snap.elements.iter().find(|e| {
        e.is_form_control() && contains_any(&e.descriptor(), INPUT_HINT_WORDS)
    })?;
    Some(format!(
        "field descriptor \"{}\" suggests data entry",
        hinted.descriptor()
    ))
}

fn question_screen(snap: &PageSnapshot) -> Option<String> {
    let radios = option_controls(snap);
    if radios.len() >= 2 {
        return Some(format!("{} radio/checkbox option(s)", radios.len()));
    }
    let buttons = option_buttons(snap);
    if buttons.len() >= 2 {
        return Some(format!("{} short-text option button(s)", buttons.len()));
    }
    let cards = option_cards(snap);
    if cards.len() >= 2 {
        return Some(format!("{} pointer-styled option card(s)", cards.len()));
    }
    None
}

fn info_screen(snap: &PageSnapshot) -> Option<String> {
    let inputs = snap.elements.iter().filter(|e| e.is_form_control()).count();
    if inputs > 0 || !option_controls(snap).is_empty() {
        return None;
    }
    let ctas = snap
        .elements
        .iter()
        .filter(|e| e.is_clickable_control() && crate::actions::cta::is_cta_text(&e.text))
        .count();
    if ctas == 1 && snap.text.trim().len() > 20 {
        return Some("single call to action over body copy".into());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use eoka::BoundingBox;

    fn elem(tag: &str, text: &str) -> PageElement {
        PageElement {
            tag: tag.into(),
            role: None,
            text: text.into(),
            placeholder: None,
            name: None,
            id: None,
            aria_label: None,
            autocomplete: None,
            input_type: if tag == "input" {
                Some("text".into())
            } else {
                None
            },
            selector: format!("{tag}:nth-of-type(1)"),
            checked: false,
            pointer: false,
            has_onclick: false,
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 160.0,
                height: 44.0,
            },
        }
    }

    fn input(input_type: &str) -> PageElement {
        let mut el = elem("input", "");
        el.input_type = Some(input_type.into());
        el
    }

    fn button(text: &str) -> PageElement {
        elem("button", text)
    }

    fn card(text: &str) -> PageElement {
        let mut el = elem("div", text);
        el.pointer = true;
        el
    }

    fn snap(text: &str, elements: Vec<PageElement>) -> PageSnapshot {
        PageSnapshot {
            url: "https://funnel.example/quiz".into(),
            text: text.into(),
            html_len: 4096,
            html_prefix: "<html><head><title>quiz</title>".into(),
            elements,
        }
    }

    #[test]
    fn test_paywall_beats_email() {
        // satisfies both the paywall and email predicates at step > 1
        let s = snap(
            "Your plan is ready! $19.99 per month or $99.99 per year. Cancel anytime.",
            vec![input("email"), button("Subscribe")],
        );
        let c = Classifier::new().classify(&s, 5);
        assert_eq!(c.archetype, Archetype::Paywall);
    }

    #[test]
    fn test_radio_dominance_over_input() {
        let s = snap(
            "Tell us about yourself",
            vec![
                input("radio"),
                input("radio"),
                input("text"),
                input("text"),
            ],
        );
        let c = Classifier::new().classify(&s, 3);
        assert_eq!(c.archetype, Archetype::Question);
    }

    #[test]
    fn test_first_step_never_paywall() {
        // every paywall predicate holds, but step = 1
        let s = snap(
            "$19.99 per month, $99.99 per year, billed today",
            vec![button("Subscribe")],
        );
        let c = Classifier::new().classify(&s, 1);
        assert_eq!(c.archetype, Archetype::Other);
    }

    #[test]
    fn test_immediate_paywall_scenario() {
        let s = snap("$49 Subscribe Now", vec![button("Subscribe Now")]);
        let c = Classifier::new().classify(&s, 1);
        assert_eq!(c.archetype, Archetype::Other);
    }

    #[test]
    fn test_email_with_stray_text_field() {
        let s = snap(
            "Where should we send your results?",
            vec![input("email"), input("text")],
        );
        let c = Classifier::new().classify(&s, 4);
        assert_eq!(c.archetype, Archetype::Email);
    }

    #[test]
    fn test_email_by_descriptor() {
        let mut field = input("text");
        field.placeholder = Some("Enter your e-mail".into());
        let s = snap("Get your plan by mail", vec![field]);
        let c = Classifier::new().classify(&s, 4);
        assert_eq!(c.archetype, Archetype::Email);
    }

    #[test]
    fn test_two_option_question_without_radios() {
        let s = snap(
            "What is your gender?",
            vec![button("Male"), button("Female")],
        );
        let c = Classifier::new().classify(&s, 2);
        assert_eq!(c.archetype, Archetype::Question);
        assert!(c.reason.contains("button"));
    }

    #[test]
    fn test_card_question() {
        let s = snap(
            "Pick your main goal",
            vec![card("Lose weight"), card("Build muscle"), card("Get toned")],
        );
        let c = Classifier::new().classify(&s, 2);
        assert_eq!(c.archetype, Archetype::Question);
        assert!(c.reason.contains("card"));
    }

    #[test]
    fn test_tiny_cards_do_not_count() {
        let mut a = card("A");
        let mut b = card("B");
        a.bbox.height = 10.0;
        b.bbox.height = 10.0;
        let s = snap("decorations", vec![a, b]);
        let c = Classifier::new().classify(&s, 2);
        assert_ne!(c.archetype, Archetype::Question);
    }

    #[test]
    fn test_deep_funnel_soft_paywall() {
        // no price token at all; step >= 20 rule keys on the purchase control
        // plus subscription vocabulary
        let s = snap("Choose your plan", vec![button("Start Trial")]);
        let c = Classifier::new().classify(&s, 22);
        assert_eq!(c.archetype, Archetype::Paywall);
    }

    #[test]
    fn test_mid_funnel_commerce_paywall() {
        let s = snap(
            "Special price today: $29. 100% money guarantee on every payment.",
            vec![button("Buy now")],
        );
        let c = Classifier::new().classify(&s, 10);
        assert_eq!(c.archetype, Archetype::Paywall);
        // the same page two steps earlier lacks the depth for rule (b) and
        // only carries one price token, so it falls through
        let c = Classifier::new().classify(&s, 9);
        assert_ne!(c.archetype, Archetype::Paywall);
    }

    #[test]
    fn test_urgency_paywall_needs_depth() {
        let s = snap("Offer expires in 10:00 — only $5 today!", vec![button("Continue")]);
        assert_eq!(Classifier::new().classify(&s, 15).archetype, Archetype::Paywall);
        assert_ne!(Classifier::new().classify(&s, 14).archetype, Archetype::Paywall);
    }

    #[test]
    fn test_language_switcher_is_not_a_question() {
        let s = snap(
            "quiz",
            vec![
                button("English"),
                button("Deutsch"),
                button("Français"),
                button("Español"),
                button("Italiano"),
            ],
        );
        let c = Classifier::new().classify(&s, 2);
        assert_ne!(c.archetype, Archetype::Question);
    }

    #[test]
    fn test_nav_buttons_are_not_options() {
        let s = snap(
            "Here is why this quiz works: we ask, you answer, science happens.",
            vec![button("Back"), button("Continue")],
        );
        let c = Classifier::new().classify(&s, 2);
        // "Back"/"Continue" are navigation; the lone CTA makes this info
        assert_eq!(c.archetype, Archetype::Info);
    }

    #[test]
    fn test_input_screen() {
        let mut height = input("number");
        height.placeholder = Some("Height (cm)".into());
        let s = snap("How tall are you?", vec![height, button("Continue")]);
        let c = Classifier::new().classify(&s, 3);
        assert_eq!(c.archetype, Archetype::Input);
    }

    #[test]
    fn test_info_needs_body_copy() {
        let s = snap("short", vec![button("Continue")]);
        let c = Classifier::new().classify(&s, 3);
        assert_eq!(c.archetype, Archetype::Other);
    }

    #[test]
    fn test_price_tokens_distinct_in_order() {
        let cl = Classifier::new();
        let tokens = cl.price_tokens("was $99.99, now $49.99 — yes, $49.99!");
        assert_eq!(tokens, vec!["$99.99", "$49.99"]);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let s = snap(
            "What is your gender?",
            vec![button("Male"), button("Female")],
        );
        let cl = Classifier::new();
        let a = cl.classify(&s, 2);
        let b = cl.classify(&s, 2);
        assert_eq!(a.archetype, b.archetype);
        assert_eq!(a.reason, b.reason);
    }
}
