//! The funnel driver loop: classify → act → wait-for-change → re-classify,
//! bounded by step and wall-clock budgets.

use std::fmt;
use std::time::{Duration, Instant};

use eoka::{Browser, Page};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::actions::RotationCursor;
use crate::classify::{Archetype, Classifier};
use crate::config::Config;
use crate::dispatch;
use crate::evidence::EvidenceSink;
use crate::observe;
use crate::popups;
use crate::{Error, Result};

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The paywall was reached — the success condition.
    PaywallReached,
    /// Step budget exhausted.
    StepBudget,
    /// Wall-clock budget exhausted.
    TimeBudget,
    /// Fingerprint repetition corroborated by no-action steps.
    NoProgress,
    /// Too many consecutive steps without a performed action.
    NoAction,
    /// The browser session disappeared mid-run.
    SessionClosed,
    /// Initial navigation failed even after the lenient retry.
    NavigationFailed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::PaywallReached => "paywall_reached",
            StopReason::StepBudget => "step_budget",
            StopReason::TimeBudget => "time_budget",
            StopReason::NoProgress => "no_progress",
            StopReason::NoAction => "no_action",
            StopReason::SessionClosed => "session_closed",
            StopReason::NavigationFailed => "navigation_failed",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one funnel run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub url: String,
    pub total_steps: u32,
    /// Distinct archetypes in first-seen order.
    pub detected_types: Vec<String>,
    pub reached_paywall: bool,
    pub execution_time_seconds: f64,
    #[serde(skip)]
    pub stop_reason: StopReason,
    /// Distinct price tokens collected on the paywall, diagnostics only.
    #[serde(skip)]
    pub prices: Vec<String>,
}

/// Anti-loop bookkeeping. Stopping requires both corroborating signals —
/// fingerprint repetition alone never stops a run, because legitimately
/// static screens can need several actions.
#[derive(Debug)]
pub struct ProgressGuard {
    same_fp_limit: u32,
    last_fp: Option<String>,
    same_fp: u32,
    no_action: u32,
}

impl ProgressGuard {
    pub fn new(same_fp_limit: u32) -> Self {
        Self {
            same_fp_limit,
            last_fp: None,
            same_fp: 0,
            no_action: 0,
        }
    }

    /// Record this step's fingerprint; returns the consecutive-identical
    /// count including this observation.
    pub fn observe(&mut self, fp: &str) -> u32 {
        if self.last_fp.as_deref() == Some(fp) {
            self.same_fp += 1;
        } else {
            self.last_fp = Some(fp.to_string());
            self.same_fp = 1;
        }
        self.same_fp
    }

    /// Record whether the dispatcher performed anything; returns the
    /// consecutive-no-action count.
    pub fn record_action(&mut self, performed: bool) -> u32 {
        if performed {
            self.no_action = 0;
        } else {
            self.no_action += 1;
        }
        self.no_action
    }

    /// Both signals corroborating: the page refuses to change AND we keep
    /// finding nothing to do.
    pub fn stalled(&self) -> bool {
        self.same_fp >= self.same_fp_limit && self.no_action >= 2
    }

    /// A rescue visibly moved the page; start the bookkeeping over.
    pub fn rescue_reset(&mut self) {
        self.last_fp = None;
        self.same_fp = 0;
        self.no_action = 0;
    }

    pub fn same_count(&self) -> u32 {
        self.same_fp
    }

    pub fn no_action_count(&self) -> u32 {
        self.no_action
    }
}

/// Walks funnels. Owns the browser and page for its lifetime; runs are
/// strictly sequential against the single document session.
pub struct FunnelDriver {
    browser: Browser,
    page: Page,
    config: Config,
    classifier: Classifier,
    cursor: RotationCursor,
}

impl FunnelDriver {
    /// Launch a browser per the config and wrap it in a driver.
    pub async fn new(config: Config, cursor: RotationCursor) -> Result<Self> {
        let stealth = eoka::StealthConfig {
            headless: config.browser.headless,
            proxy: config.browser.proxy.clone(),
            user_agent: config.browser.user_agent.clone(),
            viewport_width: config.browser.viewport.as_ref().map(|v| v.width).unwrap_or(1280),
            viewport_height: config.browser.viewport.as_ref().map(|v| v.height).unwrap_or(720),
            ..Default::default()
        };
        debug!("launching browser (headless: {})", config.browser.headless);
        let browser = Browser::launch_with_config(stealth)
            .await
            .map_err(Error::from_browser)?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(Error::from_browser)?;
        Ok(Self {
            browser,
            page,
            config,
            classifier: Classifier::new(),
            cursor,
        })
    }

    /// Walk one funnel to its paywall or a bounded stop. Always yields a
    /// summary; only evidence I/O failures surface as errors.
    pub async fn run(&self, url: &str) -> Result<RunSummary> {
        let started = Instant::now();
        let limits = &self.config.limits;
        let mut evidence = EvidenceSink::for_run(&self.config.evidence.dir, url)?;

        info!("funnel start: {url}");
        if let Err(err) = self.navigate(url).await {
            warn!("navigation failed for {url}: {err}");
            evidence.note(&format!("navigation failed: {err}"))?;
            let summary = RunSummary {
                url: url.to_string(),
                total_steps: 0,
                detected_types: Vec::new(),
                reached_paywall: false,
                execution_time_seconds: started.elapsed().as_secs_f64(),
                stop_reason: StopReason::NavigationFailed,
                prices: Vec::new(),
            };
            evidence.write_summary(&summary)?;
            return Ok(summary);
        }

        let mut guard = ProgressGuard::new(limits.same_fingerprint_limit);
        let mut detected: Vec<String> = Vec::new();
        let mut prices: Vec<String> = Vec::new();
        let mut email_seen = false;
        let mut reached_paywall = false;
        let mut step: u32 = 0;
        let stop_reason;

        loop {
            let budget = if email_seen {
                limits.post_email_max_steps
            } else {
                limits.max_steps
            };
            if step >= budget {
                stop_reason = StopReason::StepBudget;
                break;
            }
            if started.elapsed() >= Duration::from_secs(limits.max_run_secs) {
                stop_reason = StopReason::TimeBudget;
                break;
            }
            step += 1;

            self.page.wait(limits.settle_ms).await;
            let snap = match observe::snapshot(&self.page).await {
                Ok(s) => s,
                Err(Error::SessionClosed(m)) => {
                    evidence.note(&format!("session closed: {m}"))?;
                    stop_reason = StopReason::SessionClosed;
                    break;
                }
                Err(err) => {
                    warn!("snapshot failed at step {step}: {err}");
                    evidence.note(&format!("[STEP {step:02}] snapshot failed: {err}"))?;
                    if guard.record_action(false) >= limits.no_action_limit {
                        stop_reason = StopReason::NoAction;
                        break;
                    }
                    continue;
                }
            };

            let mut cls = self.classifier.classify(&snap, step);
            if step == 1 && cls.archetype == Archetype::Paywall {
                // the first paint is never a sell; downgrade the verdict
                cls.archetype = Archetype::Other;
                cls.reason = format!("paywall signals on step 1 downgraded ({})", cls.reason);
            }

            // consent chrome is closed opportunistically, after classification
            let popup_trace = popups::close_popups(&self.page).await;

            let label = cls.archetype.label().to_string();
            if !detected.contains(&label) {
                detected.push(label);
            }
            if cls.archetype == Archetype::Email {
                email_seen = true;
            }

            let shot = self.page.screenshot().await.ok();
            evidence.record_step(step, &cls, &popup_trace, shot.as_deref())?;
            info!("[step {step}] {} — {}", cls.archetype, cls.reason);

            if cls.archetype == Archetype::Paywall {
                prices = self.classifier.price_tokens(&snap.text);
                evidence.record_paywall(url, step, &prices, shot.as_deref())?;
                reached_paywall = true;
                stop_reason = StopReason::PaywallReached;
                break;
            }

            let fp = snap.fingerprint();
            let same = guard.observe(&fp);
            debug!("fingerprint repeat {same}, no-action {}", guard.no_action_count());

            // stuck email screens often just need the confirm key
            if cls.archetype == Archetype::Email && same >= 3 {
                match self.confirm_key_rescue(&fp).await {
                    Ok(true) => {
                        evidence.note("stuck-email rescue: confirm key advanced the page")?;
                        guard.rescue_reset();
                        continue;
                    }
                    Ok(false) => {}
                    Err(err) => {
                        evidence.note(&format!("session closed during rescue: {err}"))?;
                        stop_reason = StopReason::SessionClosed;
                        break;
                    }
                }
            }

            if guard.stalled() {
                if step >= 8 {
                    match self.confirm_key_rescue(&fp).await {
                        Ok(true) => {
                            evidence.note("stall rescue: confirm key advanced the page")?;
                            guard.rescue_reset();
                            continue;
                        }
                        Ok(false) => {}
                        Err(err) => {
                            evidence.note(&format!("session closed during rescue: {err}"))?;
                            stop_reason = StopReason::SessionClosed;
                            break;
                        }
                    }
                }
                evidence.note("loop detected: fingerprint repetition with no-action steps")?;
                stop_reason = StopReason::NoProgress;
                break;
            }

            let outcome = match dispatch::dispatch(
                &self.page,
                &snap,
                cls.archetype,
                &self.config.profile,
                &self.cursor,
            )
            .await
            {
                Ok(o) => o,
                Err(Error::SessionClosed(m)) => {
                    evidence.note(&format!("session closed during action: {m}"))?;
                    stop_reason = StopReason::SessionClosed;
                    break;
                }
                Err(err) => {
                    warn!("dispatch failed at step {step}: {err}");
                    let mut o = crate::actions::ActionOutcome::new();
                    o.note(format!("dispatch error absorbed: {err}"));
                    o
                }
            };
            evidence.record_trace(&outcome.trace)?;

            let no_action = guard.record_action(outcome.performed);
            if !outcome.performed {
                if no_action >= limits.no_action_limit {
                    stop_reason = StopReason::NoAction;
                    break;
                }
                // nothing happened, so there is no transition to wait for
                continue;
            }

            self.wait_for_transition(&snap.url).await;
        }

        let summary = RunSummary {
            url: url.to_string(),
            total_steps: step,
            detected_types: detected,
            reached_paywall,
            execution_time_seconds: started.elapsed().as_secs_f64(),
            stop_reason,
            prices,
        };
        evidence.write_summary(&summary)?;
        info!(
            "funnel end: {url} — {} after {} step(s)",
            summary.stop_reason, summary.total_steps
        );
        Ok(summary)
    }

    /// Navigate with lenient retries: if the strict load fails or times out,
    /// try again and settle for a responsive document instead of a full load
    /// signal.
    async fn navigate(&self, url: &str) -> Result<()> {
        let timeout = Duration::from_millis(self.config.limits.nav_timeout_ms);
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) if crate::is_session_closed(&e) => {
                return Err(Error::SessionClosed(e.to_string()))
            }
            Ok(Err(e)) => warn!("initial load failed ({e}), retrying leniently"),
            Err(_) => warn!("initial load timed out, retrying leniently"),
        }

        let mut last_err = format!("{url}: strict load attempt failed");
        for attempt in 1..=self.config.limits.nav_retries {
            debug!("lenient navigation attempt {attempt}");
            match self.navigate_lenient(url, timeout).await {
                Ok(()) => return Ok(()),
                Err(Error::SessionClosed(m)) => return Err(Error::SessionClosed(m)),
                Err(e) => last_err = e.to_string(),
            }
        }
        Err(Error::Navigation(last_err))
    }

    async fn navigate_lenient(&self, url: &str, timeout: Duration) -> Result<()> {
        let _ = tokio::time::timeout(timeout, self.page.goto(url)).await;
        let _ = self.page.wait_for_network_idle(500, 8000).await;
        let ready: String = self
            .page
            .evaluate("document.readyState")
            .await
            .map_err(Error::from_browser)?;
        let here = self.page.url().await.map_err(Error::from_browser)?;
        if here == "about:blank" {
            return Err(Error::Navigation(format!(
                "{url}: page never left about:blank (readyState {ready})"
            )));
        }
        debug!("lenient navigation settled at {here} (readyState {ready})");
        Ok(())
    }

    /// Press the confirm key and report whether the document moved.
    async fn confirm_key_rescue(&self, before: &str) -> Result<bool> {
        if self.page.human().press_key("Enter").await.is_err() {
            return Ok(false);
        }
        self.page.wait(600).await;
        match observe::fingerprint(&self.page).await {
            Ok(fp) => Ok(fp != before),
            Err(Error::SessionClosed(m)) => Err(Error::SessionClosed(m)),
            Err(_) => Ok(false),
        }
    }

    /// Funnels route client-side as often as they navigate for real, so the
    /// wait races a load signal, an address change, and a fixed timeout.
    async fn wait_for_transition(&self, before_url: &str) {
        let limits = &self.config.limits;
        self.page.wait(limits.settle_ms).await;

        let now = self.page.url().await.unwrap_or_default();
        if now != before_url {
            let _ = self
                .page
                .wait_for_network_idle(500, limits.transition_timeout_ms)
                .await;
            return;
        }

        let timeout = Duration::from_millis(limits.transition_timeout_ms);
        tokio::select! {
            _ = self.page.wait_for_network_idle(500, limits.transition_timeout_ms) => {}
            _ = self.url_changed(before_url) => {}
            _ = tokio::time::sleep(timeout) => {}
        }
    }

    async fn url_changed(&self, before: &str) {
        loop {
            if let Ok(now) = self.page.url().await {
                if now != before {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
    }

    /// Close the browser.
    pub async fn close(self) -> Result<()> {
        self.browser.close().await.map_err(Error::from_browser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_counts_repeats() {
        let mut guard = ProgressGuard::new(4);
        assert_eq!(guard.observe("a"), 1);
        assert_eq!(guard.observe("a"), 2);
        assert_eq!(guard.observe("a"), 3);
        assert_eq!(guard.observe("b"), 1);
        assert_eq!(guard.observe("b"), 2);
    }

    #[test]
    fn test_fingerprint_repetition_alone_never_stalls() {
        // the page never changes but the dispatcher keeps acting: the
        // no-action counter stays at zero and the guard must not trip
        let mut guard = ProgressGuard::new(4);
        for _ in 0..20 {
            guard.observe("same");
            guard.record_action(true);
            assert!(!guard.stalled());
        }
    }

    #[test]
    fn test_corroborated_stall() {
        let mut guard = ProgressGuard::new(4);
        for _ in 0..4 {
            guard.observe("same");
        }
        assert!(!guard.stalled());
        guard.record_action(false);
        assert!(!guard.stalled());
        guard.record_action(false);
        assert!(guard.stalled());
    }

    #[test]
    fn test_action_resets_no_action_count() {
        let mut guard = ProgressGuard::new(4);
        guard.record_action(false);
        assert_eq!(guard.no_action_count(), 1);
        guard.record_action(true);
        assert_eq!(guard.no_action_count(), 0);
        guard.record_action(false);
        assert_eq!(guard.no_action_count(), 1);
    }

    #[test]
    fn test_rescue_reset_clears_everything() {
        let mut guard = ProgressGuard::new(3);
        for _ in 0..3 {
            guard.observe("same");
            guard.record_action(false);
        }
        assert!(guard.stalled());
        guard.rescue_reset();
        assert!(!guard.stalled());
        assert_eq!(guard.same_count(), 0);
        assert_eq!(guard.no_action_count(), 0);
        // a fresh observation starts the count at one again
        assert_eq!(guard.observe("same"), 1);
    }

    #[test]
    fn test_stop_reason_labels() {
        assert_eq!(StopReason::PaywallReached.as_str(), "paywall_reached");
        assert_eq!(StopReason::NoProgress.to_string(), "no_progress");
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = RunSummary {
            url: "https://x.test".into(),
            total_steps: 7,
            detected_types: vec!["question".into(), "email".into()],
            reached_paywall: true,
            execution_time_seconds: 12.5,
            stop_reason: StopReason::PaywallReached,
            prices: vec!["$9.99".into()],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["totalSteps"], 7);
        assert_eq!(json["reachedPaywall"], true);
        assert_eq!(json["detectedTypes"][1], "email");
        assert_eq!(json["executionTimeSeconds"], 12.5);
        // diagnostics stay out of the summary file
        assert!(json.get("stopReason").is_none());
        assert!(json.get("prices").is_none());
    }
}
