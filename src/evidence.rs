//! Evidence sink — per-run step log, screenshots, JSON summaries, and the
//! cross-run aggregate.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::classify::Classification;
use crate::driver::RunSummary;
use crate::Result;

/// Filesystem-safe slug for a funnel address: host plus path, lowercased,
/// everything else collapsed to dashes.
pub fn slug_for(url: &str) -> String {
    let base = match url::Url::parse(url) {
        Ok(u) => format!("{}{}", u.host_str().unwrap_or("page"), u.path()),
        Err(_) => url.to_string(),
    };
    let mut slug = String::new();
    let mut last_dash = true;
    for c in base.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    let mut slug = if slug.is_empty() { "page".into() } else { slug };
    slug.truncate(60);
    slug
}

/// Collector for one run's evidence. Paywall screenshots additionally land
/// in a shared `paywalls/` directory so late-funnel finds aggregate across
/// runs.
pub struct EvidenceSink {
    run_dir: PathBuf,
    paywall_dir: PathBuf,
    log: File,
}

impl EvidenceSink {
    pub fn for_run(base: &Path, url: &str) -> Result<Self> {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let run_dir = base.join(format!("{}-{stamp}", slug_for(url)));
        fs::create_dir_all(&run_dir)?;
        let paywall_dir = base.join("paywalls");
        fs::create_dir_all(&paywall_dir)?;
        let log = File::create(run_dir.join("run.log"))?;
        Ok(Self {
            run_dir,
            paywall_dir,
            log,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Free-form log line.
    pub fn note(&mut self, line: &str) -> Result<()> {
        writeln!(self.log, "{line}")?;
        Ok(())
    }

    /// Step header plus the popup trace and the step screenshot.
    pub fn record_step(
        &mut self,
        step: u32,
        cls: &Classification,
        popup_trace: &[String],
        shot: Option<&[u8]>,
    ) -> Result<()> {
        writeln!(self.log, "[STEP {step:02}] {}", cls.archetype)?;
        writeln!(self.log, "  reason: {}", cls.reason)?;
        for line in popup_trace {
            writeln!(self.log, "  popup: {line}")?;
        }
        if let Some(png) = shot {
            let name = format!("step_{step:02}_{}.png", cls.archetype);
            fs::write(self.run_dir.join(name), png)?;
        }
        Ok(())
    }

    /// Ordered action trace lines under the current step header.
    pub fn record_trace(&mut self, trace: &[String]) -> Result<()> {
        for line in trace {
            writeln!(self.log, "  {line}")?;
        }
        Ok(())
    }

    /// Paywall diagnostics: price tokens plus a copy of the screenshot in
    /// the shared collection.
    pub fn record_paywall(
        &mut self,
        url: &str,
        step: u32,
        prices: &[String],
        shot: Option<&[u8]>,
    ) -> Result<()> {
        writeln!(self.log, "  prices: [{}]", prices.join(", "))?;
        if let Some(png) = shot {
            let name = format!("{}_step_{step:02}.png", slug_for(url));
            fs::write(self.paywall_dir.join(name), png)?;
        }
        Ok(())
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        let json = serde_json::to_string_pretty(summary)?;
        fs::write(self.run_dir.join("summary.json"), json)?;
        Ok(())
    }
}

/// Cross-run aggregate, written once after all funnels finish.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    pub total_funnels: usize,
    pub funnels_reached_paywall: usize,
    pub average_steps: f64,
    pub total_paywalls_collected: usize,
}

fn aggregate_of(summaries: &[RunSummary], paywalls_collected: usize) -> Aggregate {
    let total = summaries.len();
    let reached = summaries.iter().filter(|s| s.reached_paywall).count();
    let average = if total > 0 {
        summaries.iter().map(|s| s.total_steps as f64).sum::<f64>() / total as f64
    } else {
        0.0
    };
    Aggregate {
        total_funnels: total,
        funnels_reached_paywall: reached,
        average_steps: average,
        total_paywalls_collected: paywalls_collected,
    }
}

/// Compute and persist `aggregate.json` under the evidence base directory.
pub fn write_aggregate(base: &Path, summaries: &[RunSummary]) -> Result<Aggregate> {
    let collected = fs::read_dir(base.join("paywalls"))
        .map(|dir| dir.filter_map(|e| e.ok()).count())
        .unwrap_or(0);
    let aggregate = aggregate_of(summaries, collected);
    fs::create_dir_all(base)?;
    fs::write(
        base.join("aggregate.json"),
        serde_json::to_string_pretty(&aggregate)?,
    )?;
    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::StopReason;

    fn summary(steps: u32, reached: bool) -> RunSummary {
        RunSummary {
            url: "https://quiz.example.com/start".into(),
            total_steps: steps,
            detected_types: vec!["question".into()],
            reached_paywall: reached,
            execution_time_seconds: 1.0,
            stop_reason: if reached {
                StopReason::PaywallReached
            } else {
                StopReason::StepBudget
            },
            prices: Vec::new(),
        }
    }

    #[test]
    fn test_slug_for_url() {
        assert_eq!(
            slug_for("https://www.Site.com/quiz/start?id=1"),
            "www-site-com-quiz-start"
        );
        assert_eq!(slug_for("not a url"), "not-a-url");
        assert_eq!(slug_for("https://x.io/"), "x-io");
    }

    #[test]
    fn test_slug_is_bounded() {
        let url = format!("https://example.com/{}", "segment/".repeat(30));
        assert!(slug_for(&url).len() <= 60);
    }

    #[test]
    fn test_aggregate_math() {
        let agg = aggregate_of(&[summary(10, true), summary(20, false)], 3);
        assert_eq!(agg.total_funnels, 2);
        assert_eq!(agg.funnels_reached_paywall, 1);
        assert!((agg.average_steps - 15.0).abs() < f64::EPSILON);
        assert_eq!(agg.total_paywalls_collected, 3);
    }

    #[test]
    fn test_aggregate_empty() {
        let agg = aggregate_of(&[], 0);
        assert_eq!(agg.total_funnels, 0);
        assert_eq!(agg.average_steps, 0.0);
    }

    #[test]
    fn test_aggregate_serializes_camel_case() {
        let json = serde_json::to_value(aggregate_of(&[summary(4, true)], 1)).unwrap();
        assert_eq!(json["totalFunnels"], 1);
        assert_eq!(json["funnelsReachedPaywall"], 1);
        assert_eq!(json["averageSteps"], 4.0);
        assert_eq!(json["totalPaywallsCollected"], 1);
    }
}
