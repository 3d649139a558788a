use clap::Parser;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use quizpilot::{evidence, Config, FunnelDriver, RotationCursor, StopReason};

#[derive(Parser)]
#[command(name = "quizpilot")]
#[command(about = "Autonomous quiz-funnel walker")]
#[command(version)]
struct Cli {
    /// Config file with the funnel list
    config: Option<PathBuf>,

    /// Add a funnel URL (repeatable; works with or without a config file)
    #[arg(long = "url", value_name = "URL")]
    urls: Vec<String>,

    /// Run in headless mode (overrides config)
    #[arg(long)]
    headless: bool,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Validate config without running
    #[arg(long)]
    check: bool,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> quizpilot::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::load(path)?;
            config.urls.extend(cli.urls.iter().cloned());
            config
        }
        None => Config::from_urls(cli.urls.clone())?,
    };

    if cli.headless {
        config.browser.headless = true;
    }

    if cli.check {
        println!("Config valid");
        println!("  Funnels: {}", config.urls.len());
        for url in &config.urls {
            println!("    - {url}");
        }
        println!(
            "  Budgets: {} steps ({} post-email), {}s wall clock",
            config.limits.max_steps, config.limits.post_email_max_steps, config.limits.max_run_secs
        );
        println!("  Evidence dir: {}", config.evidence.dir.display());
        return Ok(());
    }

    println!("Walking {} funnel(s)", config.urls.len());

    let cursor = RotationCursor::new();
    let driver = FunnelDriver::new(config.clone(), cursor).await?;

    let mut summaries = Vec::new();
    for url in &config.urls {
        println!("→ {url}");
        let summary = driver.run(url).await?;
        match summary.stop_reason {
            StopReason::PaywallReached => {
                println!(
                    "  ✓ paywall after {} step(s), prices: [{}]",
                    summary.total_steps,
                    summary.prices.join(", ")
                );
            }
            reason => {
                println!(
                    "  ✗ {} after {} step(s) ({})",
                    reason,
                    summary.total_steps,
                    summary.detected_types.join(", ")
                );
            }
        }
        summaries.push(summary);
    }

    let aggregate = evidence::write_aggregate(&config.evidence.dir, &summaries)?;
    println!();
    println!(
        "Done: {}/{} funnels reached a paywall, {:.1} steps on average, {} paywall shot(s) collected",
        aggregate.funnels_reached_paywall,
        aggregate.total_funnels,
        aggregate.average_steps,
        aggregate.total_paywalls_collected
    );

    driver.close().await?;
    Ok(())
}
