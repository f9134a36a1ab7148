//! Sync and rate-limit commands

use std::sync::Arc;

use anyhow::Result;
use devvault::SyncPipeline;

use super::Context;
use crate::style::*;

pub async fn run(ctx: &Context) -> Result<()> {
    let settings = ctx.config.sync_settings();
    if settings.repos.is_empty() {
        print_warning("No repositories configured under [github.repos]");
        return Ok(());
    }

    print_header("GitHub Sync");
    for repo in &settings.repos {
        println!("  {}", style_dim(&repo.to_string()));
    }
    println!();

    let github = Arc::new(ctx.config.github_client()?);
    let pipeline = SyncPipeline::new(github, ctx.store.clone(), settings);

    let stop = pipeline.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            print_warning("Stopping after the current repository...");
            stop.request_stop();
        }
    });

    let report = pipeline.run().await?;

    println!("Fetched:          {}", report.fetched);
    println!(
        "New issues:       {}",
        style_green(&report.inserted.to_string())
    );
    println!("Already known:    {}", report.skipped_existing);
    println!("Pull requests:    {}", report.skipped_pull_requests);
    println!();

    if report.interrupted {
        print_warning("Sync was interrupted before all repositories were visited");
    }
    match report.error_summary() {
        Some(summary) => print_warning(&summary),
        None => print_success(&format!(
            "Synced {} repositories",
            report.repos_attempted
        )),
    }
    Ok(())
}

pub async fn rate_limit(ctx: &Context) -> Result<()> {
    let client = ctx.config.github_client()?;
    let rate = client.check_rate_limit().await?;

    print_header("GitHub Rate Limit");
    println!(
        "Authenticated:    {}",
        if client.is_authenticated() {
            style_green("yes")
        } else {
            style_yellow("no")
        }
    );
    println!("Limit:            {}", rate.limit);
    println!(
        "Remaining:        {}",
        if rate.is_low() {
            style_red(&rate.remaining.to_string())
        } else {
            style_green(&rate.remaining.to_string())
        }
    );
    println!("Used:             {}", rate.used);
    println!("Resets in:        {}s", rate.seconds_until_reset());
    Ok(())
}
