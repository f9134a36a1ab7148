//! Claim, unclaim, start and complete commands

use anyhow::Result;
use devvault::{Issue, IssueId, IssueLifecycle};

use super::Context;
use crate::style::*;

fn lifecycle(ctx: &Context) -> IssueLifecycle {
    IssueLifecycle::new(ctx.store.clone())
}

fn describe(issue: &Issue) -> String {
    format!(
        "{} {} ({}/{})",
        issue.id,
        style_bold(&issue.title),
        issue.owner,
        issue.repository
    )
}

pub async fn claim(ctx: &Context, id: i64) -> Result<()> {
    let issue = lifecycle(ctx).claim(IssueId(id), ctx.require_user()?).await?;
    print_success(&format!("Claimed {}", describe(&issue)));
    println!(
        "Complete it to earn {} points",
        style_green(&issue.reward.to_string())
    );
    Ok(())
}

pub async fn unclaim(ctx: &Context, id: i64) -> Result<()> {
    let issue = lifecycle(ctx)
        .unclaim(IssueId(id), ctx.require_user()?)
        .await?;
    print_success(&format!("Released {}", describe(&issue)));
    Ok(())
}

pub async fn start(ctx: &Context, id: i64) -> Result<()> {
    let issue = lifecycle(ctx)
        .start_work(IssueId(id), ctx.require_user()?)
        .await?;
    print_success(&format!("Started work on {}", describe(&issue)));
    Ok(())
}

pub async fn complete(ctx: &Context, id: i64) -> Result<()> {
    let issue = lifecycle(ctx)
        .complete(IssueId(id), ctx.require_user()?)
        .await?;
    print_success(&format!("Completed {}", describe(&issue)));
    println!(
        "Earned {} points",
        style_green(&format!("+{}", issue.reward))
    );
    Ok(())
}
