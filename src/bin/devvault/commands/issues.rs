//! Issue listing commands

use anyhow::Result;
use devvault::{IssueLifecycle, SearchQuery, UserService};

use super::{print_issue_table, Context};
use crate::style::*;

pub async fn search(
    ctx: &Context,
    term: Option<String>,
    difficulty: Option<String>,
    status: Option<String>,
) -> Result<()> {
    let lifecycle = IssueLifecycle::new(ctx.store.clone());
    let query = SearchQuery {
        term,
        difficulty,
        status,
    };
    print_header("Issues");
    print_issue_table(&lifecycle.search(&query).await?);
    Ok(())
}

pub async fn available(ctx: &Context) -> Result<()> {
    let lifecycle = IssueLifecycle::new(ctx.store.clone());
    print_header("Available Issues");
    print_issue_table(&lifecycle.list_available().await?);
    Ok(())
}

pub async fn mine(ctx: &Context) -> Result<()> {
    let user_id = ctx.require_user()?;
    let user = UserService::new(ctx.store.clone()).profile(user_id).await?;
    let issues = IssueLifecycle::new(ctx.store.clone())
        .issues_for_user(user_id)
        .await?;

    print_header(&format!("{} <{}>", user.display_name, user.email));
    if let Some(github) = &user.github_username {
        println!("GitHub:           @{}", style_cyan(github));
    }
    println!("Role:             {}", user.role.as_str());
    println!(
        "Reward Points:    {}",
        style_green(&user.reward_points.to_string())
    );
    println!("Reputation:       {}", user.reputation);
    println!("Claimed Issues:   {}", user.claimed_issues);
    println!("Completed Issues: {}", user.completed_issues);

    print_header("My Issues");
    print_issue_table(&issues);
    Ok(())
}
