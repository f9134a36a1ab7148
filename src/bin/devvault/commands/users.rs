//! User registration and demo data commands

use anyhow::Result;
use devvault::{seed, NewUser, UserService};

use super::Context;
use crate::style::*;

pub async fn register(
    ctx: &Context,
    email: String,
    name: String,
    github: Option<String>,
    maintainer: bool,
) -> Result<()> {
    let mut user = NewUser::new(email, name);
    if let Some(github) = github {
        user = user.with_github(github);
    }
    if maintainer {
        user = user.maintainer();
    }

    let user = UserService::new(ctx.store.clone()).register(user).await?;
    print_success(&format!(
        "Registered {} as user {}",
        user.email,
        style_bold(&user.id.to_string())
    ));
    println!("Use it with: devvault --user {} ...", user.id);
    Ok(())
}

pub async fn seed(ctx: &Context) -> Result<()> {
    let report = seed::seed_demo_data(ctx.store.as_ref()).await?;
    if report.users == 0 && report.issues == 0 {
        print_warning("Nothing to seed, demo data is already present");
    } else {
        print_success(&format!(
            "Seeded {} users and {} issues",
            report.users, report.issues
        ));
    }
    Ok(())
}
