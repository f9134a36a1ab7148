//! Demo data for an empty store

use tracing::info;

use crate::error::StoreError;
use crate::model::{Difficulty, NewIssue, NewUser};
use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub users: usize,
    pub issues: usize,
}

fn demo_users() -> Vec<NewUser> {
    vec![
        NewUser::new("dev@example.com", "John Developer").with_github("johndev"),
        NewUser::new("maintainer@example.com", "Sarah Maintainer")
            .with_github("sarahmaint")
            .maintainer(),
    ]
}

struct DemoIssue {
    number: u32,
    title: &'static str,
    description: &'static str,
    owner: &'static str,
    repository: &'static str,
    labels: &'static [&'static str],
    difficulty: Difficulty,
    reward: u32,
}

/// Curated samples; difficulty and reward are set by hand, not classified
const DEMO_ISSUES: &[DemoIssue] = &[
    DemoIssue {
        number: 1,
        title: "Add dark mode toggle to navigation",
        description: "Implement a dark mode toggle in the main navigation bar with smooth \
                      transitions and persistent user preference storage.",
        owner: "techcorp",
        repository: "awesome-ui-lib",
        labels: &["enhancement", "good first issue"],
        difficulty: Difficulty::Easy,
        reward: 150,
    },
    DemoIssue {
        number: 2,
        title: "Fix memory leak in WebSocket connection",
        description: "There's a memory leak occurring when WebSocket connections are not \
                      properly cleaned up on component unmount.",
        owner: "startupxyz",
        repository: "realtime-chat",
        labels: &["bug", "high priority"],
        difficulty: Difficulty::Medium,
        reward: 300,
    },
    DemoIssue {
        number: 3,
        title: "Implement OAuth2 authentication flow",
        description: "Add support for OAuth2 authentication with Google, GitHub, and Microsoft \
                      providers including proper error handling and token refresh.",
        owner: "enterprise-solutions",
        repository: "auth-service",
        labels: &["feature", "security"],
        difficulty: Difficulty::Hard,
        reward: 500,
    },
    DemoIssue {
        number: 4,
        title: "Add unit tests for user service",
        description: "Write comprehensive unit tests for the user service including edge cases \
                      and error scenarios.",
        owner: "devteam",
        repository: "backend-api",
        labels: &["testing", "good first issue"],
        difficulty: Difficulty::Easy,
        reward: 100,
    },
    DemoIssue {
        number: 5,
        title: "Optimize database queries for better performance",
        description: "Review and optimize slow database queries, add proper indexing, and \
                      implement query caching where appropriate.",
        owner: "performance-team",
        repository: "data-service",
        labels: &["performance", "database"],
        difficulty: Difficulty::Hard,
        reward: 400,
    },
];

impl DemoIssue {
    fn to_new_issue(&self) -> NewIssue {
        let mut issue = NewIssue::classified(
            format!("demo-{}", self.number),
            self.title,
            self.owner,
            self.repository,
            self.labels.iter().map(|l| l.to_string()).collect(),
        )
        .with_description(self.description)
        .with_url(format!(
            "https://github.com/{}/{}/issues/{}",
            self.owner, self.repository, self.number
        ));
        issue.difficulty = self.difficulty;
        issue.reward = self.reward;
        issue
    }
}

/// Insert demo users (skipping taken emails) and, if the store has no
/// issues yet, the demo issues
pub async fn seed_demo_data(store: &dyn Store) -> Result<SeedReport, StoreError> {
    let mut report = SeedReport::default();

    for user in demo_users() {
        if store.insert_user(user).await?.is_some() {
            report.users += 1;
        }
    }

    if store.count_issues().await? == 0 {
        for demo in DEMO_ISSUES {
            if store.insert_new_issue(demo.to_new_issue()).await?.is_some() {
                report.issues += 1;
            }
        }
    }

    if report.users > 0 || report.issues > 0 {
        info!(
            "Seeded {} demo users and {} demo issues",
            report.users, report.issues
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IssueStatus;
    use crate::store::{IssueStore, MemoryStore, UserStore};

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = MemoryStore::new();
        let first = seed_demo_data(&store).await.unwrap();
        assert_eq!(first, SeedReport { users: 2, issues: 5 });

        let second = seed_demo_data(&store).await.unwrap();
        assert_eq!(second, SeedReport::default());
        assert_eq!(store.count_issues().await.unwrap(), 5);

        let maintainer = store
            .find_user_by_email("maintainer@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(maintainer.is_maintainer());
    }

    #[tokio::test]
    async fn test_seeded_issues_are_open_with_curated_rewards() {
        let store = MemoryStore::new();
        seed_demo_data(&store).await.unwrap();

        let issues = store.find_all().await.unwrap();
        assert!(issues.iter().all(|i| i.status == IssueStatus::Open));
        let oauth = store.find_by_external_id("demo-3").await.unwrap().unwrap();
        assert_eq!(oauth.difficulty, Difficulty::Hard);
        assert_eq!(oauth.reward, 500);
        assert_eq!(
            oauth.url,
            "https://github.com/enterprise-solutions/auth-service/issues/3"
        );
    }
}
