//! Users, labels and milestones.

use chrono::{DateTime, Utc};

use super::RepoRef;
use crate::github::IssueState;
use crate::github::types::{RawLabel, RawMilestone, RawUser};
use crate::pool::{Canonical, Pools};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub login: String,
    pub id: u64,
    pub html_url: Option<String>,
    pub avatar_url: Option<String>,
    pub account_type: Option<String>,
    pub site_admin: bool,
}

impl User {
    #[must_use]
    pub fn is_bot(&self) -> bool {
        self.account_type.as_deref() == Some("Bot")
    }
}

impl Canonical for User {
    type Raw = RawUser;

    fn pool_key(_repo: &RepoRef, raw: &RawUser) -> String {
        raw.login.clone()
    }

    fn create(_repo: &RepoRef, raw: &RawUser, _pools: &Pools) -> Self {
        User {
            login: raw.login.clone(),
            id: raw.id,
            html_url: raw.html_url.clone(),
            avatar_url: raw.avatar_url.clone(),
            account_type: raw.account_type.clone(),
            site_admin: raw.site_admin,
        }
    }

    fn update(&mut self, raw: &RawUser, _pools: &Pools) {
        // Abbreviated user objects carry no id; keep what a fuller payload gave us.
        if raw.id != 0 {
            self.id = raw.id;
        }
        if raw.html_url.is_some() {
            self.html_url.clone_from(&raw.html_url);
        }
        if raw.avatar_url.is_some() {
            self.avatar_url.clone_from(&raw.avatar_url);
        }
        if raw.account_type.is_some() {
            self.account_type.clone_from(&raw.account_type);
        }
        self.site_admin = raw.site_admin;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub repo: RepoRef,
    pub name: String,
    pub color: String,
    pub description: Option<String>,
}

impl Label {
    #[must_use]
    pub fn key(repo: &RepoRef, name: &str) -> String {
        format!("{}/{}/:label:/{}", repo.owner, repo.name, name)
    }
}

impl Canonical for Label {
    type Raw = RawLabel;

    fn pool_key(repo: &RepoRef, raw: &RawLabel) -> String {
        Label::key(repo, &raw.name)
    }

    fn create(repo: &RepoRef, raw: &RawLabel, _pools: &Pools) -> Self {
        Label {
            repo: repo.clone(),
            name: raw.name.clone(),
            color: raw.color.clone(),
            description: raw.description.clone(),
        }
    }

    fn update(&mut self, raw: &RawLabel, _pools: &Pools) {
        self.color.clone_from(&raw.color);
        self.description.clone_from(&raw.description);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Milestone {
    pub repo: RepoRef,
    pub number: u64,
    pub title: String,
    pub state: IssueState,
    pub description: Option<String>,
    pub due_on: Option<DateTime<Utc>>,
    pub open_issues: u64,
    pub closed_issues: u64,
}

impl Milestone {
    #[must_use]
    pub fn key(repo: &RepoRef, number: u64) -> String {
        format!("{}/{}/milestone/{}", repo.owner, repo.name, number)
    }
}

impl Canonical for Milestone {
    type Raw = RawMilestone;

    fn pool_key(repo: &RepoRef, raw: &RawMilestone) -> String {
        Milestone::key(repo, raw.number)
    }

    fn create(repo: &RepoRef, raw: &RawMilestone, pools: &Pools) -> Self {
        let mut milestone = Milestone {
            repo: repo.clone(),
            number: raw.number,
            title: String::new(),
            state: raw.state,
            description: None,
            due_on: None,
            open_issues: 0,
            closed_issues: 0,
        };
        milestone.update(raw, pools);
        milestone
    }

    fn update(&mut self, raw: &RawMilestone, _pools: &Pools) {
        self.title.clone_from(&raw.title);
        self.state = raw.state;
        self.description.clone_from(&raw.description);
        self.due_on = raw.due_on;
        self.open_issues = raw.open_issues;
        self.closed_issues = raw.closed_issues;
    }
}
