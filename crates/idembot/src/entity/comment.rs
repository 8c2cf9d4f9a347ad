use chrono::{DateTime, Utc};

use super::{RepoRef, User};
use crate::github::types::RawComment;
use crate::pool::{Canonical, Handle, Pools};

/// An issue or pull request comment.
#[derive(Debug, Clone)]
pub struct Comment {
    pub repo: RepoRef,
    pub id: u64,
    pub body: String,
    pub author: Handle<User>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub html_url: String,
}

impl Comment {
    #[must_use]
    pub fn author_login(&self) -> String {
        self.author.read().login.clone()
    }
}

impl Canonical for Comment {
    type Raw = RawComment;

    fn pool_key(_repo: &RepoRef, raw: &RawComment) -> String {
        raw.id.to_string()
    }

    fn create(repo: &RepoRef, raw: &RawComment, pools: &Pools) -> Self {
        Comment {
            repo: repo.clone(),
            id: raw.id,
            body: raw.body.clone(),
            author: pools.users.ingest(repo, &raw.user, pools),
            created_at: raw.created_at,
            updated_at: raw.updated_at,
            html_url: raw.html_url.clone(),
        }
    }

    fn update(&mut self, raw: &RawComment, pools: &Pools) {
        self.body.clone_from(&raw.body);
        self.author = pools.users.ingest(&self.repo, &raw.user, pools);
        self.updated_at = raw.updated_at;
        self.html_url.clone_from(&raw.html_url);
    }
}
