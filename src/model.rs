use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a watched repository on the upstream platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// One watched repository bound to the webhook its commits are posted to.
/// Built once from configuration and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub id: RepoId,
    pub webhook_url: String,
}

/// Entry of the commit listing endpoint. Only the sha is needed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
}

/// One page of the commit listing plus the URL of the page after it, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommitPage {
    pub commits: Vec<CommitSummary>,
    pub next: Option<String>,
}

/// Full commit record as returned by the detail endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitDetail {
    pub sha: String,
    pub html_url: String,
    pub commit: CommitInfo,
    /// Linked platform account; `null` when the author email matches no account.
    pub author: Option<Account>,
    #[serde(default)]
    pub files: Vec<FileChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommitInfo {
    pub author: GitAuthor,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GitAuthor {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Account {
    pub login: String,
    pub html_url: String,
    pub avatar_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileChange {
    pub filename: String,
    pub status: String,
    pub additions: u64,
    pub deletions: u64,
    pub changes: u64,
}

/// Body of a webhook execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub content: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Embed {
    pub description: String,
    pub color: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detail_decodes_commit_without_linked_account() {
        let raw = json!({
            "sha": "abc1234def",
            "html_url": "https://github.com/acme/widgets/commit/abc1234def",
            "commit": { "author": { "name": "Jane" }, "message": "fix" },
            "author": null,
            "files": []
        });
        let detail: CommitDetail = serde_json::from_value(raw).unwrap();
        assert!(detail.author.is_none());
        assert_eq!(detail.commit.author.name, "Jane");
    }

    #[test]
    fn payload_omits_missing_avatar() {
        let payload = NotificationPayload {
            content: String::new(),
            username: "acme/widgets".into(),
            avatar_url: None,
            embeds: vec![Embed {
                description: "d".into(),
                color: 1,
            }],
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("avatar_url").is_none());
        assert_eq!(value["embeds"][0]["color"], 1);
    }
}
