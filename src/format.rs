//! Commit → webhook payload rendering. Pure; no I/O.
use crate::model::{CommitDetail, Embed, FileChange, NotificationPayload, RepoId};

/// Embed accent colour ("blurple").
pub const EMBED_COLOR: u32 = 7506394;
pub const TRUNCATION_MARKER: &str = "> ...";

/// Files whose total change count is at or below this get no delta suffix.
const DELTA_THRESHOLD: u64 = 2;

#[derive(Debug, Clone, Copy)]
pub struct Formatter {
    truncate_at: usize,
}

impl Formatter {
    pub fn new(truncate_at: usize) -> Self {
        Self { truncate_at }
    }

    pub fn format(&self, repo: &RepoId, commit: &CommitDetail) -> NotificationPayload {
        NotificationPayload {
            content: self.changelist(&commit.files),
            username: repo.to_string(),
            avatar_url: commit.author.as_ref().map(|a| a.avatar_url.clone()),
            embeds: vec![Embed {
                description: message_block(commit),
                color: EMBED_COLOR,
            }],
        }
    }

    pub fn changelist(&self, files: &[FileChange]) -> String {
        let mut lines: Vec<String> = files
            .iter()
            .take(self.truncate_at)
            .map(file_line)
            .collect();
        if files.len() > self.truncate_at {
            lines.push(TRUNCATION_MARKER.to_string());
        }
        lines.join("\n")
    }
}

fn file_line(file: &FileChange) -> String {
    let line = format!("> **{}**: `{}`", file.status, file.filename);
    match deltas(file) {
        Some(deltas) => format!("{line} ({deltas})"),
        None => line,
    }
}

fn plural(count: u64, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// "N additions, M deletions", dropping a zero side. `None` for small changes.
pub fn deltas(file: &FileChange) -> Option<String> {
    if file.changes <= DELTA_THRESHOLD {
        return None;
    }
    let additions = plural(file.additions, "addition");
    let deletions = plural(file.deletions, "deletion");
    Some(match (file.additions, file.deletions) {
        (0, _) => deletions,
        (_, 0) => additions,
        _ => format!("{additions}, {deletions}"),
    })
}

/// Linked handle, prefixed by the free-text name when the two differ.
pub fn author(commit: &CommitDetail) -> String {
    let name = &commit.commit.author.name;
    match &commit.author {
        Some(account) if *name == account.login => {
            format!("[{}]({})", account.login, account.html_url)
        }
        Some(account) => format!("{} ([{}]({}))", name, account.login, account.html_url),
        None => name.clone(),
    }
}

pub fn short_sha(sha: &str) -> &str {
    match sha.char_indices().nth(7) {
        Some((idx, _)) => &sha[..idx],
        None => sha,
    }
}

fn message_block(commit: &CommitDetail) -> String {
    let message = &commit.commit.message;
    let fence_break = if message.ends_with('\n') { "" } else { "\n" };
    format!(
        "[`{}`]({}) by {}\n```\n{}{}```\n",
        short_sha(&commit.sha),
        commit.html_url,
        author(commit),
        message,
        fence_break
    )
}
