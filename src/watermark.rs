//! Per-target "since" cursors.
//!
//! The store hands out exactly one [`Watermark`] cell per target. The cell is
//! moved into the watch task for that target, so every cursor has a single
//! reader and writer and no locking is involved.
use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

use crate::model::RepoId;

/// Source of "now", truncated to whole seconds by the callers that need it.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("watermark for {0} is already owned by a watch task")]
pub struct AlreadyCheckedOut(pub RepoId);

#[derive(Debug)]
pub struct WatermarkStore {
    initial: DateTime<Utc>,
    issued: HashSet<RepoId>,
}

impl WatermarkStore {
    /// Every cursor starts `lookback` before `startup`.
    pub fn at_startup(startup: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            initial: (startup - lookback).trunc_subsecs(0),
            issued: HashSet::new(),
        }
    }

    pub fn initial(&self) -> DateTime<Utc> {
        self.initial
    }

    /// Hand out the cursor for `repo`. A target can be checked out once.
    pub fn checkout(&mut self, repo: &RepoId) -> Result<Watermark, AlreadyCheckedOut> {
        if !self.issued.insert(repo.clone()) {
            return Err(AlreadyCheckedOut(repo.clone()));
        }
        Ok(Watermark {
            repo: repo.clone(),
            since: self.initial,
        })
    }
}

/// Timestamp below which every commit of one target counts as processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    repo: RepoId,
    since: DateTime<Utc>,
}

impl Watermark {
    pub fn repo(&self) -> &RepoId {
        &self.repo
    }

    pub fn get(&self) -> DateTime<Utc> {
        self.since
    }

    /// Move the cursor forward to `to` (second precision). Never moves it back.
    pub fn advance(&mut self, to: DateTime<Utc>) -> DateTime<Utc> {
        let to = to.trunc_subsecs(0);
        if to < self.since {
            warn!(repo = %self.repo, current = %self.since, proposed = %to, "clock went backwards; keeping watermark");
        } else {
            self.since = to;
        }
        self.since
    }
}
