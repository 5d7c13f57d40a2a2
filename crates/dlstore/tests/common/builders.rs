//! Builders for seeding jobs and episodes.

#![allow(dead_code)]

use dlstore::{EpisodeStatus, EpisodeUpdate, JobStore};

/// Builder for a job with optional episodes and lifecycle steps.
pub struct JobBuilder {
    url: String,
    profile: Option<String>,
    extra_args: Option<String>,
    episodes: Vec<(i64, String, Option<EpisodeStatus>)>,
    claimed: bool,
}

/// Ids produced by [`JobBuilder::build`].
#[derive(Debug, Clone)]
pub struct SeededJob {
    pub job_id: i64,
    pub episode_ids: Vec<i64>,
}

impl JobBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            profile: None,
            extra_args: None,
            episodes: vec![],
            claimed: false,
        }
    }

    pub fn profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }

    pub fn extra_args(mut self, args: &str) -> Self {
        self.extra_args = Some(args.to_string());
        self
    }

    /// Adds a pending episode.
    pub fn episode(mut self, number: i64, title: &str) -> Self {
        self.episodes.push((number, title.to_string(), None));
        self
    }

    /// Adds an episode and moves it to `status` once created.
    pub fn episode_in(mut self, number: i64, title: &str, status: EpisodeStatus) -> Self {
        self.episodes.push((number, title.to_string(), Some(status)));
        self
    }

    pub fn claimed(mut self) -> Self {
        self.claimed = true;
        self
    }

    pub fn build(self, store: &JobStore) -> SeededJob {
        let job_id = store
            .create_job(&self.url, self.profile.as_deref(), self.extra_args.as_deref())
            .expect("Failed to create job");

        let mut episode_ids = Vec::with_capacity(self.episodes.len());
        for (number, title, status) in &self.episodes {
            let id = store
                .create_episode(job_id, *number, title)
                .expect("Failed to create episode");
            if let Some(status) = status {
                store
                    .update_episode(id, &EpisodeUpdate::status(*status))
                    .expect("Failed to update episode");
            }
            episode_ids.push(id);
        }

        if self.claimed {
            assert!(store.claim_job(job_id).expect("Failed to claim job"));
        }

        SeededJob {
            job_id,
            episode_ids,
        }
    }
}
