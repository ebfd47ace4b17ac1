//! Crawl orchestration
//!
//! One crawl: obtain the tree listing, enumerate candidate blobs through the
//! enumeration-time filters, submit each candidate to the worker pool, and
//! collect exactly one result per candidate (or stop early on cancellation)
//! before assembling the response.

use crate::filter::ContentFilter;
use crate::github::{FetchError, GithubClient};
use crate::limiter::AdaptiveRateLimiter;
use crate::model::{
    CrawlError, CrawlResponse, FetchResult, FetchTask, RepositoryInfo, TreeListing,
};
use crate::pool::FetchPool;
use crate::CrawlerError;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tallies accumulated by the result collector
#[derive(Default)]
struct Collected {
    processed: usize,
    skipped: usize,
    errors: Vec<CrawlError>,
    files: Vec<FetchResult>,
}

/// Runs crawls against a shared worker pool
pub struct Orchestrator {
    pool: FetchPool,
    client: Arc<GithubClient>,
    limiter: Arc<AdaptiveRateLimiter>,
    filter: Arc<ContentFilter>,
}

impl Orchestrator {
    pub fn new(
        pool: FetchPool,
        client: Arc<GithubClient>,
        limiter: Arc<AdaptiveRateLimiter>,
        filter: Arc<ContentFilter>,
    ) -> Self {
        Self {
            pool,
            client,
            limiter,
            filter,
        }
    }

    /// Crawls a repository at a revision
    ///
    /// Per-task failures become entries in the response's errors list; only
    /// tree-enumeration failure or cancellation before collection starts
    /// unwinds with an error. A cancellation mid-collection returns the
    /// partial response accumulated so far.
    pub async fn crawl(
        &self,
        owner: &str,
        repo: &str,
        ref_name: &str,
        path_filter: &[String],
        cancel: &CancellationToken,
    ) -> Result<CrawlResponse, CrawlerError> {
        let start = Instant::now();
        tracing::info!(owner, repo, ref_name, "starting crawl");

        if !self.pool.is_running() {
            return Err(CrawlerError::PoolNotRunning);
        }

        // The tree listing is an upstream request like any other
        self.limiter.acquire(cancel).await?;

        let listing = self
            .client
            .fetch_tree(owner, repo, ref_name, cancel)
            .await
            .map_err(|e| match e {
                FetchError::Cancelled => CrawlerError::Cancelled,
                source => CrawlerError::TreeEnumeration {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    source,
                },
            })?;

        let root_tree_sha = listing.sha.clone();
        let truncated = listing.truncated;
        let candidates =
            enumerate_candidates(&listing, owner, repo, ref_name, path_filter, &self.filter);
        let total = candidates.len();

        tracing::info!(
            tree_entries = listing.tree.len(),
            candidates = total,
            "enumerated repository tree"
        );

        // The collector drains results continuously while submission may
        // still be blocked on backpressure
        let collector = {
            let pool = self.pool.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { collect_results(pool, cancel, total).await })
        };

        for task in candidates {
            match self.pool.submit(task, cancel).await {
                Ok(()) => crate::metrics::record_file_requested(owner, repo),
                Err(CrawlerError::Cancelled) => {
                    tracing::warn!(owner, repo, "submission interrupted by cancellation");
                    break;
                }
                Err(e) => {
                    tracing::warn!(owner, repo, error = %e, "failed to submit task");
                    break;
                }
            }
        }

        let collected = collector.await.unwrap_or_default();

        let duration = start.elapsed();
        crate::metrics::record_task_duration("crawl", duration.as_secs_f64());
        tracing::info!(
            owner,
            repo,
            total,
            processed = collected.processed,
            skipped = collected.skipped,
            errors = collected.errors.len(),
            ?duration,
            "crawl completed"
        );

        Ok(CrawlResponse {
            total_files: total,
            processed_files: collected.processed,
            skipped_files: collected.skipped,
            errors: collected.errors,
            root_tree_sha,
            truncated,
            duration: format!("{:?}", duration),
            repo_info: RepositoryInfo {
                owner: owner.to_string(),
                name: repo.to_string(),
                ref_name: ref_name.to_string(),
            },
            files: collected.files,
        })
    }
}

/// Reads up to `total` results from the pool, stopping early on cancellation
async fn collect_results(pool: FetchPool, cancel: CancellationToken, total: usize) -> Collected {
    let mut collected = Collected::default();

    for _ in 0..total {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("collector cancelled while waiting for results");
                break;
            }
            r = pool.recv_result() => match r {
                Some(r) => r,
                None => break,
            }
        };

        match &result.failure {
            None => {
                collected.processed += 1;
                collected.files.push(result);
            }
            Some(failure) => {
                collected.skipped += 1;
                collected.errors.push(CrawlError {
                    file_path: result.path.clone(),
                    error: failure.to_string(),
                    error_type: failure.kind().to_string(),
                });
            }
        }
    }

    collected
}

/// Materializes the candidate task list from a tree listing
///
/// Only blob entries pass, and both the path-prefix filters and the
/// extension allow-list apply here, before any fetch is scheduled.
pub fn enumerate_candidates(
    listing: &TreeListing,
    owner: &str,
    repo: &str,
    ref_name: &str,
    path_filter: &[String],
    filter: &ContentFilter,
) -> Vec<FetchTask> {
    listing
        .tree
        .iter()
        .filter(|entry| entry.entry_type == "blob")
        .filter(|entry| filter.should_enumerate(&entry.path, path_filter))
        .map(|entry| FetchTask {
            path: entry.path.clone(),
            sha: entry.sha.clone(),
            size: entry.size.unwrap_or(0),
            owner: owner.to_string(),
            repo: repo.to_string(),
            ref_name: ref_name.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::model::TreeEntry;

    fn create_test_listing() -> TreeListing {
        TreeListing {
            sha: "root-sha".to_string(),
            truncated: false,
            tree: vec![
                TreeEntry {
                    path: "src".to_string(),
                    entry_type: "tree".to_string(),
                    sha: "t1".to_string(),
                    size: None,
                },
                TreeEntry {
                    path: "src/main.rs".to_string(),
                    entry_type: "blob".to_string(),
                    sha: "b1".to_string(),
                    size: Some(800),
                },
                TreeEntry {
                    path: "README.md".to_string(),
                    entry_type: "blob".to_string(),
                    sha: "b2".to_string(),
                    size: Some(120),
                },
                TreeEntry {
                    path: "logo.png".to_string(),
                    entry_type: "blob".to_string(),
                    sha: "b3".to_string(),
                    size: Some(4096),
                },
            ],
        }
    }

    fn create_test_filter(extensions: &[&str]) -> ContentFilter {
        ContentFilter::new(&FilterConfig {
            max_file_size: 10 * 1024 * 1024,
            allowed_extensions: extensions.iter().map(|s| s.to_string()).collect(),
            enable_binary_detection: true,
        })
    }

    #[test]
    fn test_enumerate_skips_tree_entries() {
        let listing = create_test_listing();
        let filter = create_test_filter(&[]);

        let tasks = enumerate_candidates(&listing, "octocat", "hello-world", "main", &[], &filter);
        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.path != "src"));
    }

    #[test]
    fn test_enumerate_applies_extension_filter() {
        let listing = create_test_listing();
        let filter = create_test_filter(&[".rs", ".md"]);

        let tasks = enumerate_candidates(&listing, "octocat", "hello-world", "main", &[], &filter);
        let paths: Vec<&str> = tasks.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths, vec!["src/main.rs", "README.md"]);
    }

    #[test]
    fn test_enumerate_applies_path_prefixes() {
        let listing = create_test_listing();
        let filter = create_test_filter(&[]);
        let prefixes = vec!["src/".to_string()];

        let tasks =
            enumerate_candidates(&listing, "octocat", "hello-world", "main", &prefixes, &filter);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].path, "src/main.rs");
    }

    #[test]
    fn test_enumerate_propagates_repo_identity() {
        let listing = create_test_listing();
        let filter = create_test_filter(&[]);

        let tasks = enumerate_candidates(&listing, "octocat", "hello-world", "dev", &[], &filter);
        for task in &tasks {
            assert_eq!(task.owner, "octocat");
            assert_eq!(task.repo, "hello-world");
            assert_eq!(task.ref_name, "dev");
        }
    }

    #[test]
    fn test_enumerate_defaults_missing_size_to_zero() {
        let listing = TreeListing {
            sha: "root".to_string(),
            truncated: false,
            tree: vec![TreeEntry {
                path: "weird".to_string(),
                entry_type: "blob".to_string(),
                sha: "b".to_string(),
                size: None,
            }],
        };
        let filter = create_test_filter(&[]);

        let tasks = enumerate_candidates(&listing, "o", "r", "main", &[], &filter);
        assert_eq!(tasks[0].size, 0);
    }
}
