//! How far each upstream has been indexed.

use serde::Serialize;
use typereg_store::Repository;
use typereg_store::models::CommitMark;

use crate::Upstream;
use crate::error::{ErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub upstream: Upstream,
    pub url: String,
    /// Newest commit whose changes have all been handed to the indexer.
    pub latest: Option<CommitMark>,
}

/// Watermark of `upstream`, keyed by the repository `url` it is mirrored
/// from. Reads the store only; no mirror is touched.
pub async fn status(repo: &Repository, upstream: Upstream, url: &str) -> Result<Status> {
    let latest = repo.latest_commit(url).await.map_err(ErrorKind::store)?;
    Ok(Status { upstream, url: url.to_string(), latest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::mark_commit;
    use crate::index::tests::context;
    use serde_json::json;

    #[tokio::test]
    async fn test_status_before_anything_is_indexed() {
        let (ctx, _mirror) = context(Upstream::DefinitelyTyped).await;
        let status = status(&ctx.repo, ctx.upstream, ctx.repo_url()).await.unwrap();
        assert_eq!(status.latest, None);
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"upstream": "definitely-typed", "url": "mock://definitely-typed", "latest": null})
        );
    }

    #[tokio::test]
    async fn test_status_reports_latest_marked_commit() {
        let (ctx, mirror) = context(Upstream::Registry).await;
        mirror.commit("c1", 1_700_000_000, [("npm/a.json", Some("{}"))]).await;
        mirror.commit("c2", 1_700_086_400, [("npm/b.json", Some("{}"))]).await;
        mark_commit(&ctx, "c1").await.unwrap();
        mark_commit(&ctx, "c2").await.unwrap();

        let status = status(&ctx.repo, ctx.upstream, ctx.repo_url()).await.unwrap();
        let latest = status.latest.unwrap();
        assert_eq!(latest.commit, "c2");
        assert_eq!(latest.date.unix_timestamp(), 1_700_086_400);
        assert_eq!(status.upstream, Upstream::Registry);
        assert_eq!(status.url, "mock://registry");
    }
}
