//! JSON registry: one document lists every version of one entry.

use time::UtcDateTime;
use tracing::warn;
use typereg_extract::consts::REGISTRY_BYTES;
use typereg_extract::models::Action;
use typereg_extract::{registry_entry, registry_path};
use typereg_store::Deprecation;

use super::{FileOutcome, read};
use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::job::FileJob;

pub(super) async fn index(ctx: &Context, job: &FileJob, action: Action, at: UtcDateTime) -> Result<FileOutcome> {
    let path = job.change.path.as_str();
    let (source, name) = match registry_path(path) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(error = ?err, "unusable registry path");
            return Ok(FileOutcome::Skipped { reason: "unknown source" });
        },
    };

    if action == Action::Deprecate {
        let mut tx = ctx.repo.transaction().await.map_err(ErrorKind::store)?;
        let versions = tx
            .deprecate(Deprecation::Entry { name: &name, source }, at)
            .await
            .map_err(ErrorKind::store)?;
        tx.commit().await.map_err(ErrorKind::store)?;
        return Ok(FileOutcome::Deprecated { versions });
    }

    let Some(bytes) = read(ctx, path, &job.commit, REGISTRY_BYTES).await? else {
        warn!("registry document missing at its own commit");
        return Ok(FileOutcome::Skipped { reason: "missing at commit" });
    };
    let entry = match registry_entry(&bytes) {
        Ok(entry) => entry,
        Err(err) => {
            warn!(error = ?err, "malformed registry document");
            return Ok(FileOutcome::Skipped { reason: "malformed document" });
        },
    };
    // Older documents have no versions map and nothing to index.
    let Some(versions) = entry.versions else {
        return Ok(FileOutcome::Skipped { reason: "no versions" });
    };

    let mut tx = ctx.repo.transaction().await.map_err(ErrorKind::store)?;
    let written = tx
        .upsert_entry(&name, source, entry.homepage.as_deref(), at)
        .await
        .map_err(ErrorKind::store)?;
    let Some(entry_id) = written.id() else {
        return Ok(FileOutcome::Skipped { reason: "entry rejected" });
    };
    let mut applied = 0;
    for version in &versions {
        if tx.upsert_version(entry_id, version, at).await.map_err(ErrorKind::store)?.is_applied() {
            applied += 1;
        }
    }
    let locations: Vec<String> = versions.into_iter().map(|version| version.location).collect();
    tx.deprecate(Deprecation::EntryExcept { entry_id, locations: &locations }, at)
        .await
        .map_err(ErrorKind::store)?;
    tx.commit().await.map_err(ErrorKind::store)?;

    Ok(FileOutcome::Indexed { source, name, versions: applied })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Upstream;
    use crate::index::index_file;
    use crate::index::tests::{context, file};
    use rstest::rstest;
    use typereg_extract::models::{Disposition, Source};
    use typereg_store::error::ErrorKind as StoreErrorKind;

    const T1: i64 = 1_700_000_000;
    const T2: i64 = 1_700_086_400;
    const LEFT_PAD: &str = "npm/left-pad.json";

    #[tokio::test]
    async fn test_document_replacing_versions_deprecates_missing_ones() {
        let (ctx, mirror) = context(Upstream::Registry).await;
        mirror
            .commit("c1", T1, [(LEFT_PAD, Some(r#"{"versions": {"1.0.0": "github:foo/left-pad#abc"}}"#))])
            .await;
        mirror
            .commit("c2", T2, [(LEFT_PAD, Some(r#"{"versions": {"2.0.0": "github:foo/left-pad#def"}}"#))])
            .await;

        let outcome = index_file(&ctx, &file("c1", Disposition::Added, LEFT_PAD)).await.unwrap();
        assert_eq!(outcome, FileOutcome::Indexed {
            source: Source::Npm,
            name: "left-pad".to_string(),
            versions: 1,
        });
        let versions = ctx.repo.get_versions(Source::Npm, "left-pad", None).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, "1.0.0");
        assert_eq!(versions[0].location, "github:foo/left-pad#abc");
        let first = versions[0].tag.clone();

        index_file(&ctx, &file("c2", Disposition::Modified, LEFT_PAD)).await.unwrap();
        let versions = ctx.repo.get_versions(Source::Npm, "left-pad", None).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, "2.0.0");

        // Retired, not removed.
        let retired = ctx.repo.get_tag(Source::Npm, "left-pad", &first).await.unwrap();
        assert_eq!(retired.deprecated.map(|at| at.unix_timestamp()), Some(T2));
        let entry = ctx.repo.get_entry(Source::Npm, "left-pad").await.unwrap();
        assert_eq!(entry.homepage.as_deref(), Some("https://www.npmjs.com/package/left-pad"));
    }

    #[tokio::test]
    async fn test_unchanged_document_keeps_one_version() {
        let (ctx, mirror) = context(Upstream::Registry).await;
        let document = r#"{"versions": {"1.0.0": "github:foo/left-pad#abc"}}"#;
        mirror.commit("c1", T1, [(LEFT_PAD, Some(document))]).await;
        // Later commit touches the file without changing what it lists.
        mirror.commit("c2", T2, [(LEFT_PAD, Some(document))]).await;

        index_file(&ctx, &file("c1", Disposition::Added, LEFT_PAD)).await.unwrap();
        let first = ctx.repo.get_versions(Source::Npm, "left-pad", None).await.unwrap();
        index_file(&ctx, &file("c2", Disposition::Modified, LEFT_PAD)).await.unwrap();
        // Replays of either commit change nothing.
        index_file(&ctx, &file("c1", Disposition::Added, LEFT_PAD)).await.unwrap();
        index_file(&ctx, &file("c2", Disposition::Modified, LEFT_PAD)).await.unwrap();

        let versions = ctx.repo.get_versions(Source::Npm, "left-pad", None).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].tag, first[0].tag);
        assert_eq!(versions[0].updated.unix_timestamp(), T2);
        assert_eq!(versions[0].deprecated, None);
    }

    #[tokio::test]
    async fn test_deleted_document_deprecates_entry() {
        let (ctx, mirror) = context(Upstream::Registry).await;
        let document = r#"{"homepage": "https://example.com", "versions": {"1.0.0": "a", "1.1.0": ["b", {"location": "c", "compiler": "2.0"}]}}"#;
        mirror.commit("c1", T1, [("global/jquery.json", Some(document))]).await;
        mirror.commit("c2", T2, [("global/jquery.json", None)]).await;

        let outcome = index_file(&ctx, &file("c1", Disposition::Added, "global/jquery.json")).await.unwrap();
        assert!(matches!(outcome, FileOutcome::Indexed { versions: 3, .. }));

        let outcome = index_file(&ctx, &file("c2", Disposition::Deleted, "global/jquery.json")).await.unwrap();
        assert_eq!(outcome, FileOutcome::Deprecated { versions: 3 });
        let err = ctx.repo.get_versions(Source::Global, "jquery", None).await.unwrap_err();
        assert!(matches!(&*err, StoreErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stale_document_does_not_resurrect_versions() {
        let (ctx, mirror) = context(Upstream::Registry).await;
        mirror
            .commit("c1", T1, [(LEFT_PAD, Some(r#"{"versions": {"1.0.0": "github:foo/left-pad#abc"}}"#))])
            .await;
        mirror
            .commit("c2", T2, [(LEFT_PAD, Some(r#"{"versions": {"2.0.0": "github:foo/left-pad#def"}}"#))])
            .await;

        index_file(&ctx, &file("c2", Disposition::Modified, LEFT_PAD)).await.unwrap();
        index_file(&ctx, &file("c1", Disposition::Added, LEFT_PAD)).await.unwrap();

        let versions = ctx.repo.get_versions(Source::Npm, "left-pad", None).await.unwrap();
        let listed: Vec<&str> = versions.iter().map(|v| v.version.as_str()).collect();
        assert_eq!(listed, vec!["2.0.0"]);
    }

    #[rstest]
    #[case::not_json("{ not json", "malformed document")]
    #[case::wrong_shape(r#"{"versions": {"1.0.0": 42}}"#, "malformed document")]
    #[case::no_versions(r#"{"homepage": "https://example.com"}"#, "no versions")]
    #[tokio::test]
    async fn test_unusable_document_is_skipped(#[case] document: &str, #[case] reason: &'static str) {
        let (ctx, mirror) = context(Upstream::Registry).await;
        mirror.commit("c1", T1, [(LEFT_PAD, Some(document))]).await;

        let outcome = index_file(&ctx, &file("c1", Disposition::Added, LEFT_PAD)).await.unwrap();
        assert_eq!(outcome, FileOutcome::Skipped { reason });
        assert!(ctx.repo.get_entry(Source::Npm, "left-pad").await.is_err());
    }
}
