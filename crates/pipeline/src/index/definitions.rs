//! DefinitelyTyped: one `.d.ts` file is one version of one `dt` entry.

use time::UtcDateTime;
use tracing::warn;
use typereg_extract::consts::{HEADER_BYTES, PROJECT_CONFIG};
use typereg_extract::models::{Action, RegistryVersion, Source};
use typereg_extract::{Layout, definition, location, location_prefix};
use typereg_store::Deprecation;

use super::{FileOutcome, read};
use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::job::FileJob;

pub(super) async fn index(ctx: &Context, job: &FileJob, action: Action, at: UtcDateTime) -> Result<FileOutcome> {
    let path = job.change.path.as_str();
    // Versions of this file from every earlier commit.
    let prefix = location_prefix(path);

    if action == Action::Deprecate {
        let mut tx = ctx.repo.transaction().await.map_err(ErrorKind::store)?;
        let versions = tx
            .deprecate(Deprecation::LocationPrefix(&prefix), at)
            .await
            .map_err(ErrorKind::store)?;
        tx.commit().await.map_err(ErrorKind::store)?;
        return Ok(FileOutcome::Deprecated { versions });
    }

    let layout = layout(ctx, path, &job.commit).await?;
    let Some(header) = read(ctx, path, &job.commit, HEADER_BYTES).await? else {
        warn!("definition file missing at its own commit");
        return Ok(FileOutcome::Skipped { reason: "missing at commit" });
    };
    let header = String::from_utf8_lossy(&header);
    let Some(definition) = definition(path, &header, layout) else {
        return Ok(FileOutcome::Skipped { reason: "secondary definition file" });
    };
    let version = RegistryVersion {
        version: definition.version,
        location: location(path, &job.commit),
        compiler: None,
        description: None,
    };

    let mut tx = ctx.repo.transaction().await.map_err(ErrorKind::store)?;
    let entry = tx
        .upsert_entry(&definition.name, Source::Dt, definition.homepage.as_deref(), at)
        .await
        .map_err(ErrorKind::store)?;
    let Some(entry_id) = entry.id() else {
        return Ok(FileOutcome::Skipped { reason: "entry rejected" });
    };
    let written = tx.upsert_version(entry_id, &version, at).await.map_err(ErrorKind::store)?;
    tx.deprecate(Deprecation::LocationPrefix(&prefix), at)
        .await
        .map_err(ErrorKind::store)?;
    tx.commit().await.map_err(ErrorKind::store)?;

    Ok(FileOutcome::Indexed {
        source: Source::Dt,
        name: definition.name,
        versions: usize::from(written.is_applied()),
    })
}

/// A project config next to the file means the directory is the package.
async fn layout(ctx: &Context, path: &str, commit: &str) -> Result<Layout> {
    let Some((dir, _)) = path.rsplit_once('/') else {
        return Ok(Layout::Legacy);
    };
    let config = format!("{dir}/{PROJECT_CONFIG}");
    match ctx.mirror.exists_at(&config, commit).await.map_err(ErrorKind::mirror)? {
        true => Ok(Layout::Modern),
        false => Ok(Layout::Legacy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Upstream;
    use crate::index::index_file;
    use crate::index::tests::{context, file};
    use typereg_extract::models::Disposition;
    use typereg_store::error::ErrorKind as StoreErrorKind;

    const T1: i64 = 1_700_000_000;
    const T2: i64 = 1_700_086_400;
    const REACT_DOM: &str = "react/react-dom-15.0.0.d.ts";
    const REACT_DOM_HEADER: &str = "// Type definitions for react-dom v15.0.1\n// Project: http://facebook.github.io/react/\n\ndeclare namespace __React {}\n";

    #[tokio::test]
    async fn test_added_file_creates_entry_and_version() {
        let (ctx, mirror) = context(Upstream::DefinitelyTyped).await;
        mirror.commit("c1", T1, [(REACT_DOM, Some(REACT_DOM_HEADER))]).await;

        let outcome = index_file(&ctx, &file("c1", Disposition::Added, REACT_DOM)).await.unwrap();
        assert_eq!(outcome, FileOutcome::Indexed {
            source: Source::Dt,
            name: "react-dom".to_string(),
            versions: 1,
        });

        let entry = ctx.repo.get_entry(Source::Dt, "react-dom").await.unwrap();
        assert_eq!(entry.homepage.as_deref(), Some("http://facebook.github.io/react/"));
        assert_eq!(entry.updated.unix_timestamp(), T1);
        let versions = ctx.repo.get_versions(Source::Dt, "react-dom", None).await.unwrap();
        assert_eq!(versions.len(), 1);
        // The header wins over the file name.
        assert_eq!(versions[0].version, "15.0.1");
        assert_eq!(versions[0].location, location(REACT_DOM, "c1"));
        assert_eq!(versions[0].deprecated, None);
    }

    #[tokio::test]
    async fn test_deleted_file_deprecates_version() {
        let (ctx, mirror) = context(Upstream::DefinitelyTyped).await;
        mirror.commit("c1", T1, [(REACT_DOM, Some(REACT_DOM_HEADER))]).await;
        mirror.commit("c2", T2, [(REACT_DOM, None)]).await;

        index_file(&ctx, &file("c1", Disposition::Added, REACT_DOM)).await.unwrap();
        let tag = ctx.repo.get_versions(Source::Dt, "react-dom", None).await.unwrap()[0].tag.clone();

        let outcome = index_file(&ctx, &file("c2", Disposition::Deleted, REACT_DOM)).await.unwrap();
        assert_eq!(outcome, FileOutcome::Deprecated { versions: 1 });

        let version = ctx.repo.get_tag(Source::Dt, "react-dom", &tag).await.unwrap();
        assert_eq!(version.deprecated.map(|at| at.unix_timestamp()), Some(T2));
        let err = ctx.repo.get_versions(Source::Dt, "react-dom", None).await.unwrap_err();
        assert!(matches!(&*err, StoreErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_deletion_processed_first_still_wins() {
        let (ctx, mirror) = context(Upstream::DefinitelyTyped).await;
        mirror.commit("c1", T1, [(REACT_DOM, Some(REACT_DOM_HEADER))]).await;
        mirror.commit("c2", T2, [(REACT_DOM, None)]).await;

        index_file(&ctx, &file("c2", Disposition::Deleted, REACT_DOM)).await.unwrap();
        index_file(&ctx, &file("c1", Disposition::Added, REACT_DOM)).await.unwrap();

        let err = ctx.repo.get_versions(Source::Dt, "react-dom", None).await.unwrap_err();
        assert!(matches!(&*err, StoreErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_modified_file_supersedes_previous_version() {
        let (ctx, mirror) = context(Upstream::DefinitelyTyped).await;
        mirror.commit("c1", T1, [("jquery/jquery.d.ts", Some("// Type definitions for jQuery 1.10.x\n"))]).await;
        mirror.commit("c2", T2, [("jquery/jquery.d.ts", Some("// Type definitions for jQuery 2.0\n"))]).await;

        index_file(&ctx, &file("c1", Disposition::Added, "jquery/jquery.d.ts")).await.unwrap();
        index_file(&ctx, &file("c2", Disposition::Modified, "jquery/jquery.d.ts")).await.unwrap();

        let versions = ctx.repo.get_versions(Source::Dt, "jquery", None).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, "2.0.0");
        assert_eq!(versions[0].location, location("jquery/jquery.d.ts", "c2"));
    }

    #[tokio::test]
    async fn test_concurrent_replay_writes_one_version() {
        let (ctx, mirror) = context(Upstream::DefinitelyTyped).await;
        mirror.commit("c1", T1, [(REACT_DOM, Some(REACT_DOM_HEADER))]).await;

        let job = file("c1", Disposition::Added, REACT_DOM);
        let (first, second) = tokio::join!(index_file(&ctx, &job), index_file(&ctx, &job));
        first.unwrap();
        second.unwrap();
        index_file(&ctx, &job).await.unwrap();

        let versions = ctx.repo.get_versions(Source::Dt, "react-dom", None).await.unwrap();
        assert_eq!(versions.len(), 1);
    }

    #[tokio::test]
    async fn test_modern_layout_uses_package_directory() {
        let (ctx, mirror) = context(Upstream::DefinitelyTyped).await;
        mirror
            .commit("c1", T1, [
                ("react/index.d.ts", Some("// Type definitions for React 16.4\n")),
                ("react/global.d.ts", Some("interface Window {}\n")),
                ("react/tsconfig.json", Some("{}")),
            ])
            .await;

        let outcome = index_file(&ctx, &file("c1", Disposition::Added, "react/index.d.ts")).await.unwrap();
        assert!(matches!(outcome, FileOutcome::Indexed { ref name, .. } if name == "react"));
        let outcome = index_file(&ctx, &file("c1", Disposition::Added, "react/global.d.ts")).await.unwrap();
        assert_eq!(outcome, FileOutcome::Skipped { reason: "secondary definition file" });

        let versions = ctx.repo.get_versions(Source::Dt, "react", None).await.unwrap();
        assert_eq!(versions[0].version, "16.4.0");
    }

    #[tokio::test]
    async fn test_read_failure_is_retryable() {
        let (ctx, mirror) = context(Upstream::DefinitelyTyped).await;
        mirror.commit("c1", T1, [(REACT_DOM, Some(REACT_DOM_HEADER))]).await;
        mirror.fail_next_reads(1);

        let err = index_file(&ctx, &file("c1", Disposition::Added, REACT_DOM)).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(index_file(&ctx, &file("c1", Disposition::Added, REACT_DOM)).await.is_ok());
    }
}
