use typereg_extract::Classifier;
use typereg_mirror::MirrorHandle;
use typereg_store::Repository;

use crate::Upstream;

/// Everything a job needs to process changes from one upstream.
#[derive(Clone)]
pub struct Context {
    pub upstream: Upstream,
    pub mirror: MirrorHandle,
    pub repo: Repository,
}

impl Context {
    pub fn new(upstream: Upstream, mirror: MirrorHandle, repo: Repository) -> Self {
        Self { upstream, mirror, repo }
    }

    pub fn classifier(&self) -> Classifier {
        self.upstream.classifier()
    }

    /// Watermark key for this upstream.
    pub fn repo_url(&self) -> &str {
        self.mirror.url()
    }
}
