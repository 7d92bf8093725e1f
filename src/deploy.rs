// Deployment orchestrator: walk -> archive -> temp artifact -> upload.
//
// Each stage returns a typed result; the first failure moves the run to
// `Failed`. The temp artifact is released on entering either terminal
// state.

use std::path::{Path, PathBuf};

use crate::api::{UploadResult, Uploader};
use crate::archive::{self, ArchiveReport};
use crate::artifact::{SealedArtifact, TempArtifact, ARTIFACT_PREFIX, ARTIFACT_SUFFIX};
use crate::error::DeployError;
use crate::token::TokenStore;
use crate::walker::{self, WalkOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Idle,
    Packaging,
    Packaged,
    Uploading,
    Done,
    Failed,
}

impl DeployState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeployState::Done | DeployState::Failed)
    }
}

/// Result of one deploy attempt.
#[derive(Debug)]
pub struct DeployOutcome {
    /// Every state visited, `Idle` first, terminal state last.
    pub transitions: Vec<DeployState>,
    /// Project files packaged, the runtime config excluded.
    pub files: usize,
    pub archive: Option<ArchiveReport>,
    pub error: Option<DeployError>,
}

impl DeployOutcome {
    pub fn state(&self) -> DeployState {
        self.transitions.last().copied().unwrap_or(DeployState::Idle)
    }

    pub fn succeeded(&self) -> bool {
        self.state() == DeployState::Done
    }
}

/// Runs deploys for one uploader and token store.
pub struct Deployer<'a, U: Uploader + ?Sized> {
    uploader: &'a U,
    tokens: &'a dyn TokenStore,
    ignore: Vec<String>,
    temp_dir: Option<PathBuf>,
}

impl<'a, U: Uploader + ?Sized> Deployer<'a, U> {
    pub fn new(uploader: &'a U, tokens: &'a dyn TokenStore) -> Self {
        Self {
            uploader,
            tokens,
            ignore: walker::DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect(),
            temp_dir: None,
        }
    }

    /// Directory for temp artifacts instead of the system default.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Package `root` and upload it.
    pub fn run(&self, root: &Path) -> DeployOutcome {
        let mut run = Run {
            transitions: vec![DeployState::Idle],
            files: 0,
            archive: None,
        };

        let error = match self.package(root, &mut run) {
            Ok(sealed) => {
                let result = self.upload(&sealed, &mut run);
                release(sealed);
                result.err()
            }
            Err(e) => Some(e),
        };

        match &error {
            None => run.enter(DeployState::Done),
            Some(e) => {
                tracing::warn!(error = %e, state = ?run.current(), "deploy failed");
                run.enter(DeployState::Failed);
            }
        }

        DeployOutcome {
            transitions: run.transitions,
            files: run.files,
            archive: run.archive,
            error,
        }
    }

    fn package(&self, root: &Path, run: &mut Run) -> Result<SealedArtifact, DeployError> {
        run.enter(DeployState::Packaging);

        let options = WalkOptions::new(root).with_ignore(self.ignore.iter().cloned());
        let files = walker::walk(&options)?;
        run.files = files.len();

        let mut artifact = self.allocate()?;
        // On error `artifact` drops here, which deletes the file.
        let (_, report) = archive::build(&files, artifact.writer())?;
        let sealed = artifact
            .seal()
            .map_err(|e| DeployError::ArchiveWrite(format!("cannot flush package: {e}")))?;

        tracing::info!(
            files = run.files,
            bytes = report.compressed_bytes,
            path = %sealed.path().display(),
            "package sealed"
        );
        run.archive = Some(report);
        run.enter(DeployState::Packaged);
        Ok(sealed)
    }

    fn upload(&self, sealed: &SealedArtifact, run: &mut Run) -> Result<(), DeployError> {
        run.enter(DeployState::Uploading);

        let token = match self.tokens.get() {
            Ok(Some(token)) => token,
            Ok(None) => return Err(DeployError::MissingToken),
            Err(e) => {
                tracing::warn!(error = %e, "token store unreadable");
                return Err(DeployError::MissingToken);
            }
        };

        let reader = sealed
            .open_for_read()
            .map_err(|e| DeployError::ArchiveWrite(format!("cannot reopen package: {e}")))?;

        match self.uploader.upload(reader, &token) {
            UploadResult::Accepted => Ok(()),
            UploadResult::Rejected { messages } => Err(DeployError::Validation(messages)),
            network @ UploadResult::Network { .. } => Err(DeployError::Network(
                network.error_messages().join("; "),
            )),
        }
    }

    fn allocate(&self) -> Result<TempArtifact, DeployError> {
        let allocated = match &self.temp_dir {
            Some(dir) => TempArtifact::allocate_in(dir, ARTIFACT_PREFIX, ARTIFACT_SUFFIX),
            None => TempArtifact::allocate(ARTIFACT_PREFIX, ARTIFACT_SUFFIX),
        };
        allocated.map_err(|e| DeployError::ArchiveWrite(format!("cannot create temp file: {e}")))
    }
}

fn release(sealed: SealedArtifact) {
    let path = sealed.path().to_path_buf();
    if let Err(e) = sealed.release() {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove temp artifact");
    }
}

struct Run {
    transitions: Vec<DeployState>,
    files: usize,
    archive: Option<ArchiveReport>,
}

impl Run {
    fn current(&self) -> DeployState {
        self.transitions.last().copied().unwrap_or(DeployState::Idle)
    }

    fn enter(&mut self, next: DeployState) {
        tracing::debug!(from = ?self.current(), to = ?next, "deploy state");
        self.transitions.push(next);
    }
}
