use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Error type for portage-depgraph parsing and resolution.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid package version string.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// Invalid package dependency specification.
    #[error("invalid atom: {0}")]
    InvalidAtom(String),

    /// Invalid dependency expression (`DEPEND`, `RDEPEND`, ...).
    #[error("invalid dependency expression: {0}")]
    InvalidDependency(String),

    /// Invalid EAPI value.
    #[error("invalid EAPI: {0}")]
    InvalidEapi(String),

    /// Invalid keyword string.
    #[error("invalid keyword: {0}")]
    InvalidKeyword(String),

    /// Invalid IUSE flag entry.
    #[error("invalid IUSE entry: {0}")]
    InvalidIUse(String),

    /// Invalid SRC_URI expression.
    #[error("invalid SRC_URI: {0}")]
    InvalidSrcUri(String),

    /// Malformed `Manifest` file.
    #[error("invalid Manifest {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },

    /// Syntax error in a shell-style configuration file or line-based list.
    #[error("{location}: {message}")]
    Syntax { location: String, message: String },

    /// Invalid TOML configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An operation is undefined under `^^` or `??` groups.
    #[error("ambiguous dependency expression: {0}")]
    Ambiguous(String),

    /// Alternatives remain after `||` selection.
    #[error("non-deterministic dependencies: {0}")]
    NondeterministicDeps(String),

    /// No package version satisfies the atom.
    #[error("no package satisfies {atom}")]
    NoCandidate { atom: String },

    /// A label was re-entered while still being resolved.
    #[error("circular dependencies involving {label} detected")]
    Cycle { label: String },

    /// Two dependents selected different versions for the same label.
    #[error("inconsistent package selection for {label}: got {got}, want {want}")]
    InconsistentSelection {
        label: String,
        got: String,
        want: String,
    },

    /// A profile reference could not be resolved.
    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    /// An overlay could not be loaded.
    #[error("repository {path}: {message}")]
    Repository { path: PathBuf, message: String },

    /// An ebuild lives outside the configured source root.
    #[error("{path} is not under {root}")]
    OutsideSourceRoot { path: PathBuf, root: PathBuf },

    /// The input uses a feature that is deliberately not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Filesystem error on an expected input.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// JSON (de)serialization error for dependency data.
    #[error("dependency data: {0}")]
    Json(#[from] serde_json::Error),

    /// An error remembered by a cache and returned again.
    #[error(transparent)]
    Shared(Arc<Error>),

    /// An error raised while resolving a specific atom or label.
    #[error("{context}: {source}")]
    Resolving {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn resolving(context: impl Into<String>, source: Error) -> Self {
        Error::Resolving {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, skipping [`Error::Resolving`] context layers
    /// and [`Error::Shared`] wrappers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Resolving { source, .. } => source.root_cause(),
            Error::Shared(source) => source.root_cause(),
            other => other,
        }
    }

    /// Whether this error is a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Result type for portage-depgraph operations.
pub type Result<T> = std::result::Result<T, Error>;
