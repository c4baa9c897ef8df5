use crate::domain::{ObjectKey, ResourceKind};
use derive_more::From;
use k8s_openapi::serde_json;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    /// Watch or list against the remote API failed; fatal to one namespace loop only
    Connection(String),

    /// `connect` has not completed on the remote client
    NotConnected,

    /// Initial population of a namespace did not finish before its deadline
    SyncTimeout { namespace: String },

    /// A raw object could not be fully converted into a `Resource`
    Conversion(String),

    /// The object does not exist upstream
    NotFound(ObjectKey),

    /// No cache region/store exists for the namespace and kind
    StoreNotFound { namespace: String, kind: ResourceKind },

    /// The business step failed; reconciliation will be retried
    Reconcile(String),

    /// A store lock was poisoned by a panicking writer
    LockPoisoned(String),

    UnsupportedKind(String),

    /// Custom error message
    Custom(String),
}

impl Error {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        write!(fmt, "{self:?}")
    }
}

impl std::error::Error for Error {}
