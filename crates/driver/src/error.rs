use thiserror::Error;

/// Errors surfaced by the protocol drivers.
///
/// This crate introduces no new error kinds beyond the shared
/// taxonomy in [`dkls_protocol::Error`]; it only adds the context a
/// driver has available (round number, party index) before
/// propagating.
#[derive(Debug, Error)]
pub enum Error {
    /// Wraps the shared protocol error taxonomy unchanged.
    #[error(transparent)]
    Protocol(#[from] dkls_protocol::Error),
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
