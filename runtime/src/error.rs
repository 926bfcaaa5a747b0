use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while classifying arguments, compiling or launching.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The external tile compiler failed. Its diagnostics are opaque to the
    /// runtime and reported verbatim.
    #[snafu(display("tile compiler failed: {diagnostic}"))]
    Compiler { diagnostic: String },

    /// The classifier met a value category it cannot marshal.
    #[snafu(display("unsupported argument: {reason}"))]
    UnsupportedArgument { reason: String },

    /// The argument pack does not agree with the entry point's static
    /// signature.
    #[snafu(display("static signature mismatch: {reason}"))]
    SignatureMismatch { reason: String },

    /// A backend operation failed.
    #[snafu(display("{source}"))]
    Backend { source: tilebind_backend::Error },
}
