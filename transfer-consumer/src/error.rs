use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use transfer::error::TransferError;

/// Returns whether terminal output should include backtraces.
fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

/// Result type for consumer operations.
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Captured backtrace wrapper for error variants without their own backtrace.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type for the consumer service.
///
/// Wraps [`TransferError`] for engine errors and provides variants for startup errors.
#[derive(Debug)]
pub enum ConsumerError {
    /// Reading, flushing or committing failed.
    Transfer(TransferError),
    /// Configuration error.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    /// The configuration asks for something this build does not include.
    Unsupported(&'static str, CapturedBacktrace),
    /// I/O error.
    Io(std::io::Error, CapturedBacktrace),
}

impl ConsumerError {
    /// Returns a short category label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            ConsumerError::Transfer(_) => "transfer error",
            ConsumerError::Config(_, _) => "configuration error",
            ConsumerError::Unsupported(_, _) => "unsupported configuration",
            ConsumerError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            ConsumerError::Transfer(err) => err.backtrace(),
            ConsumerError::Config(_, cb) => Some(&cb.0),
            ConsumerError::Unsupported(_, cb) => Some(&cb.0),
            ConsumerError::Io(_, cb) => Some(&cb.0),
        }
    }

    /// Creates a configuration error from any error.
    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        ConsumerError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    pub fn unsupported(what: &'static str) -> Self {
        ConsumerError::Unsupported(what, CapturedBacktrace::capture())
    }

    /// Returns a user-oriented report for terminal output.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("transfer consumer failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {}\n", self));

        // Aggregated transfer errors already list every failure in their display output.
        if !matches!(self, ConsumerError::Transfer(err) if err.errors().is_some()) {
            let mut source = Error::source(self);
            let mut idx = 1usize;
            while let Some(err) = source {
                out.push_str(&format!("cause {idx}: {err}\n"));
                source = err.source();
                idx += 1;
            }
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for ConsumerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerError::Transfer(err) => write!(f, "{err}"),
            ConsumerError::Config(source, _) => write!(f, "configuration error: {source}"),
            ConsumerError::Unsupported(what, _) => {
                write!(f, "{what} is not supported by this build")
            }
            ConsumerError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for ConsumerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConsumerError::Transfer(err) => err.source(),
            ConsumerError::Config(source, _) => Some(source.as_ref()),
            ConsumerError::Unsupported(_, _) => None,
            ConsumerError::Io(source, _) => Some(source),
        }
    }
}

impl From<std::io::Error> for ConsumerError {
    fn from(err: std::io::Error) -> Self {
        ConsumerError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<TransferError> for ConsumerError {
    fn from(err: TransferError) -> Self {
        ConsumerError::Transfer(err)
    }
}
