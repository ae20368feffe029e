//! Error taxonomy and pretty-printing.
//!
//! Mirrors the shape of a typical compiler front-end error type: a `Reason`
//! enum enumerating each way a pipeline can fail to resolve or translate,
//! wrapped in an `Error` that tracks the path of IR nodes leading to the
//! fault and an optional help string. `compile`/`catalog.compile` downcast
//! whatever `anyhow::Error` bubbles up into a list of `ErrorMessage`s fit for
//! a caller to render.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

pub use anyhow::Result;

/// A single step in the IR path leading to an error, e.g. `Select -> Get(x)`.
pub type Path = Vec<String>;

#[derive(Debug, Clone)]
pub struct Error {
    pub path: Path,
    pub reason: Reason,
    pub help: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Reason {
    /// Two `Select`/`Define`/`With`/`Bind`/`Group`/`Partition` items share a label.
    DuplicateLabel { name: String },
    /// A `Get` found no matching column in its input type.
    CannotFind { name: String },
    /// A `Get` matched more than one column without `As` disambiguation.
    Ambiguous { name: String },
    /// A `Get` whose inner chain could not find its base.
    OrphanReference { name: String },
    /// `Iterate`'s seed and iterator row shapes differ.
    RecursionShapeError,
    /// A known function was called with the wrong number of arguments.
    InvalidArity {
        name: String,
        got: usize,
        expected: String,
    },
    /// A dialect lacks a capability a node requires (e.g. `LATERAL`).
    DialectCapability { feature: String },
    /// The compiled-query cache overflowed under a caller-imposed hard cap.
    CacheOverflow,
    /// Anything else, carried as plain text (construction-time checks mostly).
    Simple(String),
}

impl Error {
    pub fn new(reason: Reason) -> Self {
        Error {
            path: Vec::new(),
            reason,
            help: None,
        }
    }

    pub fn with_help<S: Into<String>>(mut self, help: S) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn with_path_segment<S: Into<String>>(mut self, segment: S) -> Self {
        self.path.insert(0, segment.into());
        self
    }
}

impl Display for Reason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Reason::DuplicateLabel { name } => write!(f, "duplicate label `{name}`"),
            Reason::CannotFind { name } => write!(f, "cannot find column `{name}`"),
            Reason::Ambiguous { name } => write!(f, "ambiguous reference to column `{name}`"),
            Reason::OrphanReference { name } => {
                write!(f, "`{name}` refers to a base that does not exist")
            }
            Reason::RecursionShapeError => {
                write!(f, "iterator output row does not match the seed row")
            }
            Reason::InvalidArity {
                name,
                got,
                expected,
            } => write!(f, "`{name}` takes {expected} argument(s), got {got}"),
            Reason::DialectCapability { feature } => {
                write!(f, "the target dialect does not support {feature}")
            }
            Reason::CacheOverflow => write!(f, "compiled-query cache overflowed"),
            Reason::Simple(s) => write!(f, "{s}"),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)?;
        if !self.path.is_empty() {
            write!(f, " (at {})", self.path.join(" -> "))?;
        }
        if let Some(help) = &self.help {
            write!(f, "\nhelp: {help}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// A rendered, caller-facing error, detached from `anyhow`'s backtrace machinery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub reason: String,
    pub hint: Option<String>,
    pub path: Path,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorMessages {
    pub inner: Vec<ErrorMessage>,
}

impl Display for ErrorMessages {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, e) in self.inner.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", e.reason)?;
            if let Some(hint) = &e.hint {
                write!(f, "\nhelp: {hint}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ErrorMessages {}

/// Downcast an opaque `anyhow::Error` (possibly our own [Error], possibly
/// not) into the caller-facing [ErrorMessages] shape.
pub fn downcast(error: anyhow::Error) -> ErrorMessages {
    let message = match error.downcast::<Error>() {
        Ok(error) => ErrorMessage {
            reason: error.reason.to_string(),
            hint: error.help.clone(),
            path: error.path.clone(),
        },
        Err(error) => ErrorMessage {
            reason: error.to_string(),
            hint: None,
            path: Vec::new(),
        },
    };
    ErrorMessages {
        inner: vec![message],
    }
}

/// Render a list of errors as a multi-line report. Used by callers that
/// want pretty-printed diagnostics rather than the bare [Display] impl.
pub fn pretty_print(errors: &ErrorMessages) -> String {
    let mut out = String::new();
    for e in &errors.inner {
        out.push_str("Error: ");
        out.push_str(&e.reason);
        if !e.path.is_empty() {
            out.push_str(&format!(" (at {})", e.path.join(" -> ")));
        }
        if let Some(hint) = &e.hint {
            out.push_str(&format!("\n  help: {hint}"));
        }
        out.push('\n');
    }
    out
}
