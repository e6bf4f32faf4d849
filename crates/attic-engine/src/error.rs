use std::fmt;

/// Engine-level failure.
///
/// Library operations return this type; the application boundary wraps it in
/// `anyhow::Error` with additional context.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Wiring or usage mistake (unmatched vertex layout, self-parenting a
    /// transform, double attach/detach, ...).
    Config(String),

    /// The scheduler is not running.
    NotRunning,

    /// The scheduler is already running.
    AlreadyRunning,

    /// A geometry buffer cannot hold the requested number of bytes, even after
    /// defragmentation.
    OutOfSpace { requested: usize, free: usize },

    /// A render-graph value had a different type than the consumer expected.
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A node does not declare an input with this name, or the input was never set.
    UnknownInput(String),

    /// A node does not declare an output with this name.
    UnknownOutput(String),

    /// An upstream node produced the invalid sentinel for this input.
    UpstreamFailed(String),

    /// The render graph contains a dependency cycle.
    Cycle,

    /// The render path produced the invalid sentinel; carries the drained device log.
    RenderFailure(String),

    /// Device-side failure outside of the render graph.
    Device(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::NotRunning => f.write_str("scheduler is not running"),
            Self::AlreadyRunning => f.write_str("scheduler is already running"),
            Self::OutOfSpace { requested, free } => {
                write!(f, "out of space: requested {requested} bytes, {free} free")
            }
            Self::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {expected}, found {found}")
            }
            Self::UnknownInput(name) => write!(f, "unknown input `{name}`"),
            Self::UnknownOutput(name) => write!(f, "unknown output `{name}`"),
            Self::UpstreamFailed(name) => write!(f, "upstream of input `{name}` failed"),
            Self::Cycle => f.write_str("render graph contains a cycle"),
            Self::RenderFailure(log) => {
                if log.is_empty() {
                    f.write_str("render failure")
                } else {
                    write!(f, "render failure:\n{log}")
                }
            }
            Self::Device(msg) => write!(f, "device error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Shorthand for [`EngineError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_out_of_space() {
        let e = EngineError::OutOfSpace { requested: 120, free: 50 };
        assert_eq!(e.to_string(), "out of space: requested 120 bytes, 50 free");
    }

    #[test]
    fn display_render_failure_includes_log() {
        let e = EngineError::RenderFailure("shader 3: link failed".into());
        assert!(e.to_string().contains("shader 3: link failed"));
        assert_eq!(EngineError::RenderFailure(String::new()).to_string(), "render failure");
    }

    #[test]
    fn converts_into_anyhow() {
        let e: anyhow::Error = EngineError::NotRunning.into();
        assert_eq!(e.downcast_ref::<EngineError>(), Some(&EngineError::NotRunning));
    }
}
