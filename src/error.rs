use std::time::Duration;

////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed label pair `{0}`, expected `tag=field`")]
    MalformedLabel(String),
    #[error("invalid tag key `{0}`")]
    InvalidTagKey(String),
    #[error("invalid value for tag `{key}`: {reason}")]
    InvalidTagValue { key: String, reason: &'static str },
    #[error("invalid view name `{0}`")]
    InvalidViewName(String),
    #[error("tag keys `{first}` and `{second}` both map to label `{label}`")]
    LabelConflict {
        label: String,
        first: String,
        second: String,
    },
    #[error("view `{0}` is already registered")]
    ViewConflict(String),
    #[error("several different listen addresses have been set (first={first}, second={second})")]
    AddressConflict { first: String, second: String },
    #[error("listen error({addr}): {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("exporter has already been stopped")]
    Stopped,
    #[error("metrics server did not shut down within {0:?}")]
    ShutdownTimeout(Duration),
    #[error("stop http server: {0}")]
    Shutdown(#[source] tokio::task::JoinError),
    #[error("unknown instance {0}")]
    UnknownInstance(usize),
    #[error("metrics registry: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("serve metrics endpoint: {0}")]
    Serve(#[from] hyper::Error),
}

impl Error {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedLabel(_) => "malformed_label",
            Self::InvalidTagKey(_) => "invalid_tag_key",
            Self::InvalidTagValue { .. } => "invalid_tag_value",
            Self::InvalidViewName(_) => "invalid_view_name",
            Self::LabelConflict { .. } => "label_conflict",
            Self::ViewConflict(_) => "view_conflict",
            Self::AddressConflict { .. } => "address_conflict",
            Self::Bind { .. } => "bind_failed",
            Self::Stopped => "exporter_stopped",
            Self::ShutdownTimeout(_) => "shutdown_timeout",
            Self::Shutdown(_) => "shutdown_failed",
            Self::UnknownInstance(_) => "unknown_instance",
            Self::Metrics(_) => "metrics_failed",
            Self::Serve(_) => "serve_failed",
        }
    }

    /// Errors caused by the caller's configuration rather than by the runtime.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedLabel(_)
                | Self::InvalidTagKey(_)
                | Self::InvalidViewName(_)
                | Self::LabelConflict { .. }
                | Self::ViewConflict(_)
                | Self::AddressConflict { .. }
        )
    }
}
