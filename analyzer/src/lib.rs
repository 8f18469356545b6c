//! Client for a Dart-style analysis server: framing, request correlation,
//! event fan-out, process supervision and analysis-root bookkeeping.

pub mod codec;
pub mod protocol;

mod correlator;
mod error;
mod events;
mod roots;
mod server;

pub use codec::Framing;
pub use error::AnalyzerError;
pub use events::{EventBroadcaster, EventKind, ServerEvent, Subscription};
pub use protocol::ResponseError;
pub use roots::{AnalysisRootManager, NOISY_DIRECTORY_VARS};
pub use server::{Analyzer, CANCELLED_BY_CLIENT, SERVER_TERMINATED, ServerCommand};
