//! Courier Core - Campaign dispatch engine
//!
//! This crate provides the dispatch engine: the campaign state machine,
//! recipient resolution, content composition, rate governance, the
//! per-campaign dispatch worker and its supervisor, plus the channel
//! transports and the content variation client it drives.

pub mod clock;
pub mod dispatch;
pub mod events;
pub mod transport;
pub mod variation;

pub use clock::{Clock, SystemClock};
pub use dispatch::{
    CampaignAction, CampaignError, CampaignManager, Composition, CompositionError,
    ContentComposer, DispatchContext, DispatchWorker, RateGovernor, RecipientResolver, ReportPage,
    TemplateRenderer, Verdict, WorkerExit, WorkerSignal,
};
pub use events::{
    BroadcastObserver, CompositeObserver, DispatchEvent, DispatchObserver, HaltReason,
    LoggingObserver,
};
pub use transport::{ChannelTransport, SmtpTransport, TransportError, Transports, UltraMsgTransport};
pub use variation::{ContentVariation, OpenAiVariation, VariationError};
