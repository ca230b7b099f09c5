//! Campaign dispatch - lifecycle, batching and delivery of campaigns

mod composer;
mod governor;
mod manager;
mod resolver;
mod state;
mod worker;

pub use composer::{Composition, CompositionError, ContentComposer, TemplateRenderer};
pub use governor::{RateGovernor, Verdict};
pub use manager::{CampaignError, CampaignManager, ReportPage};
pub use resolver::RecipientResolver;
pub use state::CampaignAction;
pub use worker::{DispatchContext, DispatchWorker, WorkerExit, WorkerSignal};

#[cfg(test)]
pub(crate) mod testing;
