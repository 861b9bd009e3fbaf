use std::sync::Arc;
use std::time::Duration;

use crate::auth::Authenticator;
use crate::correlator::CorrelatorHandle;
use crate::deadline::Deadline;
use crate::dispatcher::Dispatcher;
use crate::teams::{RepositoryTeamStore, TeamDirectory};
use crate::vault::Vault;

/// Collaborators shared by every HTTP handler, installed as an
/// `Extension` layer.
#[derive(Clone)]
pub struct AppContext {
    pub authenticator: Authenticator,
    pub vault: Vault,
    pub directory: Arc<dyn TeamDirectory>,
    pub repository_teams: Arc<dyn RepositoryTeamStore>,
    pub dispatcher: Dispatcher,
    pub correlator: CorrelatorHandle,
    pub request_budget: Duration,
}

impl AppContext {
    /// Deadline for one inbound request, started now.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.request_budget)
    }
}
