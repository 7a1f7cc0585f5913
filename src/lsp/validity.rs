//! Connection validity checks and stale-session recovery

use std::sync::Arc;

use tracing::{debug, warn};

use super::client::ClientInner;
use super::session::RpcSession;
use super::types::LspError;

impl ClientInner {
    /// Decide whether `session` can carry a request right now.
    ///
    /// An unusable session is dropped as the current one and a fast
    /// reconnect is requested.
    pub(crate) fn is_valid(self: &Arc<Self>, session: Option<&Arc<RpcSession>>) -> bool {
        let Some(session) = session else {
            return false;
        };

        match session.inspect() {
            Ok(()) => true,
            Err(reason) => {
                debug!(session = session.id(), "session unusable: {}", reason);
                self.recover_stale(session);
                false
            }
        }
    }

    /// The current session, if it passes [`is_valid`](Self::is_valid)
    pub(crate) fn valid_session(self: &Arc<Self>) -> Option<Arc<RpcSession>> {
        let session = self.current_session();
        if self.is_valid(session.as_ref()) {
            session
        } else {
            None
        }
    }

    /// React to a failed request against `session`
    pub(crate) fn handle_request_failure(self: &Arc<Self>, session: &Arc<RpcSession>, error: &LspError) {
        if error.is_stale_session() {
            warn!(session = session.id(), "request hit a stale session: {}", error);
            self.recover_stale(session);
        } else {
            debug!(session = session.id(), "request failed: {}", error);
        }
    }

    /// Forget `session` if it is still current and force a reconnect.
    ///
    /// Nothing happens when a newer connection has already started, whether
    /// or not its session is in place yet.
    fn recover_stale(self: &Arc<Self>, session: &Arc<RpcSession>) {
        let (stale, reconnect) = {
            let mut state = self.lock_state();
            let is_current = state.current.as_ref().map(|c| Arc::ptr_eq(c, session));
            match is_current {
                Some(true) => (state.current.take(), true),
                Some(false) => (None, false),
                None => (None, state.is_latest(session)),
            }
        };

        if let Some(stale) = stale {
            stale.dispose();
        }
        if reconnect {
            self.force_reconnect();
        } else {
            debug!(session = session.id(), "stale session already replaced");
        }
    }
}
