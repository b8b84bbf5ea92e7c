use tracing::debug;

use crate::config::Config;

use super::Session;

/// Sink for navigation side effects (e.g. a router push or a printed hint).
pub trait Navigator: Send + Sync {
    fn redirect_to(&self, path: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Redirect(String),
    /// No credentials and no login path to send the user to
    Deny,
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Decide whether navigation to `destination` may proceed.
///
/// A refresh credential alone is enough to allow: the next real request
/// recovers the access credential through the refresh coordinator.
pub fn decide(
    has_access: bool,
    has_refresh: bool,
    destination: &str,
    login_path: Option<&str>,
) -> GateDecision {
    if has_access || has_refresh {
        return GateDecision::Allow;
    }

    match login_path {
        Some(login) if same_route(destination, login) => GateDecision::Allow,
        Some(login) => GateDecision::Redirect(login.to_string()),
        None => GateDecision::Deny,
    }
}

/// Compare route paths ignoring query, fragment and a trailing slash
fn same_route(a: &str, b: &str) -> bool {
    fn route(path: &str) -> &str {
        let end = path.find(['?', '#']).unwrap_or(path.len());
        let path = &path[..end];
        if path.len() > 1 {
            path.trim_end_matches('/')
        } else {
            path
        }
    }
    route(a) == route(b)
}

/// Navigation guard bound to a session's credentials.
#[derive(Debug, Clone)]
pub struct SessionGate {
    global: bool,
    login_path: Option<String>,
}

impl SessionGate {
    pub fn new(global: bool, login_path: Option<String>) -> Self {
        Self { global, login_path }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.global_gate, config.login_path.clone())
    }

    /// Evaluate a navigation. Routes that did not opt in pass unless the gate is global.
    pub fn check(&self, session: &Session, destination: &str, route_opted_in: bool) -> GateDecision {
        if !self.global && !route_opted_in {
            return GateDecision::Allow;
        }
        decide(
            session.access_token().is_some(),
            session.refresh_token().is_some(),
            destination,
            self.login_path.as_deref(),
        )
    }

    /// Evaluate and perform the redirect, returning whether navigation may continue.
    pub fn enforce(&self, session: &Session, destination: &str, route_opted_in: bool) -> bool {
        let decision = self.check(session, destination, route_opted_in);
        debug!(destination, ?decision, "Session gate evaluated");
        if let GateDecision::Redirect(ref path) = decision {
            session.navigator().redirect_to(path);
        }
        decision.is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{session_with, RecordingNavigator};
    use std::sync::Arc;

    #[test]
    fn test_decide_table() {
        let login = Some("/login");
        assert_eq!(decide(true, false, "/dashboard", login), GateDecision::Allow);
        assert_eq!(decide(true, true, "/dashboard", None), GateDecision::Allow);
        assert_eq!(decide(false, true, "/dashboard", login), GateDecision::Allow);
        assert_eq!(decide(false, false, "/login", login), GateDecision::Allow);
        assert_eq!(
            decide(false, false, "/dashboard", login),
            GateDecision::Redirect("/login".to_string())
        );
        assert_eq!(decide(false, false, "/dashboard", None), GateDecision::Deny);
    }

    #[test]
    fn test_login_path_match_ignores_query_and_trailing_slash() {
        let login = Some("/login");
        assert!(decide(false, false, "/login/", login).is_allowed());
        assert!(decide(false, false, "/login?next=/dashboard", login).is_allowed());
        assert!(!decide(false, false, "/login-help", login).is_allowed());
        assert!(decide(false, false, "/", Some("/")).is_allowed());
    }

    #[test]
    fn test_gate_only_applies_to_opted_in_routes_unless_global() {
        let navigator = Arc::new(RecordingNavigator::default());
        let session = session_with(navigator.clone(), Some("/login"));

        let opt_in = SessionGate::new(false, Some("/login".to_string()));
        assert!(opt_in.enforce(&session, "/public", false));
        assert!(!opt_in.enforce(&session, "/dashboard", true));

        let global = SessionGate::new(true, Some("/login".to_string()));
        assert!(!global.enforce(&session, "/public", false));

        assert_eq!(navigator.redirects(), vec!["/login", "/login"]);
    }

    #[test]
    fn test_gate_allows_with_refresh_credential_only() {
        let navigator = Arc::new(RecordingNavigator::default());
        let session = session_with(navigator.clone(), Some("/login"));
        session
            .store()
            .set(session.names().refresh.as_str(), "R1", None)
            .unwrap();

        let gate = SessionGate::new(true, Some("/login".to_string()));
        assert!(gate.enforce(&session, "/dashboard", false));
        assert!(navigator.redirects().is_empty());
    }

    #[test]
    fn test_deny_without_login_path_does_not_redirect() {
        let navigator = Arc::new(RecordingNavigator::default());
        let session = session_with(navigator.clone(), None);

        let gate = SessionGate::new(true, None);
        assert_eq!(gate.check(&session, "/dashboard", false), GateDecision::Deny);
        assert!(!gate.enforce(&session, "/dashboard", false));
        assert!(navigator.redirects().is_empty());
    }
}
