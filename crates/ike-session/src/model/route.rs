//! The traffic selector of a session

use ike_common::crd::{Route, Session};
use kube::ResourceExt;

/// Route type matching on a request header
pub const ROUTE_TYPE_HEADER: &str = "header";

/// Header used when the Session does not name a route
pub const DEFAULT_ROUTE_HEADER: &str = "x-workspace-route";

/// Route from the spec, or the default header carrying the session name
pub fn effective_route(session: &Session) -> Route {
    match &session.spec.route {
        Some(route) if !route.type_.is_empty() => route.clone(),
        _ => Route {
            type_: ROUTE_TYPE_HEADER.to_string(),
            name: DEFAULT_ROUTE_HEADER.to_string(),
            value: session.name_any(),
        },
    }
}

/// `type:name=value`
pub fn route_expression(route: &Route) -> String {
    format!("{}:{}={}", route.type_, route.name, route.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ike_common::crd::SessionSpec;

    fn session(route: Option<Route>) -> Session {
        Session::new(
            "my-session",
            SessionSpec {
                route,
                refs: vec![],
            },
        )
    }

    #[test]
    fn defaults_to_header_with_session_name() {
        let route = effective_route(&session(None));
        assert_eq!(route_expression(&route), "header:x-workspace-route=my-session");
    }

    #[test]
    fn empty_route_type_uses_the_default() {
        let route = effective_route(&session(Some(Route::default())));
        assert_eq!(route.name, DEFAULT_ROUTE_HEADER);
    }

    #[test]
    fn explicit_route_is_kept() {
        let explicit = Route {
            type_: "header".to_string(),
            name: "x-dev".to_string(),
            value: "alice".to_string(),
        };
        let route = effective_route(&session(Some(explicit.clone())));
        assert_eq!(route, explicit);
        assert_eq!(route_expression(&route), "header:x-dev=alice");
    }
}
