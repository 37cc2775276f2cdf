//! Route precedence ordering.
//!
//! Envoy evaluates the routes of a virtual host top-down, so the most
//! specific matcher has to come first. The ordering is a lexicographic
//! comparison of a precedence tuple per route; ties keep their input
//! order (the sort is stable).

use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier, query_parameter_matcher::QueryParameterMatchSpecifier,
    route_match::PathSpecifier, Route, RouteMatch,
};
use envoy_types::pb::envoy::r#type::matcher::v3::string_matcher::MatchPattern;

/// Path match kinds in ascending precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PathKind {
    None = 0,
    Prefix = 1,
    Regex = 2,
    Exact = 3,
}

/// Precedence tuple compared lexicographically; larger sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Precedence {
    path_kind: PathKind,
    path_length: usize,
    header_matchers: usize,
    exact_header_matchers: usize,
    query_matchers: usize,
    exact_query_matchers: usize,
}

/// Sort routes within one virtual host, most specific match first.
pub fn sort_routes(mut routes: Vec<Route>) -> Vec<Route> {
    let mut keyed: Vec<(Precedence, Route)> =
        routes.drain(..).map(|route| (precedence(route.r#match.as_ref()), route)).collect();
    // Stable sort: equal keys retain input order.
    keyed.sort_by(|a, b| b.0.cmp(&a.0));
    keyed.into_iter().map(|(_, route)| route).collect()
}

fn precedence(route_match: Option<&RouteMatch>) -> Precedence {
    let Some(route_match) = route_match else {
        return Precedence {
            path_kind: PathKind::None,
            path_length: 0,
            header_matchers: 0,
            exact_header_matchers: 0,
            query_matchers: 0,
            exact_query_matchers: 0,
        };
    };

    let (path_kind, path_length) = match &route_match.path_specifier {
        Some(PathSpecifier::Path(path)) => (PathKind::Exact, path.chars().count()),
        Some(PathSpecifier::SafeRegex(matcher)) => (PathKind::Regex, matcher.regex.chars().count()),
        Some(PathSpecifier::Prefix(prefix)) => {
            // A bare "/" prefix is a wildcard; it must lose to any real prefix.
            let effective = if prefix == "/" { 0 } else { prefix.chars().count() };
            (PathKind::Prefix, effective)
        }
        Some(PathSpecifier::PathSeparatedPrefix(prefix)) => {
            (PathKind::Prefix, prefix.chars().count())
        }
        _ => (PathKind::None, 0),
    };

    let header_matchers = route_match.headers.len();
    let exact_header_matchers =
        route_match.headers.iter().filter(|header| is_exact_header(header)).count();

    let query_matchers = route_match.query_parameters.len();
    let exact_query_matchers = route_match
        .query_parameters
        .iter()
        .filter(|query| {
            matches!(
                &query.query_parameter_match_specifier,
                Some(QueryParameterMatchSpecifier::StringMatch(matcher))
                    if matches!(matcher.match_pattern, Some(MatchPattern::Exact(_)))
            )
        })
        .count();

    Precedence {
        path_kind,
        path_length,
        header_matchers,
        exact_header_matchers,
        query_matchers,
        exact_query_matchers,
    }
}

#[allow(deprecated)]
fn is_exact_header(header: &envoy_types::pb::envoy::config::route::v3::HeaderMatcher) -> bool {
    match &header.header_match_specifier {
        Some(HeaderMatchSpecifier::ExactMatch(_)) => true,
        Some(HeaderMatchSpecifier::StringMatch(matcher)) => {
            matches!(matcher.match_pattern, Some(MatchPattern::Exact(_)))
        }
        _ => false,
    }
}
