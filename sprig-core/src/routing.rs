// Compiled routes, the route table, path matching and URL generation

use crate::Error;
use crate::controller::{AfterFn, BeforeFn, ConverterFn, RouteDefinition};
use crate::handler::ControllerTarget;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Requirement applied to placeholders without an explicit one
pub const DEFAULT_REQUIREMENT: &str = "[^/]+";

/// The route table shared between the router and the URL generator
pub type SharedRoutes = Arc<RwLock<RouteCollection>>;

/// Literal text, then an optional variable
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    text: String,
    variable: Option<String>,
}

/// An immutable, compiled route
pub struct Route {
    name: String,
    path: String,
    methods: Vec<String>,
    requirements: HashMap<String, String>,
    defaults: HashMap<String, Value>,
    converters: Vec<(String, ConverterFn)>,
    before: Vec<BeforeFn>,
    after: Vec<AfterFn>,
    arguments: Vec<String>,
    target: ControllerTarget,
    tokens: Vec<Segment>,
    /// Index of the first segment whose variable may be omitted
    first_optional: usize,
    regex: Regex,
    requirement_checks: HashMap<String, Regex>,
}

impl Route {
    /// Compile a definition into a route mounted at `path`
    pub fn compile(
        name: impl Into<String>,
        path: impl Into<String>,
        definition: RouteDefinition,
    ) -> Result<Self, Error> {
        let name = name.into();
        let path = path.into();
        let invalid = |reason: String| Error::InvalidRoute {
            pattern: path.clone(),
            reason,
        };

        let target = definition
            .target
            .ok_or_else(|| invalid("no controller is attached".to_string()))?;
        let tokens = tokenize(&path).map_err(invalid)?;

        let variables: Vec<&String> = tokens
            .iter()
            .filter_map(|Segment { variable, .. }| variable.as_ref())
            .collect();

        // Trailing variables with defaults are optional, unless literal text follows them
        let trailing_text = matches!(tokens.last(), Some(Segment { variable: None, .. }));
        let mut first_optional = tokens.len();
        if !trailing_text {
            for (index, Segment { variable, .. }) in tokens.iter().enumerate().rev() {
                match variable {
                    Some(var) if definition.defaults.contains_key(var) => first_optional = index,
                    _ => break,
                }
            }
        }

        let requirement_for = |var: &str| -> String {
            definition
                .requirements
                .get(var)
                .map(|req| trim_anchors(req).to_string())
                .unwrap_or_else(|| DEFAULT_REQUIREMENT.to_string())
        };

        let mut pattern = String::from("^");
        let mut open_groups = 0;
        for (index, Segment { text, variable }) in tokens.iter().enumerate() {
            match variable {
                Some(var) if index >= first_optional => {
                    let (lead, separator) = split_separator(text);
                    pattern.push_str(&regex::escape(lead));
                    // A leading separator stays mandatory so "/{page}" still needs "/"
                    if index == 0 && lead.is_empty() {
                        pattern.push_str(&regex::escape(separator));
                        pattern.push_str("(?:");
                    } else {
                        pattern.push_str("(?:");
                        pattern.push_str(&regex::escape(separator));
                    }
                    pattern.push_str(&format!("(?P<{}>(?:{}))", var, requirement_for(var.as_str())));
                    open_groups += 1;
                }
                Some(var) => {
                    pattern.push_str(&regex::escape(text));
                    pattern.push_str(&format!("(?P<{}>(?:{}))", var, requirement_for(var.as_str())));
                }
                None => pattern.push_str(&regex::escape(text)),
            }
        }
        for _ in 0..open_groups {
            pattern.push_str(")?");
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| invalid(e.to_string()))?;

        let mut requirement_checks = HashMap::new();
        for var in &variables {
            let check = Regex::new(&format!("^(?:{})$", requirement_for(var.as_str())))
                .map_err(|e| invalid(e.to_string()))?;
            requirement_checks.insert((*var).clone(), check);
        }

        Ok(Self {
            name,
            methods: definition.methods,
            requirements: definition.requirements,
            defaults: definition.defaults,
            converters: definition.converters,
            before: definition.before,
            after: definition.after,
            arguments: definition.arguments,
            target,
            tokens,
            first_optional,
            regex,
            requirement_checks,
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full pattern, prefix included
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Allowed methods, upper case; empty means any
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn requirements(&self) -> &HashMap<String, String> {
        &self.requirements
    }

    pub fn defaults(&self) -> &HashMap<String, Value> {
        &self.defaults
    }

    /// Converters in registration order
    pub fn converters(&self) -> &[(String, ConverterFn)] {
        &self.converters
    }

    pub fn before_middlewares(&self) -> &[BeforeFn] {
        &self.before
    }

    pub fn after_middlewares(&self) -> &[AfterFn] {
        &self.after
    }

    /// Declared controller arguments
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn target(&self) -> &ControllerTarget {
        &self.target
    }

    /// Placeholder names in pattern order
    pub fn variables(&self) -> Vec<&str> {
        self.tokens
            .iter()
            .filter_map(|Segment { variable, .. }| variable.as_deref())
            .collect()
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.is_empty()
            || self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
            || (method.eq_ignore_ascii_case("HEAD") && self.methods.iter().any(|m| m == "GET"))
    }

    /// Match the path alone, returning the decoded placeholder values
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(path)?;
        let mut params = HashMap::new();
        for var in self.variables() {
            if let Some(value) = captures.name(var) {
                let decoded = urlencoding::decode(value.as_str())
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.as_str().to_string());
                params.insert(var.to_string(), decoded);
            }
        }
        Some(params)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("methods", &self.methods)
            .field("requirements", &self.requirements)
            .field("defaults", &self.defaults)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

fn tokenize(path: &str) -> Result<Vec<Segment>, String> {
    let mut tokens = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    let mut rest = path;

    while let Some(start) = rest.find('{') {
        let text = &rest[..start];
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| "unclosed placeholder".to_string())?;
        let var = &after[..end];

        if !is_variable_name(var) {
            return Err(format!("\"{}\" is not a valid placeholder name", var));
        }
        if seen.iter().any(|v| v == var) {
            return Err(format!("placeholder \"{}\" is used more than once", var));
        }
        seen.push(var.to_string());

        tokens.push(Segment {
            text: text.to_string(),
            variable: Some(var.to_string()),
        });
        rest = &after[end + 1..];
    }

    if rest.contains('}') {
        return Err("unopened placeholder".to_string());
    }
    if !rest.is_empty() || tokens.is_empty() {
        tokens.push(Segment {
            text: rest.to_string(),
            variable: None,
        });
    }
    Ok(tokens)
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split the "/" in front of a placeholder from the literal text before it
fn split_separator(text: &str) -> (&str, &str) {
    match text.strip_suffix('/') {
        Some(lead) => (lead, "/"),
        None => (text, ""),
    }
}

fn trim_anchors(requirement: &str) -> &str {
    let requirement = requirement.strip_prefix('^').unwrap_or(requirement);
    requirement.strip_suffix('$').unwrap_or(requirement)
}

fn value_to_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Ordered set of compiled routes, indexed by name
#[derive(Debug, Default, Clone)]
pub struct RouteCollection {
    routes: Vec<Arc<Route>>,
}

impl RouteCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route; a route with the same name is replaced and moves to the end
    pub fn add(&mut self, route: Route) {
        self.add_arc(Arc::new(route));
    }

    fn add_arc(&mut self, route: Arc<Route>) {
        self.routes.retain(|existing| existing.name() != route.name());
        self.routes.push(route);
    }

    /// Append every route of `other`, in order
    pub fn extend(&mut self, other: RouteCollection) {
        for route in other.routes {
            self.add_arc(route);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|route| route.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.routes.iter().map(|route| route.name()).collect()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.routes.iter().map(|route| route.path()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Result of a successful match
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    /// Defaults overlaid with the placeholder values from the path
    pub params: HashMap<String, Value>,
}

/// Find the first route for `method` and `path`, in table order
pub fn match_route(routes: &RouteCollection, method: &str, path: &str) -> Result<RouteMatch, Error> {
    let mut allowed: Vec<String> = Vec::new();

    for route in routes.iter() {
        let Some(captured) = route.match_path(path) else {
            continue;
        };

        if !route.allows_method(method) {
            for m in route.methods() {
                if !allowed.contains(m) {
                    allowed.push(m.clone());
                }
            }
            continue;
        }

        let mut params: HashMap<String, Value> = route.defaults().clone();
        for (key, value) in captured {
            params.insert(key, Value::String(value));
        }
        return Ok(RouteMatch {
            route: route.clone(),
            params,
        });
    }

    if allowed.is_empty() {
        Err(Error::RouteNotFound(format!("No route found for \"{} {}\"", method, path)))
    } else {
        Err(Error::MethodNotAllowed {
            message: format!(
                "No route found for \"{} {}\": Method Not Allowed (Allow: {})",
                method,
                path,
                allowed.join(", ")
            ),
            allowed,
        })
    }
}

/// Build route names the way unnamed routes are named: `GET_hello_name`
pub fn generate_route_name(methods: &[String], path: &str) -> String {
    let raw = format!("{}_{}", methods.join("_"), path);
    let replaced: String = raw
        .chars()
        .map(|c| if matches!(c, '/' | ':' | '|' | '-') { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .collect();

    let mut name = String::with_capacity(replaced.len());
    for c in replaced.chars() {
        if c == '_' && name.ends_with('_') {
            continue;
        }
        name.push(c);
    }
    name
}

/// Generates URLs from route names
#[derive(Debug, Clone)]
pub struct UrlGenerator {
    routes: SharedRoutes,
}

impl UrlGenerator {
    pub fn new(routes: SharedRoutes) -> Self {
        Self { routes }
    }

    /// Build the path of route `name`.
    ///
    /// Parameters fill placeholders first (falling back to defaults); the
    /// rest are appended as a query string.
    pub fn generate(&self, name: &str, params: &[(&str, &str)]) -> Result<String, Error> {
        let routes = self.routes.read();
        let route = routes
            .get(name)
            .ok_or_else(|| Error::UnknownRoute(name.to_string()))?;
        let provided = |var: &str| params.iter().find(|(k, _)| *k == var).map(|(_, v)| v.to_string());

        // Optional trailing values equal to their default are left out
        let mut keep = route.tokens.len();
        while keep > route.first_optional {
            let Segment { variable, .. } = &route.tokens[keep - 1];
            let Some(var) = variable else { break };
            let default = route.defaults.get(var).map(value_to_param);
            match provided(var) {
                Some(value) if Some(&value) != default.as_ref() => break,
                _ => keep -= 1,
            }
        }

        let mut url = String::new();
        for (index, Segment { text, variable }) in route.tokens.iter().enumerate() {
            if index >= keep {
                let (lead, separator) = split_separator(text);
                url.push_str(lead);
                if index == 0 && lead.is_empty() {
                    url.push_str(separator);
                }
                break;
            }
            url.push_str(text);
            let Some(var) = variable else { continue };

            let value = provided(var)
                .or_else(|| route.defaults.get(var).map(value_to_param))
                .ok_or_else(|| Error::MissingParameter {
                    route: name.to_string(),
                    parameter: var.clone(),
                })?;

            if let Some(check) = route.requirement_checks.get(var) {
                if !check.is_match(&value) {
                    return Err(Error::InvalidParameter {
                        route: name.to_string(),
                        parameter: var.clone(),
                        requirement: check.as_str().to_string(),
                        value,
                    });
                }
            }
            url.push_str(&urlencoding::encode(&value));
        }
        if url.is_empty() {
            url.push('/');
        }

        let variables = route.variables();
        let extra: Vec<String> = params
            .iter()
            .filter(|(key, _)| !variables.contains(key))
            .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
            .collect();
        if !extra.is_empty() {
            url.push('?');
            url.push_str(&extra.join("&"));
        }

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::BoxedHandler;

    fn definition(methods: &[&str]) -> RouteDefinition {
        let mut definition = RouteDefinition::default();
        definition.methods = methods.iter().map(|m| m.to_string()).collect();
        definition.target = Some(ControllerTarget::Callable(BoxedHandler::from_fn(|_req| async {
            Ok::<_, Error>("ok")
        })));
        definition
    }

    fn route(name: &str, path: &str, definition: RouteDefinition) -> Route {
        Route::compile(name, path, definition).unwrap()
    }

    #[test]
    fn test_static_and_placeholder_paths() {
        let hello = route("hello", "/hello/{name}", definition(&["GET"]));
        assert_eq!(
            hello.match_path("/hello/World").unwrap().get("name"),
            Some(&"World".to_string())
        );
        assert!(hello.match_path("/hello").is_none());
        assert!(hello.match_path("/hello/a/b").is_none());

        let root = route("root", "/", definition(&[]));
        assert!(root.match_path("/").is_some());
        assert!(root.match_path("/x").is_none());
    }

    #[test]
    fn test_params_are_percent_decoded() {
        let hello = route("hello", "/hello/{name}", definition(&["GET"]));
        let params = hello.match_path("/hello/John%20Doe").unwrap();
        assert_eq!(params["name"], "John Doe");
    }

    #[test]
    fn test_requirements() {
        let mut def = definition(&["GET"]);
        def.requirements.insert("id".to_string(), "^\\d+$".to_string());
        let user = route("user", "/users/{id}", def);

        assert!(user.match_path("/users/42").is_some());
        assert!(user.match_path("/users/abc").is_none());
    }

    #[test]
    fn test_trailing_defaults_are_optional() {
        let mut def = definition(&["GET"]);
        def.defaults.insert("page".to_string(), Value::from(1));
        let blog = route("blog", "/blog/{page}", def);

        assert!(blog.match_path("/blog/2").is_some());
        assert!(blog.match_path("/blog").unwrap().is_empty());
        assert!(blog.match_path("/blog/").is_none());

        let mut def = definition(&["GET"]);
        def.defaults.insert("page".to_string(), Value::from(1));
        let top = route("top", "/{page}", def);
        assert!(top.match_path("/").is_some());
        assert!(top.match_path("/3").is_some());
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(
            Route::compile("a", "/users/{id", definition(&[])),
            Err(Error::InvalidRoute { .. })
        ));
        assert!(matches!(
            Route::compile("a", "/{a}/{a}", definition(&[])),
            Err(Error::InvalidRoute { .. })
        ));
        assert!(matches!(
            Route::compile("a", "/{9lives}", definition(&[])),
            Err(Error::InvalidRoute { .. })
        ));
        let mut def = definition(&[]);
        def.requirements.insert("id".to_string(), "(".to_string());
        assert!(matches!(
            Route::compile("a", "/{id}", def),
            Err(Error::InvalidRoute { .. })
        ));
    }

    #[test]
    fn test_matcher_methods() {
        let mut routes = RouteCollection::new();
        routes.add(route("read", "/items", definition(&["GET"])));
        routes.add(route("write", "/items", definition(&["POST", "PUT"])));

        assert_eq!(match_route(&routes, "GET", "/items").unwrap().route.name(), "read");
        assert_eq!(match_route(&routes, "HEAD", "/items").unwrap().route.name(), "read");
        assert_eq!(match_route(&routes, "PUT", "/items").unwrap().route.name(), "write");

        match match_route(&routes, "DELETE", "/items") {
            Err(Error::MethodNotAllowed { allowed, .. }) => {
                assert_eq!(allowed, vec!["GET", "POST", "PUT"])
            }
            other => panic!("expected 405, got {:?}", other),
        }
        assert!(matches!(
            match_route(&routes, "GET", "/nothing"),
            Err(Error::RouteNotFound(_))
        ));
    }

    #[test]
    fn test_match_merges_defaults() {
        let mut def = definition(&["GET"]);
        def.defaults.insert("page".to_string(), Value::from(1));
        def.defaults.insert("format".to_string(), Value::from("html"));
        let mut routes = RouteCollection::new();
        routes.add(route("blog", "/blog/{page}", def));

        let found = match_route(&routes, "GET", "/blog").unwrap();
        assert_eq!(found.params["page"], Value::from(1));
        let found = match_route(&routes, "GET", "/blog/7").unwrap();
        assert_eq!(found.params["page"], Value::from("7"));
        assert_eq!(found.params["format"], Value::from("html"));
    }

    #[test]
    fn test_collection_replaces_by_name() {
        let mut routes = RouteCollection::new();
        routes.add(route("a", "/a", definition(&[])));
        routes.add(route("b", "/b", definition(&[])));
        routes.add(route("a", "/a2", definition(&[])));

        assert_eq!(routes.names(), vec!["b", "a"]);
        assert_eq!(routes.get("a").unwrap().path(), "/a2");
    }

    #[test]
    fn test_generated_route_names() {
        let get = vec!["GET".to_string()];
        assert_eq!(generate_route_name(&get, "/hello/{name}"), "GET_hello_name");
        assert_eq!(
            generate_route_name(&["GET".to_string(), "POST".to_string()], "/api/items"),
            "GET_POST_api_items"
        );
        assert_eq!(generate_route_name(&[], "/foo-bar"), "_foo_bar");
    }

    #[test]
    fn test_url_generation() {
        let mut user = definition(&["GET"]);
        user.requirements.insert("id".to_string(), "\\d+".to_string());
        let mut blog = definition(&["GET"]);
        blog.defaults.insert("page".to_string(), Value::from(1));

        let mut routes = RouteCollection::new();
        routes.add(route("user", "/users/{id}", user));
        routes.add(route("blog", "/blog/{page}", blog));
        routes.add(route("hello", "/hello/{name}", definition(&["GET"])));
        let generator = UrlGenerator::new(Arc::new(RwLock::new(routes)));

        assert_eq!(generator.generate("user", &[("id", "42")]).unwrap(), "/users/42");
        assert_eq!(
            generator.generate("user", &[("id", "42"), ("tab", "posts")]).unwrap(),
            "/users/42?tab=posts"
        );
        assert_eq!(generator.generate("blog", &[]).unwrap(), "/blog");
        assert_eq!(generator.generate("blog", &[("page", "1")]).unwrap(), "/blog");
        assert_eq!(generator.generate("blog", &[("page", "3")]).unwrap(), "/blog/3");
        assert_eq!(
            generator.generate("hello", &[("name", "John Doe")]).unwrap(),
            "/hello/John%20Doe"
        );

        assert!(matches!(
            generator.generate("user", &[]),
            Err(Error::MissingParameter { .. })
        ));
        assert!(matches!(
            generator.generate("user", &[("id", "abc")]),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(matches!(
            generator.generate("nope", &[]),
            Err(Error::UnknownRoute(_))
        ));
    }
}
