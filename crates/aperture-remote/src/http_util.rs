/// Attach the catalog auth token to a request.
pub fn apply_auth(req: ureq::Request, token: &str) -> ureq::Request {
    req.set("X-Auth-Token", token)
}

/// Join an endpoint base with a path, tolerating trailing slashes.
pub fn join_url(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
