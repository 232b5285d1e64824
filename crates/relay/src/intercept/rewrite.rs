use http::uri::PathAndQuery;
use http::{HeaderValue, Uri};
use tracing::{debug, warn};

use crate::protocol::RequestHeader;

const DEFAULT_PORT: u16 = 80;

/// Fills in the URL authority from the `Host` header when the URL has none.
///
/// Returns `false` when the target host can't be determined.
pub fn resolve_host(request: &mut RequestHeader) -> bool {
    if request.uri().host().is_some() {
        return true;
    }
    let Some(host) = request.host_header().filter(|h| !h.is_empty()).map(str::to_owned) else {
        warn!("host field not found");
        return false;
    };

    let path_and_query = request.uri().path_and_query().map_or("/", PathAndQuery::as_str).to_owned();
    match Uri::builder().scheme("http").authority(host.as_str()).path_and_query(path_and_query).build() {
        Ok(uri) => {
            debug!(host, "adding host to request url");
            request.set_uri(uri);
            true
        }
        Err(e) => {
            warn!(host, cause = %e, "host header is not a valid authority");
            false
        }
    }
}

/// Turns `/<host>[:<port>]/<rest>` into a request for `<rest>` on `<host>:<port>`.
///
/// Only URLs without a host, or addressed to `service_host`, are converted. The port
/// defaults to 80, the query string is kept and the `Host` header is set to the embedded
/// segment. Returns whether the request was rewritten.
pub fn convert_url(request: &mut RequestHeader, service_host: Option<&str>) -> bool {
    let applies = match request.uri().host() {
        None => true,
        Some(host) => service_host.is_some_and(|service| service.eq_ignore_ascii_case(host)),
    };
    if !applies {
        return false;
    }

    let path = request.uri().path();
    debug!(path, "converting url");
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let Some((segment, rest)) = trimmed.split_once('/') else {
        return false;
    };
    if segment.is_empty() {
        return false;
    }

    let (host, port) = match segment.split_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host, port),
            Err(_) => {
                warn!(segment, "invalid port in embedded host");
                return false;
            }
        },
        None => (segment, DEFAULT_PORT),
    };

    let path_and_query = match request.uri().query() {
        Some(query) => format!("/{rest}?{query}"),
        None => format!("/{rest}"),
    };
    let scheme = request.uri().scheme_str().unwrap_or("http").to_owned();
    let uri = Uri::builder().scheme(scheme.as_str()).authority(format!("{host}:{port}")).path_and_query(path_and_query).build();
    let host_value = HeaderValue::from_str(segment);

    match (uri, host_value) {
        (Ok(uri), Ok(host_value)) => {
            request.set_uri(uri);
            request.headers_mut().insert(http::header::HOST, host_value);
            true
        }
        _ => {
            warn!(segment, "embedded host is not a valid authority");
            false
        }
    }
}
