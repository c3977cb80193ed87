use std::collections::HashSet;
use x509_parser::der_parser::parse_der;

pub type Roles = HashSet<String>;

/// Certificate extension carrying the caller's roles as a comma separated list.
pub const ROLE_OID: &str = "1.2.840.10070.8.1";

pub const START_JOB: &str = "/remotejobs.RemoteJobs/StartJob";
pub const STOP_JOB: &str = "/remotejobs.RemoteJobs/StopJob";
pub const QUERY_STATUS: &str = "/remotejobs.RemoteJobs/QueryStatus";
pub const STREAM_OUTPUT: &str = "/remotejobs.RemoteJobs/StreamOutput";

/// Which roles may call which method. Anything not listed is denied.
const PERMISSIONS: &[(&str, &[&str])] = &[
    (START_JOB, &["full"]),
    (STOP_JOB, &["full"]),
    (QUERY_STATUS, &["full", "read"]),
    (STREAM_OUTPUT, &["full", "read"]),
];

/// Parse the value of the role extension.
///
/// The value is either the bare list (`full,read`) or the list wrapped in a DER string, which
/// is what `openssl` produces for `ASN1:UTF8String:full,read`.
pub fn parse_roles(value: &[u8]) -> Roles {
    let der_text = match parse_der(value) {
        Ok((rest, object)) if rest.is_empty() => object.as_str().ok().map(str::to_string),
        _ => None,
    };
    let text = der_text.unwrap_or_else(|| String::from_utf8_lossy(value).into_owned());
    text.split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(String::from)
        .collect()
}

pub fn is_authorized(method: &str, roles: &Roles) -> bool {
    PERMISSIONS
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, allowed)| allowed.iter().any(|role| roles.contains(*role)))
        .unwrap_or(false)
}
