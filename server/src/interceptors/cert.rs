use crate::services::jobservice::authz::{parse_roles, Roles, ROLE_OID};
use tonic::{Request, Status};
use x509_parser::{certificate::X509Certificate, traits::FromDer};

/// A tonic interceptor service function.
///
/// Extracts the role claims from the client certificate and adds them to the request extensions.
/// A request without a client certificate never reaches the service.
pub fn extract_roles(mut req: Request<()>) -> Result<Request<()>, Status> {
    let client_certs = req
        .peer_certs()
        .ok_or_else(|| Status::unauthenticated("Request missing client cert"))?;
    let leaf = client_certs
        .first()
        .ok_or_else(|| Status::unauthenticated("Request missing client cert"))?;

    // rustls hands over the certs DER encoded
    let roles = roles_from_der(leaf.get_ref())
        .ok_or_else(|| Status::unauthenticated("Bad client cert"))?;
    req.extensions_mut().insert(RolesExtension { roles });
    Ok(req)
}

/// Roles claimed by a DER encoded certificate. A certificate without the role extension has no
/// roles; `None` means the certificate could not be parsed.
pub fn roles_from_der(der: &[u8]) -> Option<Roles> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let roles = cert
        .tbs_certificate
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == ROLE_OID)
        .map(|ext| parse_roles(ext.value))
        .unwrap_or_default();
    Some(roles)
}

pub struct RolesExtension {
    pub roles: Roles,
}
