//! Certificate identity checks
//!
//! Validates requested identities before they reach the PKI backend, and checks
//! that an issued leaf actually carries the DNS names that were requested.

use crate::error::{TlsError, TlsResult};
use rustls::pki_types::CertificateDer;
use std::net::IpAddr;
use x509_parser::prelude::*;

/// Identity a certificate is requested for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CertificateIdentity {
    pub common_name: String,
    pub alt_names: Vec<String>,
}

impl CertificateIdentity {
    pub fn new(common_name: impl Into<String>, alt_names: Vec<String>) -> Self {
        Self {
            common_name: common_name.into(),
            alt_names,
        }
    }

    /// Reject empty or non-hostname-shaped names before any network call
    pub fn validate(&self) -> TlsResult<()> {
        if !is_hostname(&self.common_name) {
            return Err(TlsError::InvalidIdentity {
                reason: format!("common name '{}' is not a host name", self.common_name),
            });
        }
        if self.alt_names.is_empty() {
            return Err(TlsError::InvalidIdentity {
                reason: "at least one subject alternative name is required".to_string(),
            });
        }
        for name in &self.alt_names {
            if !is_hostname(name) {
                return Err(TlsError::InvalidIdentity {
                    reason: format!("alt name '{}' is not a host name", name),
                });
            }
        }
        Ok(())
    }

    /// Alt names in the comma-separated form the PKI issue endpoint expects
    pub fn alt_names_csv(&self) -> String {
        self.alt_names.join(",")
    }
}

/// RFC 1123 host name, optionally with a single leading wildcard label
fn is_hostname(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 || name.parse::<IpAddr>().is_ok() {
        return false;
    }
    let name = name.strip_prefix("*.").unwrap_or(name);
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// SAN (Subject Alternative Name) types we read back from certificates
#[derive(Debug, Clone, PartialEq)]
pub enum SanEntry {
    DnsName(String),
    IpAddress(IpAddr),
}

impl SanEntry {
    /// Check if this SAN entry satisfies a requested name.
    ///
    /// A wildcard SAN (`*.example.com`) covers exactly one extra label.
    pub fn matches(&self, requested: &str) -> bool {
        match self {
            SanEntry::DnsName(name) => {
                if name.eq_ignore_ascii_case(requested) {
                    return true;
                }
                match (name.strip_prefix("*."), requested.split_once('.')) {
                    (Some(suffix), Some((_, rest))) => suffix.eq_ignore_ascii_case(rest),
                    _ => false,
                }
            }
            SanEntry::IpAddress(ip) => requested.parse::<IpAddr>().ok() == Some(*ip),
        }
    }
}

/// Extract SAN entries from a DER certificate
pub fn extract_san_entries(cert: &CertificateDer<'_>) -> TlsResult<Vec<SanEntry>> {
    let (_, cert) = X509Certificate::from_der(cert.as_ref())
        .map_err(|e| TlsError::parse(format!("X.509 parse failed: {}", e)))?;

    let mut san_entries = Vec::new();

    if let Ok(Some(san_ext)) = cert.subject_alternative_name() {
        for name in &san_ext.value.general_names {
            match name {
                GeneralName::DNSName(dns) => {
                    san_entries.push(SanEntry::DnsName(dns.to_string()));
                }
                GeneralName::IPAddress(ip_bytes) => {
                    if let Some(ip) = parse_ip_address(ip_bytes) {
                        san_entries.push(SanEntry::IpAddress(ip));
                    }
                }
                _ => {}
            }
        }
    }

    Ok(san_entries)
}

/// Every requested alt name must be covered by a SAN on the issued leaf.
///
/// A backend that silently drops names is incompatible, so a gap is a
/// `ParseFailed`, not something to serve around.
pub fn ensure_requested_sans(
    leaf: &CertificateDer<'_>,
    identity: &CertificateIdentity,
) -> TlsResult<()> {
    let actual = extract_san_entries(leaf)?;

    let missing: Vec<&str> = identity
        .alt_names
        .iter()
        .filter(|requested| !actual.iter().any(|san| san.matches(requested)))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        tracing::debug!(sans = ?actual, "SAN validation passed");
        Ok(())
    } else {
        Err(TlsError::parse(format!(
            "issued certificate is missing requested SANs: {}",
            missing.join(", ")
        )))
    }
}

fn parse_ip_address(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::from(octets))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert_generation::DevelopmentPki;
    use std::time::Duration;

    fn leaf_for(alt_names: &[String]) -> CertificateDer<'static> {
        let pki = DevelopmentPki::new().unwrap();
        let material = pki
            .issue_for("grpc.example.com", alt_names, Duration::from_secs(600))
            .unwrap();
        let pem = ::pem::parse(material.certificate.as_bytes()).unwrap();
        CertificateDer::from(pem.contents().to_vec())
    }

    #[test]
    fn test_identity_validation() {
        let ok = CertificateIdentity::new("grpc.example.com", vec!["localhost".to_string()]);
        assert!(ok.validate().is_ok());

        let empty_cn = CertificateIdentity::new("", vec!["localhost".to_string()]);
        assert!(matches!(
            empty_cn.validate(),
            Err(TlsError::InvalidIdentity { .. })
        ));

        let no_sans = CertificateIdentity::new("grpc.example.com", vec![]);
        assert!(no_sans.validate().is_err());

        let bad_san = CertificateIdentity::new(
            "grpc.example.com",
            vec!["has space.example.com".to_string()],
        );
        assert!(bad_san.validate().is_err());

        let ip = CertificateIdentity::new("127.0.0.1", vec!["localhost".to_string()]);
        assert!(ip.validate().is_err());
    }

    #[test]
    fn test_alt_names_csv() {
        let identity = CertificateIdentity::new(
            "grpc.example.com",
            vec!["localhost".to_string(), "hello.internal".to_string()],
        );
        assert_eq!(identity.alt_names_csv(), "localhost,hello.internal");
    }

    #[test]
    fn test_extract_san_entries() {
        let leaf = leaf_for(&["localhost".to_string()]);
        let sans = extract_san_entries(&leaf).unwrap();

        assert!(sans
            .iter()
            .any(|san| matches!(san, SanEntry::DnsName(name) if name == "localhost")));
    }

    #[test]
    fn test_san_matching() {
        let san = SanEntry::DnsName("*.svc.cluster.local".to_string());
        assert!(san.matches("hello.svc.cluster.local"));
        assert!(!san.matches("a.hello.svc.cluster.local"));

        let ip = SanEntry::IpAddress("127.0.0.1".parse().unwrap());
        assert!(ip.matches("127.0.0.1"));
        assert!(!ip.matches("192.168.1.1"));
    }

    #[test]
    fn test_ensure_requested_sans() {
        let leaf = leaf_for(&["localhost".to_string()]);

        let covered = CertificateIdentity::new("grpc.example.com", vec!["localhost".to_string()]);
        assert!(ensure_requested_sans(&leaf, &covered).is_ok());

        let uncovered =
            CertificateIdentity::new("grpc.example.com", vec!["other.example.com".to_string()]);
        assert!(matches!(
            ensure_requested_sans(&leaf, &uncovered),
            Err(TlsError::ParseFailed { .. })
        ));
    }
}
