//! Issuer credential resolution
//!
//! Before validation the identity issuer must end up in exactly one of three
//! states, picked by [`IssuerPolicy::select`]:
//!
//! - **ExternallyManaged**: the issuer lives in a cluster Secret; only its
//!   trust anchors are copied into the tree.
//! - **UserSupplied**: certificate, key and trust anchors were all given.
//! - **SelfGenerated**: nothing was given, so a fresh root is generated and
//!   doubles as its own trust anchor.

use k8s_openapi::api::core::v1::Secret;
use tracing::{debug, info};

use crate::cluster::{ClusterApi, InstallContext};
use crate::pki::{CredentialService, IssuerCertData};
use crate::values::Values;
use crate::{Error, Result, IDENTITY_ISSUER_SECRET_NAME};

/// Secret key holding the trust anchors
pub const TRUST_ANCHORS_KEY: &str = "ca.crt";
/// Secret key holding the issuer certificate
pub const ISSUER_CRT_KEY: &str = "tls.crt";
/// Secret key holding the issuer private key
pub const ISSUER_KEY_KEY: &str = "tls.key";

/// Where the identity issuer's credentials come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerPolicy {
    /// Held in the cluster's issuer Secret
    ExternallyManaged,
    /// Given through flags or values
    UserSupplied,
    /// Generated for this install
    SelfGenerated,
}

impl IssuerPolicy {
    /// Pick the policy from the issuer scheme and the populated fields.
    pub fn select(values: &Values) -> Self {
        if values.uses_external_issuer() {
            Self::ExternallyManaged
        } else if values.issuer_data().any_present() {
            Self::UserSupplied
        } else {
            Self::SelfGenerated
        }
    }
}

/// Common name of a generated root: `identity.<namespace>.<trust domain>`
pub fn issuer_name(namespace: &str, trust_domain: &str) -> String {
    format!("identity.{}.{}", namespace, trust_domain)
}

/// Resolve the issuer credentials in `values` according to their policy.
///
/// `cluster` is `None` when cluster checks are skipped, which rules out an
/// externally managed issuer. Consistency of the resulting triple is checked
/// later by the validator.
pub async fn initialize_issuer_credentials(
    ctx: &InstallContext,
    cluster: Option<&dyn ClusterApi>,
    namespace: &str,
    values: &mut Values,
    creds: &dyn CredentialService,
) -> Result<IssuerPolicy> {
    let policy = IssuerPolicy::select(values);
    debug!(?policy, "resolving issuer credentials");

    match policy {
        IssuerPolicy::ExternallyManaged => {
            let Some(cluster) = cluster else {
                return Err(Error::credential(
                    "--ignore-cluster is not supported when --identity-external-issuer=true",
                ));
            };
            let external = fetch_external_issuer_data(ctx, cluster, namespace).await?;
            values.identity_trust_anchors_pem = external.trust_anchors;
        }
        IssuerPolicy::UserSupplied => {
            let data = values.issuer_data();
            if data.trust_anchors.is_empty() {
                return Err(Error::credential(
                    "a trust anchors file must be specified if other credentials are provided",
                ));
            }
            if data.issuer_crt.is_empty() {
                return Err(Error::credential(
                    "a certificate file must be specified if other credentials are provided",
                ));
            }
            if data.issuer_key.is_empty() {
                return Err(Error::credential(
                    "a private key file must be specified if other credentials are provided",
                ));
            }
        }
        IssuerPolicy::SelfGenerated => {
            let subject = issuer_name(namespace, &values.identity_trust_domain);
            let root = creds.generate_root_ca(&subject).map_err(|e| {
                Error::credential(format!(
                    "failed to generate root certificate for identity: {}",
                    e
                ))
            })?;
            info!(subject = %subject, "generated identity issuer root");
            values.identity.issuer.tls.key_pem = root.key_pem;
            values.identity.issuer.tls.crt_pem = root.cert_pem.clone();
            values.identity_trust_anchors_pem = root.cert_pem;
        }
    }

    Ok(policy)
}

/// Read the externally managed issuer from its Secret in `namespace`.
pub async fn fetch_external_issuer_data<C: ClusterApi + ?Sized>(
    ctx: &InstallContext,
    cluster: &C,
    namespace: &str,
) -> Result<IssuerCertData> {
    let secret = ctx
        .run(cluster.get_secret(namespace, IDENTITY_ISSUER_SECRET_NAME))
        .await?
        .ok_or_else(|| {
            Error::credential(format!(
                "failed to read the external issuer: secret {}/{} not found",
                namespace, IDENTITY_ISSUER_SECRET_NAME
            ))
        })?;

    Ok(IssuerCertData {
        trust_anchors: secret_entry(&secret, TRUST_ANCHORS_KEY, "trust anchors")?,
        issuer_crt: secret_entry(&secret, ISSUER_CRT_KEY, "issuer certificate")?,
        issuer_key: secret_entry(&secret, ISSUER_KEY_KEY, "issuer key")?,
    })
}

fn secret_entry(secret: &Secret, key: &str, what: &str) -> Result<String> {
    let missing = || {
        Error::credential(format!(
            "key {} containing the {} needs to exist in secret {} if --identity-external-issuer=true",
            key, what, IDENTITY_ISSUER_SECRET_NAME
        ))
    };
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(missing)?;
    let text = String::from_utf8(bytes.0.clone()).map_err(|_| {
        Error::credential(format!(
            "key {} in secret {} is not valid UTF-8",
            key, IDENTITY_ISSUER_SECRET_NAME
        ))
    })?;
    if text.trim().is_empty() {
        return Err(missing());
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::pki::{MockCredentialService, RcgenCredentials, RootCa};
    use crate::{ISSUER_SCHEME_EXTERNAL, DEFAULT_NAMESPACE};
    use k8s_openapi::ByteString;
    use mockall::predicate::eq;
    use std::collections::BTreeMap;

    fn issuer_secret(entries: &[(&str, &str)]) -> Secret {
        Secret {
            data: Some(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect::<BTreeMap<_, _>>(),
            ),
            ..Default::default()
        }
    }

    // =========================================================================
    // Story: nothing supplied, a root is generated
    // =========================================================================

    #[tokio::test]
    async fn empty_tree_generates_a_self_anchored_root() {
        let mut values = Values::new().unwrap();
        let policy = initialize_issuer_credentials(
            &InstallContext::default(),
            None,
            DEFAULT_NAMESPACE,
            &mut values,
            &RcgenCredentials,
        )
        .await
        .unwrap();

        assert_eq!(policy, IssuerPolicy::SelfGenerated);
        let tls = &values.identity.issuer.tls;
        assert!(tls.crt_pem.contains("BEGIN CERTIFICATE"));
        assert!(tls.key_pem.contains("PRIVATE KEY"));
        assert_eq!(values.identity_trust_anchors_pem, tls.crt_pem);

        RcgenCredentials.verify_issuer(&values.issuer_data()).unwrap();
    }

    #[tokio::test]
    async fn generated_root_is_named_after_namespace_and_trust_domain() {
        let mut creds = MockCredentialService::new();
        creds
            .expect_generate_root_ca()
            .with(eq("identity.mesh.example.org"))
            .times(1)
            .returning(|_| {
                Ok(RootCa {
                    cert_pem: "CERT".to_string(),
                    key_pem: "KEY".to_string(),
                })
            });

        let mut values = Values::new().unwrap();
        values.identity_trust_domain = "example.org".to_string();
        initialize_issuer_credentials(&InstallContext::default(), None, "mesh", &mut values, &creds)
            .await
            .unwrap();

        assert_eq!(values.identity.issuer.tls.crt_pem, "CERT");
        assert_eq!(values.identity.issuer.tls.key_pem, "KEY");
        assert_eq!(values.identity_trust_anchors_pem, "CERT");
    }

    // =========================================================================
    // Story: user-supplied credentials must be complete
    // =========================================================================

    #[tokio::test]
    async fn certificate_and_key_without_anchors_fail() {
        let mut values = Values::new().unwrap();
        values.identity.issuer.tls.crt_pem = "crt".to_string();
        values.identity.issuer.tls.key_pem = "key".to_string();

        let err = initialize_issuer_credentials(
            &InstallContext::default(),
            None,
            DEFAULT_NAMESPACE,
            &mut values,
            &MockCredentialService::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Credential(_)));
        assert!(err.to_string().contains("trust anchors"));
    }

    #[tokio::test]
    async fn each_missing_component_is_named() {
        let cases = [
            (("", "key", "anchors"), "a certificate file"),
            (("crt", "", "anchors"), "a private key file"),
        ];
        for ((crt, key, anchors), expected) in cases {
            let mut values = Values::new().unwrap();
            values.identity.issuer.tls.crt_pem = crt.to_string();
            values.identity.issuer.tls.key_pem = key.to_string();
            values.identity_trust_anchors_pem = anchors.to_string();

            let err = initialize_issuer_credentials(
                &InstallContext::default(),
                None,
                DEFAULT_NAMESPACE,
                &mut values,
                &MockCredentialService::new(),
            )
            .await
            .unwrap_err();
            assert!(err.to_string().starts_with(expected), "{err}");
        }
    }

    #[tokio::test]
    async fn complete_user_set_is_kept_as_is() {
        let mut values = Values::new().unwrap();
        values.identity.issuer.tls.crt_pem = "crt".to_string();
        values.identity.issuer.tls.key_pem = "key".to_string();
        values.identity_trust_anchors_pem = "anchors".to_string();

        let policy = initialize_issuer_credentials(
            &InstallContext::default(),
            None,
            DEFAULT_NAMESPACE,
            &mut values,
            &MockCredentialService::new(),
        )
        .await
        .unwrap();
        assert_eq!(policy, IssuerPolicy::UserSupplied);
        assert_eq!(values.identity_trust_anchors_pem, "anchors");
    }

    // =========================================================================
    // Story: externally managed issuer
    // =========================================================================

    #[tokio::test]
    async fn external_issuer_requires_a_cluster() {
        let mut values = Values::new().unwrap();
        values.identity.issuer.scheme = ISSUER_SCHEME_EXTERNAL.to_string();

        let err = initialize_issuer_credentials(
            &InstallContext::default(),
            None,
            DEFAULT_NAMESPACE,
            &mut values,
            &MockCredentialService::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("--ignore-cluster is not supported"));
    }

    #[tokio::test]
    async fn external_issuer_copies_only_the_anchors() {
        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_secret()
            .with(eq("mesh"), eq(IDENTITY_ISSUER_SECRET_NAME))
            .returning(|_, _| {
                Ok(Some(issuer_secret(&[
                    ("ca.crt", "ANCHORS"),
                    ("tls.crt", "CRT"),
                    ("tls.key", "KEY"),
                ])))
            });

        let mut values = Values::new().unwrap();
        values.identity.issuer.scheme = ISSUER_SCHEME_EXTERNAL.to_string();

        let policy = initialize_issuer_credentials(
            &InstallContext::default(),
            Some(&cluster),
            "mesh",
            &mut values,
            &MockCredentialService::new(),
        )
        .await
        .unwrap();

        assert_eq!(policy, IssuerPolicy::ExternallyManaged);
        assert_eq!(values.identity_trust_anchors_pem, "ANCHORS");
        assert!(values.identity.issuer.tls.crt_pem.is_empty());
        assert!(values.identity.issuer.tls.key_pem.is_empty());
    }

    #[tokio::test]
    async fn missing_issuer_secret_or_key_fails() {
        let mut cluster = MockClusterApi::new();
        cluster.expect_get_secret().returning(|_, _| Ok(None));
        let err = fetch_external_issuer_data(&InstallContext::default(), &cluster, "mesh")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));

        let mut cluster = MockClusterApi::new();
        cluster
            .expect_get_secret()
            .returning(|_, _| Ok(Some(issuer_secret(&[("tls.crt", "CRT"), ("tls.key", "KEY")]))));
        let err = fetch_external_issuer_data(&InstallContext::default(), &cluster, "mesh")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("key ca.crt containing the trust anchors"));
    }

    #[test]
    fn policy_selection() {
        let mut values = Values::new().unwrap();
        assert_eq!(IssuerPolicy::select(&values), IssuerPolicy::SelfGenerated);

        values.identity_trust_anchors_pem = "anchors".to_string();
        assert_eq!(IssuerPolicy::select(&values), IssuerPolicy::UserSupplied);

        values.identity.issuer.scheme = ISSUER_SCHEME_EXTERNAL.to_string();
        assert_eq!(IssuerPolicy::select(&values), IssuerPolicy::ExternallyManaged);
    }
}
