//! SSH credential handling.
//!
//! Builds connect to their instance over SSH. The keypair either comes
//! from a user-referenced secret or is generated here; either way the
//! connection material ends up in a `<build>-ssh-credentials` secret the
//! provisioners read, updated with the instance's address once known.

use crate::error::ControllerError;
use crds::{AWSBuild, SecretReference};
use ec2_client::StaticCredentials;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use std::sync::Arc;
use tracing::info;

/// Secret key holding the SSH private key (kubernetes.io/ssh-auth convention).
pub const SSH_PRIVATE_KEY: &str = "ssh-privatekey";
/// Secret key holding the SSH public key.
pub const SSH_PUBLIC_KEY: &str = "ssh-publickey";

/// An OpenSSH keypair.
#[derive(Debug, Clone, Default)]
pub struct SshKeyPair {
    /// PEM-encoded OpenSSH private key
    pub private_key: String,
    /// Single-line OpenSSH public key
    pub public_key: String,
}

/// SSH connection material for one build.
#[derive(Debug, Clone)]
pub struct SshCredentials {
    /// Address of the instance, once one is reachable
    pub host: Option<String>,
    /// Account the provisioners log in as
    pub username: String,
    /// PEM-encoded OpenSSH private key
    pub private_key: String,
    /// Single-line OpenSSH public key
    pub public_key: String,
}

/// Collaborator persisting SSH connection material for a build.
///
/// Abstracted as a trait so reconciler tests can observe what would be
/// written without a Kubernetes API server.
#[async_trait::async_trait]
pub trait CredentialsStore: Send + Sync {
    /// Reads a keypair out of a referenced secret.
    async fn read_keypair(&self, reference: &SecretReference)
        -> Result<SshKeyPair, ControllerError>;

    /// Persists connection material for the build.
    async fn ensure(
        &self,
        build_name: &str,
        credentials: &SshCredentials,
    ) -> Result<(), ControllerError>;
}

/// Generates a fresh ed25519 keypair in OpenSSH encoding.
pub fn generate_keypair() -> Result<SshKeyPair, ControllerError> {
    let private =
        ssh_key::PrivateKey::random(&mut ssh_key::rand_core::OsRng, ssh_key::Algorithm::Ed25519)
            .map_err(|e| ControllerError::Credentials(format!("cannot generate ssh key: {e}")))?;
    let public = private
        .public_key()
        .to_openssh()
        .map_err(|e| ControllerError::Credentials(format!("cannot encode public key: {e}")))?;
    let private = private
        .to_openssh(ssh_key::LineEnding::LF)
        .map_err(|e| ControllerError::Credentials(format!("cannot encode private key: {e}")))?
        .to_string();
    Ok(SshKeyPair {
        private_key: private,
        public_key: public,
    })
}

/// Name of the credentials secret for a build.
pub fn credentials_secret_name(build_name: &str) -> String {
    format!("{build_name}-ssh-credentials")
}

/// Resolves the SSH keypair for a build.
///
/// A referenced secret wins. Otherwise, with `generateSSHKey` set, a fresh
/// keypair is generated, persisted through the store, and the reference is
/// recorded on the spec so later passes reuse it. Anything else is a
/// misconfigured build.
pub async fn resolve_ssh_key(
    store: &Arc<dyn CredentialsStore>,
    build: &mut AWSBuild,
) -> Result<SshKeyPair, ControllerError> {
    let name = build
        .metadata
        .name
        .clone()
        .ok_or_else(|| ControllerError::InvalidConfig("AWSBuild missing name".to_string()))?;

    if let Some(reference) = &build.spec.ssh_credentials_ref {
        return store.read_keypair(reference).await;
    }

    if build.spec.generate_ssh_key {
        let keypair = generate_keypair()?;
        store
            .ensure(
                &name,
                &SshCredentials {
                    host: None,
                    username: build.spec.username.clone(),
                    private_key: keypair.private_key.clone(),
                    public_key: keypair.public_key.clone(),
                },
            )
            .await?;
        build.spec.ssh_credentials_ref = Some(SecretReference::new(credentials_secret_name(&name)));
        info!(build = %name, "generated ssh keypair for build");
        return Ok(keypair);
    }

    Err(ControllerError::InvalidConfig(
        "no ssh key provided, set spec.generateSSHKey or reference a credentials secret"
            .to_string(),
    ))
}

/// Credentials store backed by Kubernetes secrets.
pub struct K8sCredentialsStore {
    client: Client,
    namespace: String,
}

impl std::fmt::Debug for K8sCredentialsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("K8sCredentialsStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl K8sCredentialsStore {
    /// Store operating on secrets in the given namespace.
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn secret_string(secret: &Secret, key: &str) -> Result<String, ControllerError> {
        let value = secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .ok_or_else(|| {
                ControllerError::Credentials(format!("secret is missing the {key} key"))
            })?;
        String::from_utf8(value.0.clone())
            .map_err(|_| ControllerError::Credentials(format!("secret key {key} is not UTF-8")))
    }
}

#[async_trait::async_trait]
impl CredentialsStore for K8sCredentialsStore {
    async fn read_keypair(
        &self,
        reference: &SecretReference,
    ) -> Result<SshKeyPair, ControllerError> {
        let namespace = reference.namespace.as_deref().unwrap_or(&self.namespace);
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(&reference.name).await?;
        Ok(SshKeyPair {
            private_key: Self::secret_string(&secret, SSH_PRIVATE_KEY)?,
            public_key: Self::secret_string(&secret, SSH_PUBLIC_KEY)?,
        })
    }

    async fn ensure(
        &self,
        build_name: &str,
        credentials: &SshCredentials,
    ) -> Result<(), ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let name = credentials_secret_name(build_name);

        let mut string_data = serde_json::Map::new();
        string_data.insert("username".to_string(), credentials.username.clone().into());
        string_data.insert(
            SSH_PRIVATE_KEY.to_string(),
            credentials.private_key.clone().into(),
        );
        string_data.insert(
            SSH_PUBLIC_KEY.to_string(),
            credentials.public_key.clone().into(),
        );
        if let Some(host) = &credentials.host {
            string_data.insert("host".to_string(), host.clone().into());
        }

        let secret = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": name,
                "namespace": self.namespace,
            },
            "type": "Opaque",
            "stringData": string_data,
        });

        api.patch(
            &name,
            &PatchParams::apply("awsbuild-controller").force(),
            &Patch::Apply(&secret),
        )
        .await?;
        Ok(())
    }
}

/// Reads static AWS credentials out of a referenced secret.
pub async fn read_aws_credentials(
    client: &Client,
    namespace: &str,
    reference: &SecretReference,
) -> Result<StaticCredentials, ControllerError> {
    let namespace = reference.namespace.as_deref().unwrap_or(namespace);
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = api.get(&reference.name).await?;
    Ok(StaticCredentials {
        access_key_id: K8sCredentialsStore::secret_string(&secret, "accessKeyId")?,
        secret_access_key: K8sCredentialsStore::secret_string(&secret, "secretAccessKey")?,
    })
}
