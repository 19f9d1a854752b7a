//! Key Authority (§4.3): ensures a single copy of SSH key material exists
//! per `RemoteCluster`, rotates it on a configurable interval, and
//! distributes the public half to each node agent's authorized_keys store.

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use ssh_key::{LineEnding, PrivateKey};
use std::time::Duration;

use crate::util::Error;

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(15);
pub const DEFAULT_RENEW_EVERY: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_EVERY: Duration = Duration::from_secs(2);
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const RSA_BITS: usize = 2048;

/// The key blob written per `RemoteCluster`: private key, public key, and an
/// `authorized_keys`-formatted line, all present together (§4.3).
#[derive(Clone, Debug, PartialEq)]
pub struct KeyMaterial {
    pub private_pem: String,
    pub public_openssh: String,
    pub authorized_keys_line: String,
}

/// Generates a fresh 2048-bit RSA keypair and renders it as the three forms
/// the Key Authority must write atomically.
pub fn generate_key_material(comment: &str) -> Result<KeyMaterial, Error> {
    let rsa_key = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
        .map_err(|e| Error::UserInput(format!("rsa keygen failed: {e}")))?;
    let mut ssh_key = PrivateKey::from(
        ssh_key::private::RsaKeypair::try_from(rsa_key)
            .map_err(|e| Error::UserInput(format!("rsa->ssh-key conversion failed: {e}")))?,
    );
    ssh_key.set_comment(comment);

    let private_pem = ssh_key
        .to_openssh(LineEnding::LF)
        .map_err(|e| Error::UserInput(format!("encode private key: {e}")))?
        .to_string();
    let public = ssh_key.public_key();
    let public_openssh = public
        .to_openssh()
        .map_err(|e| Error::UserInput(format!("encode public key: {e}")))?;
    let authorized_keys_line = format!("{public_openssh} {comment}\n");

    Ok(KeyMaterial {
        private_pem,
        public_openssh,
        authorized_keys_line,
    })
}

/// Appends a public key to an `authorized_keys`-style blob as an
/// update-merge (§4.3): ensures the existing blob ends in a newline before
/// appending, and does not deduplicate (authorization lists are set-like by
/// line, and removing an in-use line during a rotation window would be
/// unsafe — see §9's key-rotation note).
pub fn append_authorized_key(existing: &str, new_line: &str) -> String {
    if existing.is_empty() {
        return new_line.to_string();
    }
    if existing.ends_with('\n') {
        format!("{existing}{new_line}")
    } else {
        format!("{existing}\n{new_line}")
    }
}

/// Attempts to become the sole issuer of key material for `cluster_name` via
/// a named lease, generates fresh material if still missing after
/// acquisition, and returns it. Mirrors
/// `storage-operator::clusters::reconcile::run`'s acquire-or-renew shape.
pub async fn elect_and_issue(
    client: Client,
    namespace: &str,
    cluster_name: &str,
    holder_id: String,
) -> Result<Option<KeyMaterial>, Error> {
    let leadership = LeaseLock::new(
        client,
        namespace,
        LeaseLockParams {
            holder_id,
            lease_name: format!("dr-syncer-keyauthority-{cluster_name}"),
            lease_ttl: DEFAULT_LEASE_TTL,
        },
    );
    match leadership.try_acquire_or_renew().await {
        Ok(LeaseLockResult::Acquired(_)) => {
            let material = generate_key_material(&format!("dr-syncer@{cluster_name}"))?;
            Ok(Some(material))
        }
        Ok(LeaseLockResult::NotAcquired(_)) => Ok(None),
        Err(e) => Err(Error::Unreachable(cluster_name.to_string(), e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_to_empty_blob() {
        assert_eq!(append_authorized_key("", "ssh-rsa AAA foo\n"), "ssh-rsa AAA foo\n");
    }

    #[test]
    fn append_adds_missing_trailing_newline() {
        let existing = "ssh-rsa AAA one";
        let merged = append_authorized_key(existing, "ssh-rsa BBB two\n");
        assert_eq!(merged, "ssh-rsa AAA one\nssh-rsa BBB two\n");
    }

    #[test]
    fn append_does_not_dedupe() {
        let existing = "ssh-rsa AAA one\n";
        let merged = append_authorized_key(existing, "ssh-rsa AAA one\n");
        assert_eq!(merged, "ssh-rsa AAA one\nssh-rsa AAA one\n");
    }

    #[test]
    fn generates_matching_key_forms() {
        let material = generate_key_material("test@dr-syncer").expect("keygen");
        assert!(material.private_pem.contains("BEGIN OPENSSH PRIVATE KEY"));
        assert!(material.public_openssh.starts_with("ssh-rsa"));
        assert!(material.authorized_keys_line.ends_with('\n'));
    }
}
