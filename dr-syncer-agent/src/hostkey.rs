//! Loads this node's SSH host key, generating and persisting a fresh 2048-bit
//! RSA key on first start. Mirrors `dr-syncer-controller::keys`'s key
//! generation (same `rsa` + `ssh-key` crates), since it's the same "mint an
//! SSH identity" operation applied to the host side instead of a client
//! credential.

use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use ssh_key::{LineEnding, PrivateKey};
use std::path::Path;

const RSA_BITS: usize = 2048;

pub fn load_or_generate(path: &Path) -> anyhow::Result<String> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        return Ok(existing);
    }
    let rsa_key = RsaPrivateKey::new(&mut OsRng, RSA_BITS)?;
    let key = PrivateKey::from(ssh_key::private::RsaKeypair::try_from(rsa_key)?);
    let pem = key.to_openssh(LineEnding::LF)?.to_string();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &pem)?;
    Ok(pem)
}

/// Parses an `authorized_key`-style file down to the single public key this
/// agent trusts (§4.3/§6: one authorized key per node, written by the Key
/// Authority).
pub fn load_authorized_key(path: &Path) -> anyhow::Result<ssh_key::PublicKey> {
    let line = std::fs::read_to_string(path)?;
    let first = line
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("authorized key file {} is empty", path.display()))?;
    Ok(ssh_key::PublicKey::from_openssh(first.trim())?)
}
