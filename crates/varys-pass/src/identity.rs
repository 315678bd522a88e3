//! Identity and site-key derivation.
//!
//! # Purpose
//! Implements the two HMAC-SHA-512 derivations underneath every credential:
//! `identity` turns a key and a salt into a 64-byte intermediate, and
//! `site_key` folds a site address and rotation counter into the final seed
//! handed to the password renderer.
use hmac::{Hmac, Mac};
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;

/// Domain-separation tag applied to every derivation.
///
/// Two scopes exist: `Identification` feeds username generation and
/// `Authentication` feeds password generation. Mixing the tag into the MAC
/// input keeps the two keyspaces disjoint even for identical salts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Authentication,
    Identification,
}

impl Scope {
    pub fn tag(&self) -> &'static str {
        match self {
            Scope::Authentication => "com.lyndir.masterpassword",
            Scope::Identification => "com.lyndir.masterpassword.login",
        }
    }
}

/// Derive a 64-byte identity from a key and a salt under the given scope.
///
/// The salt is length-prefixed (big endian) before being fed to the MAC so
/// that distinct (tag, salt) splits can never collide.
pub fn identity(scope: Scope, key: &[u8], salt: &str) -> [u8; 64] {
    let mut mac = HmacSha512::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(scope.tag().as_bytes());
    mac.update(&(salt.len() as u32).to_be_bytes());
    mac.update(salt.as_bytes());
    finalize(mac)
}

/// Derive the per-site seed from an identity, the site address, and the
/// rotation counter. Incrementing the counter yields an unrelated seed,
/// which is how credential rotation works without changing any stored key.
pub fn site_key(scope: Scope, identity: &[u8; 64], site: &str, counter: u32) -> [u8; 64] {
    let mut mac = HmacSha512::new_from_slice(identity).expect("HMAC can take key of any size");
    mac.update(scope.tag().as_bytes());
    mac.update(&(site.len() as u32).to_be_bytes());
    mac.update(site.as_bytes());
    mac.update(&counter.to_be_bytes());
    finalize(mac)
}

fn finalize(mac: HmacSha512) -> [u8; 64] {
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_deterministic() {
        let a = identity(Scope::Authentication, b"key", "salt");
        let b = identity(Scope::Authentication, b"key", "salt");
        assert_eq!(a, b);
    }

    #[test]
    fn scopes_are_domain_separated() {
        let auth = identity(Scope::Authentication, b"key", "salt");
        let ident = identity(Scope::Identification, b"key", "salt");
        assert_ne!(auth, ident);
    }

    #[test]
    fn salt_length_prefix_prevents_boundary_shifts() {
        // "ab" + "c" must not derive the same bytes as "a" + "bc".
        let a = identity(Scope::Authentication, b"ab", "c");
        let b = identity(Scope::Authentication, b"a", "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn site_key_changes_with_counter() {
        let id = identity(Scope::Authentication, b"key", "salt");
        let zero = site_key(Scope::Authentication, &id, "db:5432", 0);
        let one = site_key(Scope::Authentication, &id, "db:5432", 1);
        assert_ne!(zero, one);
    }

    #[test]
    fn site_key_changes_with_address() {
        let id = identity(Scope::Authentication, b"key", "salt");
        let a = site_key(Scope::Authentication, &id, "db:5432", 0);
        let b = site_key(Scope::Authentication, &id, "db:5433", 0);
        assert_ne!(a, b);
    }
}
