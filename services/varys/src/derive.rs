//! Credential derivation pipeline.
//!
//! # Purpose
//! Composes the varys-pass primitives into the engine's credential pair.
//! The username derives under the `Identification` scope from the user's
//! name; the password derives under `Authentication` from the username just
//! produced, chaining the two so a username change rederives the password.
//! Nothing here is stored; credentials are regenerated on every request.
use crate::model::{Service, User};
use varys_pass::{Scope, identity, site_key, site_password};

/// Derive the `(username, password)` pair for a user on a service.
pub fn derive_credentials(root: &str, service: &Service, user: &User) -> (String, String) {
    let counter = user.counter_for(&service.k());

    let username = derive(root, Scope::Identification, service, &user.name, counter);
    let password = derive(root, Scope::Authentication, service, &username, counter);

    (username, password)
}

fn derive(root: &str, scope: Scope, service: &Service, name: &str, counter: u32) -> String {
    // The site identity always derives under the authentication scope; the
    // caller's scope only steers the user identity and the final template.
    let site_identity = identity(Scope::Authentication, &service.key, root);
    let user_identity = identity(scope, &site_identity, name);
    let seed = site_key(scope, &user_identity, &service.address, counter);

    match scope {
        Scope::Identification => site_password(&seed, service.templates.user_template),
        Scope::Authentication => site_password(&seed, service.templates.password_template),
    }
}
