//! Per-method credential material generation.

use {
    anyhow::anyhow,
    argon2::{
        Argon2,
        password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
    },
    chrono::{DateTime, Duration, Utc},
    rand::{Rng, distr::Alphanumeric},
};

use crate::model::{AuthMethod, CredentialSecrets};

const API_KEY_LEN: usize = 32;
const API_SECRET_LEN: usize = 48;
const PASSWORD_LEN: usize = 24;
const TOKEN_LEN: usize = 64;
/// Bearer tokens expire after 30 days.
const TOKEN_TTL_DAYS: i64 = 30;
/// Self-signed device certificates are issued for one year.
const CERTIFICATE_TTL_DAYS: i64 = 365;

/// Generated secret material plus any one-time plaintext and expiry.
pub struct GeneratedSecrets {
    pub secrets: CredentialSecrets,
    /// Plaintext password, returned once; the stored record holds only the
    /// argon2 hash.
    pub password: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
}

pub fn random_string(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate secret material for `method`.
pub fn generate(
    method: AuthMethod,
    device_uid: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<GeneratedSecrets> {
    match method {
        AuthMethod::ApiKey => Ok(GeneratedSecrets {
            secrets: CredentialSecrets::ApiKey {
                key: random_string(API_KEY_LEN),
                secret: random_string(API_SECRET_LEN),
            },
            password: None,
            valid_until: None,
        }),
        AuthMethod::UsernamePassword => {
            let username = format!("dev-{}-{}", sanitize(device_uid), random_string(6));
            let password = random_string(PASSWORD_LEN);
            let salt = SaltString::generate(&mut OsRng);
            let hash = Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map_err(|e| anyhow!("password hashing failed: {e}"))?
                .to_string();
            Ok(GeneratedSecrets {
                secrets: CredentialSecrets::UsernamePassword {
                    username,
                    password_hash: hash,
                },
                password: Some(password),
                valid_until: None,
            })
        },
        AuthMethod::Certificate => {
            let rcgen::CertifiedKey { cert, key_pair } =
                rcgen::generate_simple_self_signed(vec![device_uid.to_string()])
                    .map_err(|e| anyhow!("certificate generation failed: {e}"))?;
            Ok(GeneratedSecrets {
                secrets: CredentialSecrets::Certificate {
                    certificate_pem: cert.pem(),
                    private_key_pem: key_pair.serialize_pem(),
                },
                password: None,
                valid_until: Some(now + Duration::days(CERTIFICATE_TTL_DAYS)),
            })
        },
        AuthMethod::Token => Ok(GeneratedSecrets {
            secrets: CredentialSecrets::Token {
                token: random_string(TOKEN_LEN),
            },
            password: None,
            valid_until: Some(now + Duration::days(TOKEN_TTL_DAYS)),
        }),
        AuthMethod::Oauth => Err(anyhow!(
            "oauth credentials are issued by the external identity provider"
        )),
        AuthMethod::None => Ok(GeneratedSecrets {
            secrets: CredentialSecrets::None,
            password: None,
            valid_until: None,
        }),
    }
}

/// Keep uids usable inside generated usernames.
fn sanitize(uid: &str) -> String {
    uid.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(16)
        .collect::<String>()
        .to_lowercase()
}
