use actix_web::{Error, dev::ServiceRequest, web::Data};
use actix_web_httpauth::extractors::{
    AuthenticationError,
    basic::{BasicAuth, Config},
};
use constant_time_eq::constant_time_eq;
use secrecy::{ExposeSecret, SecretString};

/// Login and password every request outside `/health` must present.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub login: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: SecretString) -> Self {
        Self {
            login: login.into(),
            password,
        }
    }

    fn matches(&self, login: &str, password: &str) -> bool {
        // Both comparisons always run so the timing does not reveal which one failed.
        let login_ok = constant_time_eq(self.login.as_bytes(), login.as_bytes());
        let password_ok = constant_time_eq(
            self.password.expose_secret().as_bytes(),
            password.as_bytes(),
        );

        login_ok & password_ok
    }
}

pub async fn basic_validator(
    req: ServiceRequest,
    credentials: BasicAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    let config = req
        .app_data::<Config>()
        .cloned()
        .unwrap_or_default()
        .realm("taps");

    let Some(expected) = req.app_data::<Data<Credentials>>() else {
        return Err((AuthenticationError::from(config).into(), req));
    };

    let password = credentials.password().unwrap_or_default();
    if !expected.matches(credentials.user_id(), password) {
        return Err((AuthenticationError::from(config).into(), req));
    }

    Ok(req)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_must_match_exactly() {
        let credentials = Credentials::new("taps", SecretString::from("tpass"));

        assert!(credentials.matches("taps", "tpass"));
        assert!(!credentials.matches("taps", "tpas"));
        assert!(!credentials.matches("tap", "tpass"));
        assert!(!credentials.matches("", ""));
    }
}
