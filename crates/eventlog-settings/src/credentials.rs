/// Username/password pair attached to a connection or an individual
/// operation, mirroring `client.NewUserCredentials(user, pass)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredentials {
    pub login: String,
    pub password: String,
}

impl UserCredentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructs_from_any_string_like() {
        let creds = UserCredentials::new("admin", "changeit");
        assert_eq!(creds.login, "admin");
        assert_eq!(creds.password, "changeit");
    }
}
