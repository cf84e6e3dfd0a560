use anyhow::Context;
use log::debug;
use reqwest::blocking::Response;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::json;
use crate::backend::AuthProvider;
use crate::session::{AuthUser, Session};
use crate::supabase::SupabaseClient;
use crate::check_response;

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

/// Sign ups answer with a session, or only with the user while the e-mail is unconfirmed
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(Session),
    User(AuthUser),
}

fn parse<T: DeserializeOwned>(response: Response, what: &str) -> anyhow::Result<T> {
    check_response(response)?
        .json()
        .with_context(|| format!("Could not parse {}", what))
}

impl SupabaseClient {

    fn token_grant(&self, grant_type: &str, body: serde_json::Value) -> anyhow::Result<Session> {
        debug!("Requesting token with grant {}", grant_type);
        let response = self.client.post(&["auth", "v1", "token"])
            .query(&[("grant_type", grant_type)])
            .json(&body)
            .send()?;
        parse(response, "session")
    }

}

impl AuthProvider for SupabaseClient {

    fn sign_in_with_password(&self, email: &str, password: &str) -> anyhow::Result<Session> {
        self.token_grant("password", serde_json::to_value(Credentials { email, password })?)
    }

    fn sign_up(&self, email: &str, password: &str) -> anyhow::Result<Option<Session>> {
        let response = self.client.post(&["auth", "v1", "signup"])
            .json(&Credentials { email, password })
            .send()?;
        Ok(match parse(response, "sign up response")? {
            SignUpResponse::Session(session) => Some(session),
            SignUpResponse::User(_) => None,
        })
    }

    fn sign_in_anonymously(&self) -> anyhow::Result<Session> {
        let response = self.client.post(&["auth", "v1", "signup"])
            .json(&json!({ "data": {} }))
            .send()?;
        parse(response, "anonymous session")
    }

    fn sign_out(&self, session: &Session) -> anyhow::Result<()> {
        let response = self.client.request_as(Method::POST, &["auth", "v1", "logout"], &session.access_token)
            .send()?;
        check_response(response)?;
        Ok(())
    }

    fn refresh_session(&self, refresh_token: &str) -> anyhow::Result<Session> {
        self.token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
    }

    fn get_user(&self, access_token: &str) -> anyhow::Result<AuthUser> {
        let response = self.client.request_as(Method::GET, &["auth", "v1", "user"], access_token)
            .send()?;
        parse(response, "user")
    }

    fn set_session(&self, session: Option<Session>) {
        self.bind_session(session.as_ref());
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_up_response_variants() {
        let confirmed: SignUpResponse = serde_json::from_value(json!({
            "access_token": "jwt",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 1763643600,
            "refresh_token": "r",
            "user": {"id": "u1", "email": "ida@example.com", "aud": "authenticated"}
        })).unwrap();
        assert!(matches!(confirmed, SignUpResponse::Session(s) if s.user.id == "u1"));

        let pending: SignUpResponse = serde_json::from_value(json!({
            "id": "u2",
            "email": "bo@example.com",
            "confirmation_sent_at": "2025-11-20T12:00:00Z"
        })).unwrap();
        assert!(matches!(pending, SignUpResponse::User(u) if u.id == "u2"));
    }
}
