use anyhow::{bail, Context};
use url::Url;

pub const URL_ENV: &str = "SUPABASE_URL";
pub const PUBLISHABLE_KEY_ENV: &str = "SUPABASE_PUBLISHABLE_KEY";

/// The two credentials needed to reach the backend project
#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    /// Base url of the project, always ending with a `/`
    pub url: Url,
    /// The public (anon) api key of the project
    pub publishable_key: String,
}

impl BackendConfig {

    pub fn new(url: &str, publishable_key: &str) -> anyhow::Result<Self> {
        let mut url = Url::parse(url.trim()).with_context(|| format!("Invalid project url: {}", url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("Project url must be http or https, got {}", url.scheme());
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        let publishable_key = publishable_key.trim();
        if publishable_key.is_empty() {
            bail!("Publishable key must not be empty");
        }
        Ok(Self { url, publishable_key: publishable_key.to_string() })
    }

    /// Reads the configuration from the environment (and a `.env` file, if there is one)
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let url = std::env::var(URL_ENV).with_context(|| format!("{} not set", URL_ENV))?;
        let key = std::env::var(PUBLISHABLE_KEY_ENV).with_context(|| format!("{} not set", PUBLISHABLE_KEY_ENV))?;
        Self::new(&url, &key)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_url() {
        let config = BackendConfig::new(" https://abc.supabase.co ", " key ").unwrap();
        assert_eq!(config.url.as_str(), "https://abc.supabase.co/");
        assert_eq!(config.publishable_key, "key");
        let nested = BackendConfig::new("http://localhost:54321/project", "key").unwrap();
        assert_eq!(nested.url.as_str(), "http://localhost:54321/project/");
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(BackendConfig::new("ftp://abc.supabase.co", "key").is_err());
        assert!(BackendConfig::new("not a url", "key").is_err());
        assert!(BackendConfig::new("https://abc.supabase.co", "  ").is_err());
    }
}
