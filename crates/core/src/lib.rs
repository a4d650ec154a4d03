pub mod domain;
pub mod llm;
pub mod portfolio;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone, Default)]
    pub struct Settings {
        pub gemini_api_key: Option<String>,
        pub gemini_base_url: Option<String>,
        pub gemini_model: Option<String>,
        pub gemini_timeout_secs: Option<u64>,
        pub sentry_dsn: Option<String>,
        pub port: Option<u16>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                gemini_api_key: non_empty_var("GEMINI_API_KEY").or_else(|| non_empty_var("API_KEY")),
                gemini_base_url: non_empty_var("GEMINI_BASE_URL"),
                gemini_model: non_empty_var("GEMINI_MODEL"),
                gemini_timeout_secs: parsed_var("GEMINI_TIMEOUT_SECS")?,
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                port: parsed_var("PORT")?,
            })
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }

    fn parsed_var<T>(key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        non_empty_var(key)
            .map(|s| s.trim().parse::<T>())
            .transpose()
            .with_context(|| format!("{key} is not a valid value"))
    }
}
