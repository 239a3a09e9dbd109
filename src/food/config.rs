use std::env;

pub const DEFAULT_RECOGNITION_URL: &str = "https://dietagram.p.rapidapi.com/apiFoodImageRecognition.php";
pub const DEFAULT_RECOGNITION_HOST: &str = "dietagram.p.rapidapi.com";

/// Client-only override. The server's brokered key in `RECOGNITION_API_KEY`
/// is never read by the client.
pub const DEV_RECOGNITION_KEY_VAR: &str = "NUTRIBOX_DEV_RECOGNITION_KEY";

#[derive(Debug, Clone)]
pub struct FoodConfig {
    pub recognition_url: String,
    pub recognition_host: String,
    pub language: String,
    /// Only for local development; normally the key is issued by the
    /// subscription service.
    pub static_api_key: Option<String>,
    pub free_daily_limit: u32,
}

impl Default for FoodConfig {
    fn default() -> Self {
        Self {
            recognition_url: DEFAULT_RECOGNITION_URL.to_string(),
            recognition_host: DEFAULT_RECOGNITION_HOST.to_string(),
            language: "en".to_string(),
            static_api_key: None,
            free_daily_limit: crate::food::quota::FREE_DAILY_LIMIT,
        }
    }
}

impl FoodConfig {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let free_daily_limit = match env::var("NUTRIBOX_FREE_DAILY_LIMIT") {
            Ok(value) => value
                .trim()
                .parse()
                .map_err(|_| format!("NUTRIBOX_FREE_DAILY_LIMIT must be a number, got '{}'", value))?,
            Err(_) => defaults.free_daily_limit,
        };

        Ok(Self {
            recognition_url: env::var("RECOGNITION_API_URL").unwrap_or(defaults.recognition_url),
            recognition_host: env::var("RECOGNITION_API_HOST").unwrap_or(defaults.recognition_host),
            language: env::var("RECOGNITION_LANG").unwrap_or(defaults.language),
            static_api_key: env::var(DEV_RECOGNITION_KEY_VAR).ok().filter(|k| !k.trim().is_empty()),
            free_daily_limit,
        })
    }
}
