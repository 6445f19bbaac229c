use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::api::{ProviderKind, ProviderSettings};
use crate::types::Mode;
use crate::util::{env_first, is_local_endpoint_url};

const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_EDITOR: &str = "nano";
const OS_RELEASE_PATH: &str = "/etc/os-release";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ai: AiConfig,
    pub user: UserConfig,
    pub system: SystemContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiConfig {
    /// Raw provider identifier; resolved by the provider factory.
    pub provider: String,
    pub api_key: String,
    pub proxy: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl AiConfig {
    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            api_key: self.api_key.clone(),
            proxy: self.proxy.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserConfig {
    pub default_mode: Mode,
    pub preferences: String,
}

/// Facts about the host folded into every system prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemContext {
    pub operating_system: Option<String>,
    pub distribution: Option<String>,
    pub home_directory: Option<String>,
    pub shell: Option<String>,
    pub editor: Option<String>,
}

impl SystemContext {
    pub fn detect() -> Self {
        let operating_system = match std::env::consts::OS {
            "" => None,
            os => Some(os.to_string()),
        };
        let shell = env_first(&["SHELL"]).map(|shell| {
            Path::new(&shell)
                .file_name()
                .map_or(shell.clone(), |name| name.to_string_lossy().into_owned())
        });

        Self {
            operating_system,
            distribution: read_distribution(Path::new(OS_RELEASE_PATH)),
            home_directory: env_first(&["HOME", "USERPROFILE"]),
            shell,
            editor: env_first(&["EDITOR"]).or_else(|| Some(DEFAULT_EDITOR.to_string())),
        }
    }
}

/// `PRETTY_NAME` from an os-release file, unquoted.
pub fn read_distribution(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    content.lines().find_map(|line| {
        let value = line.strip_prefix("PRETTY_NAME=")?;
        let value = value.trim().trim_matches('"').trim_matches('\'').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

impl Config {
    pub fn load() -> Result<Self> {
        let provider = env_first(&["YAI_PROVIDER"]).unwrap_or_else(|| "openai".to_string());
        let api_key = env_first(&["YAI_API_KEY", "OPENAI_KEY"]).unwrap_or_default();
        let proxy = env_first(&["YAI_PROXY", "OPENAI_PROXY"]);
        let base_url = env_first(&["YAI_BASE_URL"]);
        let model = env_first(&["YAI_MODEL", "OPENAI_MODEL"]).unwrap_or_else(|| {
            provider
                .parse::<ProviderKind>()
                .map(|kind| kind.default_model().to_string())
                .unwrap_or_default()
        });

        let temperature = match env_first(&["YAI_TEMPERATURE", "OPENAI_TEMPERATURE"]) {
            Some(raw) => raw
                .parse::<f32>()
                .with_context(|| format!("invalid temperature '{raw}'"))?,
            None => DEFAULT_TEMPERATURE,
        };
        let max_tokens = match env_first(&["YAI_MAX_TOKENS", "OPENAI_MAX_TOKENS"]) {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("invalid max tokens '{raw}'"))?,
            None => DEFAULT_MAX_TOKENS,
        };

        let default_mode = match env_first(&["YAI_DEFAULT_MODE"]) {
            Some(raw) => match Mode::parse(&raw) {
                Some(mode) => mode,
                None => bail!("invalid YAI_DEFAULT_MODE '{raw}': expected exec or chat"),
            },
            None => Mode::Exec,
        };

        Ok(Self {
            ai: AiConfig {
                provider,
                api_key,
                proxy,
                base_url,
                model,
                temperature,
                max_tokens,
            },
            user: UserConfig {
                default_mode,
                preferences: env_first(&["YAI_PREFERENCES"]).unwrap_or_default(),
            },
            system: SystemContext::detect(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        let kind: ProviderKind = self.ai.provider.parse()?;

        let local_endpoint = self
            .ai
            .base_url
            .as_deref()
            .is_some_and(is_local_endpoint_url);
        if self.ai.api_key.trim().is_empty() && !local_endpoint {
            bail!("YAI_API_KEY must be set for the {kind} provider");
        }

        if self.ai.model.trim().is_empty() {
            bail!("no model configured for the {kind} provider");
        }

        if !(0.0..=2.0).contains(&self.ai.temperature) {
            bail!(
                "temperature {} is out of range: expected a value between 0 and 2",
                self.ai.temperature
            );
        }

        if self.ai.max_tokens == 0 {
            bail!("max tokens must be greater than zero");
        }

        if let Some(proxy) = &self.ai.proxy {
            let lower = proxy.to_ascii_lowercase();
            if !["http://", "https://", "socks5://", "socks5h://"]
                .iter()
                .any(|scheme| lower.starts_with(scheme))
            {
                bail!("invalid proxy '{proxy}': expected an http(s) or socks5 URL");
            }
        }

        if let Some(base_url) = &self.ai.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                bail!("invalid YAI_BASE_URL '{base_url}': expected http:// or https:// URL");
            }
        }

        Ok(())
    }
}
