//! Configuração do conversor carregada a partir de `substack-wxr.toml`.
//!
//! A struct [`ConverterConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `SUBSTACK_WXR_STATE_DIR` e `SUBSTACK_WXR_BATCH_SIZE`
//! têm precedência sobre o arquivo.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{ConvertError, Result};
use crate::mapping::Mapper;
use crate::poller::PollerConfig;
use crate::wxr::ChannelMeta;

pub const CONFIG_FILE: &str = "substack-wxr.toml";

/// Disciplina de retomada após perda do processo no meio de um job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeMode {
    /// Trunca a saída no último offset persistido e continua do cursor salvo.
    /// A saída final é idêntica byte a byte à de uma execução sem interrupção.
    #[default]
    Resume,
    /// Descarta a saída parcial e reexecuta o job desde o primeiro item.
    Restart,
}

/// Configuração de nível superior carregada de `substack-wxr.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConverterConfig {
    /// Itens de origem processados por chamada a `advance`.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub resume_mode: ResumeMode,

    /// Diretório onde o estado persistido de cada job é gravado.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Diretório dos documentos WXR. Sem ele, a saída fica em memória.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Deslocamento somado aos `wp:post_id` gerados.
    #[serde(default)]
    pub base_post_id: u64,

    /// URL da publicação no Substack, usada para montar `<link>`.
    #[serde(default)]
    pub source_url: Option<String>,

    /// Autor usado quando o item de origem não traz um.
    #[serde(default)]
    pub default_author: Option<String>,

    /// Metadados do canal WXR (`[site]`).
    #[serde(default)]
    pub site: ChannelMeta,

    /// Parâmetros do cliente de polling (`[poller]`).
    #[serde(default)]
    pub poller: PollerConfig,
}

// Valor padrão para o tamanho de lote: 25 itens.
fn default_batch_size() -> usize {
    25
}

// Valor padrão para o diretório de estado.
fn default_state_dir() -> PathBuf {
    PathBuf::from(".substack-wxr/jobs")
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            resume_mode: ResumeMode::default(),
            state_dir: default_state_dir(),
            output_dir: None,
            base_post_id: 0,
            source_url: None,
            default_author: None,
            site: ChannelMeta::default(),
            poller: PollerConfig::default(),
        }
    }
}

impl ConverterConfig {
    /// Carrega a configuração de `substack-wxr.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega a configuração de um caminho explícito (ou defaults, se ausente)
    /// e aplica as variáveis de ambiente.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<ConverterConfig>(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    // Variáveis de ambiente têm precedência sobre o arquivo de configuração.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup("SUBSTACK_WXR_STATE_DIR")
            && !dir.is_empty()
        {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("SUBSTACK_WXR_BATCH_SIZE")
            && !raw.is_empty()
        {
            self.batch_size = raw.parse().map_err(|_| {
                ConvertError::Config(format!("SUBSTACK_WXR_BATCH_SIZE is not a number: {raw}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ConvertError::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Monta o [`Mapper`] correspondente a esta configuração.
    pub fn mapper(&self) -> Mapper {
        Mapper {
            base_post_id: self.base_post_id,
            source_url: self.source_url.clone(),
            default_author: self.default_author.clone(),
        }
    }
}
