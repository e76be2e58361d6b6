//! Interface de linha de comando do conversor baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (convert, resume,
//! status, poll) e flags globais (--batch-size, --config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use substack_wxr::config::ResumeMode;

/// Converte exports do Substack em documentos WXR importáveis pelo WordPress.
#[derive(Debug, Parser)]
#[command(name = "substack-wxr", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Itens de origem processados por lote.
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Caminho para o arquivo de configuração (padrão: ./substack-wxr.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Disciplina de retomada aceita pela CLI, mapeada para [`ResumeMode`].
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ResumeArg {
    /// Continua do último lote persistido.
    Resume,
    /// Recomeça do primeiro item.
    Restart,
}

impl From<ResumeArg> for ResumeMode {
    fn from(arg: ResumeArg) -> Self {
        match arg {
            ResumeArg::Resume => ResumeMode::Resume,
            ResumeArg::Restart => ResumeMode::Restart,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Converte um export JSON-lines do Substack.
    Convert {
        /// Arquivo com um post por linha.
        input: PathBuf,

        /// Documento WXR de saída (padrão: output_dir/<job>.xml ou <input>.xml).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Retoma um job interrompido.
    Resume {
        /// Identificador do job.
        job_id: String,

        /// O mesmo export usado para criar o job.
        input: PathBuf,

        /// Sobrescreve `resume_mode` da configuração.
        #[arg(long)]
        mode: Option<ResumeArg>,
    },

    /// Mostra o relatório de um job, ou lista todos os jobs.
    Status {
        /// Identificador do job.
        job_id: Option<String>,
    },

    /// Acompanha o progresso de um endpoint remoto.
    Poll {
        /// URL do endpoint (ex.: https://blog/wp-admin/admin-ajax.php).
        url: String,

        /// Job a consultar; sem ele o endpoint usa o job ativo.
        #[arg(long)]
        job_id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_convert_subcommand() {
        let cli = Cli::parse_from(["substack-wxr", "convert", "posts.jsonl", "-o", "blog.xml"]);
        match cli.command {
            Command::Convert { input, output } => {
                assert_eq!(input, PathBuf::from("posts.jsonl"));
                assert_eq!(output, Some(PathBuf::from("blog.xml")));
            }
            _ => panic!("expected Convert command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "substack-wxr",
            "--batch-size",
            "50",
            "--config",
            "custom.toml",
            "--verbose",
            "status",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.batch_size, Some(50));
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(cli.command, Command::Status { job_id: None }));
    }

    #[test]
    fn cli_parses_resume_mode() {
        let cli = Cli::parse_from(["substack-wxr", "resume", "abc", "posts.jsonl", "--mode", "restart"]);
        match cli.command {
            Command::Resume { job_id, mode, .. } => {
                assert_eq!(job_id, "abc");
                assert_eq!(mode.map(ResumeMode::from), Some(ResumeMode::Restart));
            }
            _ => panic!("expected Resume command"),
        }
    }

    #[test]
    fn cli_parses_poll_subcommand() {
        let cli = Cli::parse_from([
            "substack-wxr",
            "poll",
            "https://blog.example.com/wp-admin/admin-ajax.php",
            "--job-id",
            "j1",
        ]);
        match cli.command {
            Command::Poll { url, job_id } => {
                assert!(url.ends_with("admin-ajax.php"));
                assert_eq!(job_id.as_deref(), Some("j1"));
            }
            _ => panic!("expected Poll command"),
        }
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
