//! Interface de terminal do conversor — barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! estilização com cores. O [`ConversionProgress`] acompanha visualmente
//! a conversão de um export no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use substack_wxr::state_machine::{
    ConversionReport, Job, JobStatus, Progress, ProgressStatus,
};

/// Indicador visual de progresso para um job de conversão.
///
/// Exibe uma barra com itens processados e falhas durante o processamento e
/// mensagens coloridas para sucesso (verde) e falha (vermelho).
pub struct ConversionProgress {
    // Barra de progresso do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl ConversionProgress {
    /// Inicia a barra com o rótulo do job.
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(label.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a barra com um snapshot de progresso.
    pub fn update(&self, progress: &Progress) {
        self.pb.set_length(progress.total);
        self.pb.set_position(progress.processed);
        if progress.failures > 0 {
            self.pb.set_message(format!(
                "{}",
                self.yellow
                    .apply_to(format!("{} skipped", progress.failures))
            ));
        }
    }

    /// Finaliza a barra e exibe o resultado final.
    ///
    /// Sucesso é mostrado em verde com checkmark; falha em vermelho com X.
    pub fn complete(&self, progress: &Progress) {
        self.pb.finish_and_clear();
        match progress.status {
            ProgressStatus::Done => println!(
                "  {} Converted {}/{} items ({} skipped)",
                self.green.apply_to("✓"),
                progress.processed - progress.failures.min(progress.processed),
                progress.total,
                progress.failures
            ),
            ProgressStatus::Failed => println!(
                "  {} Conversion failed after {}/{} items",
                self.red.apply_to("✗"),
                progress.processed,
                progress.total
            ),
            ProgressStatus::Processing => println!(
                "  {} Still processing: {}/{} items",
                self.yellow.apply_to("…"),
                progress.processed,
                progress.total
            ),
        }
    }

    /// Imprime o relatório de conversão formatado em JSON com estilo colorido.
    pub fn print_report(&self, report: &ConversionReport) {
        print_report(report);
    }
}

fn status_style(status: JobStatus) -> Style {
    match status {
        JobStatus::Done => Style::new().green().bold(),
        JobStatus::Failed | JobStatus::Cancelled => Style::new().red().bold(),
        _ => Style::new().yellow(),
    }
}

/// Imprime um relatório sem barra de progresso ativa (subcomando `status`).
pub fn print_report(report: &ConversionReport) {
    println!();
    println!(
        "{}",
        status_style(report.status).apply_to("─── Conversion Report ───")
    );
    println!(
        "{}",
        serde_json::to_string_pretty(report).unwrap_or_default()
    );
}

/// Lista os jobs persistidos, um por linha.
pub fn print_jobs(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("No jobs recorded.");
        return;
    }
    for job in jobs {
        let progress = job.progress();
        println!(
            "{}  {:<10}  {:>6}/{:<6}  {}",
            job.id,
            status_style(job.status).apply_to(job.status.to_string()),
            progress.processed,
            progress.total,
            job.label
        );
    }
}
