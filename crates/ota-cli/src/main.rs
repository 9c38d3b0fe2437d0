use atty::Stream;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use ota_core::StoreSettings;
use serde_json::json;

mod cli;
mod dispatch;
mod style;

use cli::OtaCli;
use dispatch::{dispatch_command, Outcome, Table};
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = OtaCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let settings = settings_from(&cli)?;
    let outcome = dispatch_command(&settings, &cli.command)?;
    emit_output(&cli, &outcome)
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("ota_core={level},ota_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn settings_from(cli: &OtaCli) -> Result<StoreSettings> {
    let mut settings = StoreSettings::from_env().map_err(|err| eyre!("{err:#}"))?;
    if let Some(dir) = &cli.dir {
        settings.directory.clone_from(dir);
    }
    if let Some(url) = &cli.update_url {
        settings.updates.update_url = Some(url.clone());
    }
    if let Some(scope) = &cli.scope {
        settings.updates.scope_key.clone_from(scope);
    }
    if cli.embedded_update.is_some() {
        settings.embedded_update_id = cli.embedded_update;
    }
    Ok(settings)
}

fn emit_output(cli: &OtaCli, outcome: &Outcome) -> Result<()> {
    if cli.json {
        let payload = json!({
            "status": outcome.status,
            "command": cli.command.name(),
            "message": outcome.message,
            "details": outcome.details,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if !cli.quiet {
        let style = Style::new(cli.no_color, atty::is(Stream::Stdout));
        println!("{}", style.status(outcome.status, &outcome.message));
        if let Some(table) = &outcome.table {
            println!("{}", render_table(&style, table));
        }
    }
    Ok(())
}

fn render_table(style: &Style, table: &Table) -> String {
    let mut widths: Vec<usize> = table.header.iter().map(|title| title.len()).collect();
    for row in &table.rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let pad = |cells: Vec<String>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let mut lines = vec![style.table_header(&pad(
        table.header.iter().map(|title| (*title).to_string()).collect(),
    ))];
    for row in &table.rows {
        lines.push(style.info(&pad(row.clone())));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_align_on_the_widest_cell() {
        let table = Table {
            header: vec!["KEY", "PATH"],
            rows: vec![
                vec!["bundle".to_string(), "app.bundle".to_string()],
                vec!["a".to_string(), "b".to_string()],
            ],
        };
        let rendered = render_table(&Style::new(true, false), &table);
        assert_eq!(
            rendered,
            "KEY     PATH\nbundle  app.bundle\na       b"
        );
    }

    #[test]
    fn flags_override_environment_settings() -> Result<()> {
        let cli = OtaCli::parse_from([
            "ota-store",
            "--dir",
            "/tmp/ota-flags",
            "--scope",
            "flag-scope",
            "status",
        ]);
        let settings = settings_from(&cli)?;
        assert_eq!(settings.directory, std::path::PathBuf::from("/tmp/ota-flags"));
        assert_eq!(settings.updates.scope_key, "flag-scope");
        Ok(())
    }
}
