use anyhow::{bail, Result};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use playbooks_core::{Metric, MetricType, Playbook, PlaybookId, PlaybookUpdate};
use serde::Deserialize;
use std::path::Path;

use super::{read_document, CommandContext};

pub async fn cmd_show(ctx: &CommandContext, id: &str) -> Result<()> {
    let playbook = ctx
        .orchestrator
        .get_playbook(&ctx.actor, &PlaybookId::from(id))
        .await?;

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&playbook)?);
        return Ok(());
    }

    print_playbook(&playbook);
    Ok(())
}

pub async fn cmd_list(ctx: &CommandContext) -> Result<()> {
    let playbooks = ctx.orchestrator.list_playbooks(&ctx.actor).await?;

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&playbooks)?);
        return Ok(());
    }

    if playbooks.is_empty() {
        println!("{}", "No playbooks found.".yellow());
        return Ok(());
    }

    println!("{}", "Playbooks".cyan().bold());
    println!();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("ID").fg(Color::White),
            Cell::new("Title").fg(Color::White),
            Cell::new("Team").fg(Color::White),
            Cell::new("Metrics").fg(Color::White),
            Cell::new("Broadcast").fg(Color::White),
            Cell::new("Version").fg(Color::White),
        ]);

    for playbook in &playbooks {
        let broadcast = if playbook.broadcast_enabled {
            Cell::new(format!("on ({})", playbook.broadcast_channel_ids.len())).fg(Color::Green)
        } else {
            Cell::new("off").fg(Color::DarkGrey)
        };

        table.add_row(vec![
            Cell::new(playbook.id.as_str()).fg(Color::Cyan),
            Cell::new(&playbook.title),
            Cell::new(&playbook.team_id),
            Cell::new(playbook.metrics.len()),
            broadcast,
            Cell::new(playbook.version),
        ]);
    }

    println!("{table}");
    println!();
    println!(
        "  {} {}",
        "Total:".dimmed(),
        format!("{} playbooks", playbooks.len()).bold()
    );

    Ok(())
}

pub async fn cmd_update(ctx: &CommandContext, id: &str, file: &Path) -> Result<()> {
    let update: PlaybookUpdate = read_document(file)?;
    if update.is_empty() {
        bail!("{} does not mention any updatable field", file.display());
    }

    let outcome = ctx
        .orchestrator
        .update_playbook(&ctx.actor, &PlaybookId::from(id), &update)
        .await?;

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    if outcome.is_noop() {
        println!(
            "{} {}",
            "✓".green().bold(),
            "Nothing to change; playbook already matches.".green()
        );
        return Ok(());
    }

    println!(
        "{} {}",
        "✓".green().bold(),
        format!("Updated playbook {}", outcome.playbook_id).green()
    );
    for field in &outcome.changed_fields {
        println!("  {} {}", "→".blue(), field);
    }
    println!("  {} {}", "Version:".dimmed(), outcome.version);

    Ok(())
}

/// Input for `import`; everything except team and title is optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaybookDocument {
    #[serde(default)]
    id: Option<String>,
    #[serde(alias = "team_id")]
    team_id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "defaultOwnerID")]
    default_owner_id: Option<String>,
    #[serde(default)]
    default_owner_enabled: bool,
    #[serde(default)]
    broadcast_enabled: bool,
    #[serde(default, rename = "broadcastChannelIDs")]
    broadcast_channel_ids: Vec<String>,
    #[serde(default)]
    webhook_on_creation_enabled: bool,
    #[serde(default, rename = "webhookOnCreationURLs")]
    webhook_on_creation_urls: Vec<String>,
    #[serde(default)]
    metrics: Vec<Metric>,
}

impl PlaybookDocument {
    fn into_playbook(self) -> Result<Playbook> {
        if self.title.trim().is_empty() {
            bail!("Playbook title must not be empty");
        }

        let mut playbook = Playbook::new(self.team_id, self.title)
            .with_description(self.description)
            .with_broadcast_channels(self.broadcast_channel_ids)
            .with_webhooks(
                self.webhook_on_creation_enabled,
                self.webhook_on_creation_urls,
            );
        if let Some(id) = self.id {
            playbook = playbook.with_id(id);
        }
        if let Some(owner) = self.default_owner_id.filter(|o| !o.is_empty()) {
            playbook = playbook.with_default_owner(owner);
        }
        playbook.default_owner_enabled = self.default_owner_enabled;
        playbook.broadcast_enabled = self.broadcast_enabled;
        for metric in self.metrics {
            playbook.metrics.push(metric)?;
        }
        Ok(playbook)
    }
}

pub async fn cmd_import(ctx: &CommandContext, file: &Path) -> Result<()> {
    let document: PlaybookDocument = read_document(file)?;
    let playbook = ctx.backend.create(document.into_playbook()?).await?;

    if ctx.is_json() {
        println!("{}", serde_json::to_string_pretty(&playbook)?);
        return Ok(());
    }

    println!(
        "{} {}",
        "✓".green().bold(),
        format!("Created playbook {} ({})", playbook.title, playbook.id).green()
    );
    Ok(())
}

fn print_playbook(playbook: &Playbook) {
    println!("{}", playbook.title.cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<22} {}", "ID:".bold(), playbook.id);
    println!("  {:<22} {}", "Team:".bold(), playbook.team_id);
    if !playbook.description.is_empty() {
        println!("  {:<22} {}", "Description:".bold(), playbook.description);
    }
    println!(
        "  {:<22} {}{}",
        "Default owner:".bold(),
        playbook.default_owner_id.as_deref().unwrap_or("-"),
        enabled_suffix(playbook.default_owner_enabled)
    );
    println!(
        "  {:<22} {}{}",
        "Broadcast channels:".bold(),
        join_or_dash(&playbook.broadcast_channel_ids),
        enabled_suffix(playbook.broadcast_enabled)
    );
    println!(
        "  {:<22} {}{}",
        "Creation webhooks:".bold(),
        playbook.webhook_on_creation_urls.len(),
        enabled_suffix(playbook.webhook_on_creation_enabled)
    );
    println!("  {:<22} {}", "Version:".bold(), playbook.version);
    println!(
        "  {:<22} {}",
        "Updated:".bold(),
        playbook.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    if playbook.metrics.is_empty() {
        println!("  {}", "No metrics configured.".dimmed());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("#").fg(Color::White),
            Cell::new("ID").fg(Color::White),
            Cell::new("Title").fg(Color::White),
            Cell::new("Type").fg(Color::White),
            Cell::new("Target").fg(Color::White),
        ]);

    for (position, metric) in playbook.metrics.iter().enumerate() {
        table.add_row(vec![
            Cell::new(position + 1),
            Cell::new(metric.id.as_str()).fg(Color::Cyan),
            Cell::new(&metric.title),
            Cell::new(metric.metric_type.as_str()),
            Cell::new(format_target(metric)),
        ]);
    }

    println!("{table}");
}

fn enabled_suffix(enabled: bool) -> String {
    if enabled {
        format!(" {}", "(enabled)".green())
    } else {
        format!(" {}", "(disabled)".dimmed())
    }
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

pub fn format_target(metric: &Metric) -> String {
    let Some(target) = metric.target else {
        return "-".to_string();
    };

    match metric.metric_type {
        MetricType::Duration => {
            let total_secs = target / 1000;
            let (hours, rem) = (total_secs / 3600, total_secs % 3600);
            let (minutes, seconds) = (rem / 60, rem % 60);
            if hours > 0 {
                format!("{}h {:02}m {:02}s", hours, minutes, seconds)
            } else {
                format!("{}m {:02}s", minutes, seconds)
            }
        }
        MetricType::Currency => format!("{}.{:02}", target / 100, target % 100),
        MetricType::Integer => target.to_string(),
    }
}
