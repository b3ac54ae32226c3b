use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use playbooks_core::{MetricId, MetricUpdate, NewMetric, Patch, PlaybookId};
use serde_json::json;

use super::CommandContext;

#[derive(Subcommand)]
pub enum MetricsCommand {
    #[command(about = "Append a metric to a playbook")]
    Add {
        #[arg(help = "Playbook id")]
        playbook_id: String,

        #[arg(long, help = "Metric title, unique within the playbook")]
        title: String,

        #[arg(
            short = 't',
            long = "type",
            default_value = "integer",
            help = "Metric type (duration, currency, integer)"
        )]
        metric_type: String,

        #[arg(short, long, default_value = "", help = "Metric description")]
        description: String,

        #[arg(
            long,
            help = "Target value (milliseconds for durations, minor units for currency)"
        )]
        target: Option<i64>,

        #[arg(long, help = "Client-chosen metric id; repeating an add with it is a no-op")]
        id: Option<String>,
    },

    #[command(about = "Update a metric's title, description or target")]
    Update {
        #[arg(help = "Metric id")]
        metric_id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(long, conflicts_with = "clear_target")]
        target: Option<i64>,

        #[arg(long, help = "Remove the metric's target")]
        clear_target: bool,
    },

    #[command(about = "Delete a metric")]
    Delete {
        #[arg(help = "Metric id")]
        metric_id: String,
    },
}

pub async fn handle_metrics_command(ctx: &CommandContext, cmd: MetricsCommand) -> Result<()> {
    match cmd {
        MetricsCommand::Add {
            playbook_id,
            title,
            metric_type,
            description,
            target,
            id,
        } => {
            let mut input = NewMetric::new(title, metric_type).with_description(description);
            input.target = target;
            input.id = id.map(MetricId::from);
            cmd_metrics_add(ctx, &playbook_id, &input).await
        }
        MetricsCommand::Update {
            metric_id,
            title,
            description,
            target,
            clear_target,
        } => {
            let update = metric_update(title, description, target, clear_target);
            cmd_metrics_update(ctx, &metric_id, &update).await
        }
        MetricsCommand::Delete { metric_id } => cmd_metrics_delete(ctx, &metric_id).await,
    }
}

fn metric_update(
    title: Option<String>,
    description: Option<String>,
    target: Option<i64>,
    clear_target: bool,
) -> MetricUpdate {
    MetricUpdate {
        title: title.into(),
        description: description.into(),
        target: if clear_target {
            Patch::Clear
        } else {
            target.into()
        },
    }
}

async fn cmd_metrics_add(ctx: &CommandContext, playbook_id: &str, input: &NewMetric) -> Result<()> {
    let metric_id = ctx
        .orchestrator
        .add_metric(&ctx.actor, &PlaybookId::from(playbook_id), input)
        .await?;

    if ctx.is_json() {
        let body = json!({ "playbookId": playbook_id, "metricId": metric_id });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!(
        "{} {}",
        "✓".green().bold(),
        format!("Added metric '{}' to {}", input.title, playbook_id).green()
    );
    println!("  {} {}", "Metric ID:".dimmed(), metric_id.as_str().cyan());
    Ok(())
}

async fn cmd_metrics_update(ctx: &CommandContext, metric_id: &str, update: &MetricUpdate) -> Result<()> {
    if update.is_empty() {
        bail!("Nothing to update. Pass --title, --description, --target or --clear-target");
    }

    ctx.orchestrator
        .update_metric(&ctx.actor, &MetricId::from(metric_id), update)
        .await?;

    if ctx.is_json() {
        let body = json!({ "metricId": metric_id, "updated": true });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!(
        "{} {}",
        "✓".green().bold(),
        format!("Updated metric {}", metric_id).green()
    );
    Ok(())
}

async fn cmd_metrics_delete(ctx: &CommandContext, metric_id: &str) -> Result<()> {
    ctx.orchestrator
        .delete_metric(&ctx.actor, &MetricId::from(metric_id))
        .await?;

    if ctx.is_json() {
        let body = json!({ "metricId": metric_id, "deleted": true });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!(
        "{} {}",
        "✓".green().bold(),
        format!("Deleted metric {}", metric_id).green()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_update_flags() {
        let update = metric_update(Some("Renamed".to_string()), None, Some(10), false);
        assert_eq!(update.title, Patch::Set("Renamed".to_string()));
        assert!(update.description.is_keep());
        assert_eq!(update.target, Patch::Set(10));

        let cleared = metric_update(None, None, None, true);
        assert_eq!(cleared.target, Patch::Clear);
        assert!(metric_update(None, None, None, false).is_empty());
    }

    #[tokio::test]
    async fn test_add_and_delete_in_demo() {
        let ctx = CommandContext::build(None, "carol", &["manage".to_string()], "json", true)
            .await
            .unwrap();

        let input = NewMetric::new("Escalations", "integer").with_id("escalations");
        cmd_metrics_add(&ctx, "demo", &input).await.unwrap();
        // Repeating the same client id is accepted without a duplicate.
        cmd_metrics_add(&ctx, "demo", &input).await.unwrap();

        let playbook = ctx
            .orchestrator
            .get_playbook(&ctx.actor, &PlaybookId::from("demo"))
            .await
            .unwrap();
        assert_eq!(playbook.metrics.len(), 3);

        cmd_metrics_delete(&ctx, "escalations").await.unwrap();
        assert!(cmd_metrics_delete(&ctx, "escalations").await.is_err());
    }
}
