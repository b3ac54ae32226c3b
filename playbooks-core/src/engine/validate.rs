use reqwest::Url;

use super::diff::PlaybookDiff;
use crate::config::LimitsConfig;
use crate::error::{PlaybookError, PlaybookResult};
use crate::models::{
    Metric, MetricId, MetricType, MetricUpdate, NewMetric, Patch, Playbook, PlaybookField,
};

/// Bounds and shape checks that apply to every actor, admins included.
#[derive(Debug, Clone, Default)]
pub struct StructuralValidator {
    limits: LimitsConfig,
}

impl StructuralValidator {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Checks `candidate` (current state with `diff` applied) for the
    /// constraints whose inputs the diff touches.
    pub fn validate_update(&self, candidate: &Playbook, diff: &PlaybookDiff) -> PlaybookResult<()> {
        if diff.touches(PlaybookField::Title) {
            check_title(PlaybookField::Title.as_str(), &candidate.title)?;
        }

        if diff.touches(PlaybookField::WebhookOnCreationUrls)
            || diff.touches(PlaybookField::WebhookOnCreationEnabled)
        {
            self.check_webhooks(candidate)?;
        }

        if diff.touches(PlaybookField::BroadcastChannelIds) {
            self.check_broadcast_channels(candidate)?;
        }

        Ok(())
    }

    /// Validates a new metric for `playbook` and builds it under `id`.
    pub fn build_metric(
        &self,
        playbook: &Playbook,
        id: MetricId,
        input: &NewMetric,
    ) -> PlaybookResult<Metric> {
        let metric_type: MetricType = input.metric_type.parse()?;
        check_title("title", &input.title)?;
        check_target(input.target)?;

        if playbook.metrics.has_title(&input.title, None) {
            return Err(duplicate_title(&input.title));
        }

        let limit = self.limits.max_metrics_per_playbook;
        if playbook.metrics.len() >= limit {
            return Err(PlaybookError::LimitExceeded {
                field: "metrics".to_string(),
                limit,
                actual: playbook.metrics.len() + 1,
            });
        }

        Ok(Metric {
            id,
            title: input.title.trim().to_string(),
            description: input.description.clone(),
            metric_type,
            target: input.target,
        })
    }

    pub fn validate_metric_update(
        &self,
        playbook: &Playbook,
        id: &MetricId,
        update: &MetricUpdate,
    ) -> PlaybookResult<()> {
        match &update.title {
            Patch::Keep => {}
            Patch::Clear => return Err(PlaybookError::invalid_field("title", "must not be empty")),
            Patch::Set(title) => {
                check_title("title", title)?;
                if playbook.metrics.has_title(title, Some(id)) {
                    return Err(duplicate_title(title));
                }
            }
        }

        if let Patch::Set(target) = update.target {
            check_target(Some(target))?;
        }

        Ok(())
    }

    fn check_webhooks(&self, candidate: &Playbook) -> PlaybookResult<()> {
        let urls = &candidate.webhook_on_creation_urls;
        let limit = self.limits.max_webhook_urls;

        if candidate.webhook_on_creation_enabled && urls.len() > limit {
            return Err(PlaybookError::LimitExceeded {
                field: PlaybookField::WebhookOnCreationUrls.as_str().to_string(),
                limit,
                actual: urls.len(),
            });
        }

        for url in urls {
            check_webhook_url(url)?;
        }
        Ok(())
    }

    fn check_broadcast_channels(&self, candidate: &Playbook) -> PlaybookResult<()> {
        let channels = &candidate.broadcast_channel_ids;
        let limit = self.limits.max_broadcast_channels;
        let field = PlaybookField::BroadcastChannelIds.as_str();

        if channels.len() > limit {
            return Err(PlaybookError::LimitExceeded {
                field: field.to_string(),
                limit,
                actual: channels.len(),
            });
        }

        if channels.iter().any(|c| c.trim().is_empty()) {
            return Err(PlaybookError::invalid_field(field, "channel ids must not be empty"));
        }

        if let Some(bad) = channels.iter().find(|c| !is_plain_id(c)) {
            return Err(PlaybookError::invalid_field(
                field,
                format!("'{}' is not a valid channel id", bad),
            ));
        }
        Ok(())
    }
}

/// Ids travel as single URL path segments to the membership directory.
pub(crate) fn is_plain_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.chars().any(|c| matches!(c, '/' | '\\' | '?' | '#' | '%') || c.is_control())
}

fn check_title(field: &str, title: &str) -> PlaybookResult<()> {
    if title.trim().is_empty() {
        return Err(PlaybookError::invalid_field(field, "must not be empty"));
    }
    Ok(())
}

fn check_target(target: Option<i64>) -> PlaybookResult<()> {
    match target {
        Some(t) if t < 0 => Err(PlaybookError::invalid_field(
            "target",
            format!("must not be negative, got {}", t),
        )),
        _ => Ok(()),
    }
}

fn check_webhook_url(raw: &str) -> PlaybookResult<()> {
    let field = PlaybookField::WebhookOnCreationUrls.as_str();
    let url = Url::parse(raw.trim())
        .map_err(|e| PlaybookError::invalid_field(field, format!("'{}' is not a URL: {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(PlaybookError::invalid_field(
            field,
            format!("'{}' must be an absolute http(s) URL", raw),
        ));
    }
    Ok(())
}

fn duplicate_title(title: &str) -> PlaybookError {
    PlaybookError::invalid_field(
        "title",
        format!("a metric titled '{}' already exists in this playbook", title.trim()),
    )
}
