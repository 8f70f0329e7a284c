use crate::calculator::Report;
use crate::config::NotifySettings;
use crate::error::NotifyError;
use crate::reporter::render_notification;
use std::time::Duration;
use tracing::{debug, info, warn};

const TIMEOUT: Duration = Duration::from_secs(30);

/// Posts a comment on an issue.
pub trait Notifier {
    fn post_comment(&self, issue: &str, body: &str) -> Result<(), NotifyError>;
}

/// GitHub REST issue comments.
pub struct GithubNotifier {
    agent: ureq::Agent,
    api_url: String,
    repository: String,
    token: String,
}

impl GithubNotifier {
    /// `None` unless both a token and a repository are configured.
    pub fn from_settings(settings: &NotifySettings) -> Option<Self> {
        let (Some(token), Some(repository)) = (&settings.token, &settings.repository) else {
            debug!("comment API not configured, notifications disabled");
            return None;
        };
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(TIMEOUT))
            .http_status_as_error(false)
            .build()
            .into();
        Some(Self {
            agent,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            repository: repository.clone(),
            token: token.clone(),
        })
    }

    fn comments_url(&self, issue: &str) -> String {
        format!("{}/repos/{}/issues/{issue}/comments", self.api_url, self.repository)
    }
}

impl Notifier for GithubNotifier {
    fn post_comment(&self, issue: &str, body: &str) -> Result<(), NotifyError> {
        let response = self
            .agent
            .post(&self.comments_url(issue))
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", &format!("Bearer {}", self.token))
            .header("User-Agent", concat!("power-monitor/", env!("CARGO_PKG_VERSION")))
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send_json(serde_json::json!({ "body": body }))
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum NotifyOutcome {
    Skipped(&'static str),
    Posted,
    Failed(NotifyError),
}

/// Whether the report crosses a configured alert threshold.
///
/// `None` when no threshold is configured at all.
pub fn alert_state(report: &Report, settings: &NotifySettings) -> Option<bool> {
    if settings.alert_balance.is_none() && settings.alert_days.is_none() {
        return None;
    }
    let low_balance = settings
        .alert_balance
        .as_ref()
        .is_some_and(|limit| report.current.balance < *limit);
    let short_runway = match (&settings.alert_days, &report.estimated_days) {
        (Some(limit), Some(days)) => days < limit,
        _ => false,
    };
    Some(low_balance || short_runway)
}

/// Post the short notification when an issue is configured and thresholds allow it.
/// Never fails the run.
pub fn notify(
    report: &Report,
    settings: &NotifySettings,
    notifier: Option<&dyn Notifier>,
) -> NotifyOutcome {
    let Some(issue) = settings.issue.as_deref() else {
        return NotifyOutcome::Skipped("no issue configured");
    };
    let Some(notifier) = notifier else {
        return NotifyOutcome::Skipped("no comment API credentials");
    };
    let alert = match alert_state(report, settings) {
        Some(false) => return NotifyOutcome::Skipped("balance above alert thresholds"),
        Some(true) => true,
        None => false,
    };

    let message = render_notification(report, alert);
    match notifier.post_comment(issue, &message) {
        Ok(()) => {
            info!(issue, "posted notification comment");
            NotifyOutcome::Posted
        }
        Err(e) => {
            warn!(issue, "notification failed: {e}");
            NotifyOutcome::Failed(e)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::calculator::calculate;
    use crate::reading::Reading;
    use bigdecimal::BigDecimal;
    use jiff::{SignedDuration, Timestamp};
    use std::cell::RefCell;
    use std::str::FromStr;

    /// Records every comment instead of posting it.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub comments: RefCell<Vec<(String, String)>>,
        pub fail: bool,
    }

    impl Notifier for RecordingNotifier {
        fn post_comment(&self, issue: &str, body: &str) -> Result<(), NotifyError> {
            self.comments
                .borrow_mut()
                .push((issue.to_string(), body.to_string()));
            if self.fail {
                return Err(NotifyError::Rejected { status: 403 });
            }
            Ok(())
        }
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn report(balance: &str) -> Report {
        let t0: Timestamp = "2026-10-18T00:00:00Z".parse().unwrap();
        let before = Reading::new(t0, dec("60.00"), None);
        let now = Reading::new(t0 + SignedDuration::from_hours(24), dec(balance), None);
        calculate(now, Some(before))
    }

    fn settings(issue: Option<&str>) -> NotifySettings {
        NotifySettings {
            issue: issue.map(str::to_string),
            ..NotifySettings::default()
        }
    }

    #[test]
    fn no_issue_never_calls_the_notifier() {
        let notifier = RecordingNotifier::default();
        let outcome = notify(&report("50.00"), &settings(None), Some(&notifier));
        assert!(matches!(outcome, NotifyOutcome::Skipped("no issue configured")));
        assert!(notifier.comments.borrow().is_empty());
    }

    #[test]
    fn missing_credentials_skip() {
        let outcome = notify(&report("50.00"), &settings(Some("7")), None);
        assert!(matches!(outcome, NotifyOutcome::Skipped("no comment API credentials")));
    }

    #[test]
    fn posts_every_run_without_thresholds() {
        let notifier = RecordingNotifier::default();
        let outcome = notify(&report("50.00"), &settings(Some("7")), Some(&notifier));
        assert!(matches!(outcome, NotifyOutcome::Posted));
        let comments = notifier.comments.borrow();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].0, "7");
        assert_eq!(comments[0].1, "electricity balance 50.00 CNY, about 5.0 days left");
    }

    #[test]
    fn thresholds_gate_the_comment() {
        let mut s = settings(Some("7"));
        s.alert_balance = Some(dec("20"));
        let notifier = RecordingNotifier::default();
        assert!(matches!(
            notify(&report("50.00"), &s, Some(&notifier)),
            NotifyOutcome::Skipped(_)
        ));
        assert!(notifier.comments.borrow().is_empty());

        assert!(matches!(notify(&report("15.00"), &s, Some(&notifier)), NotifyOutcome::Posted));
        assert!(notifier.comments.borrow()[0].1.starts_with("⚠️ Low balance: "));
    }

    #[test]
    fn overdrawn_balance_alerts() {
        let mut s = settings(Some("7"));
        s.alert_balance = Some(dec("10"));
        let overdrawn = report("-3.20");
        assert_eq!(alert_state(&overdrawn, &s), Some(true));

        let notifier = RecordingNotifier::default();
        assert!(matches!(notify(&overdrawn, &s, Some(&notifier)), NotifyOutcome::Posted));
        assert_eq!(
            notifier.comments.borrow()[0].1,
            "⚠️ Low balance: electricity balance -3.20 CNY, about 0.0 days left"
        );
    }

    #[test]
    fn short_runway_triggers_an_alert() {
        let mut s = settings(Some("7"));
        s.alert_days = Some(dec("7"));
        // 10.00 per day leaves 5 days.
        assert_eq!(alert_state(&report("50.00"), &s), Some(true));
        // 1.00 per day leaves 59 days.
        assert_eq!(alert_state(&report("59.00"), &s), Some(false));
        assert_eq!(alert_state(&report("59.00"), &settings(None)), None);
    }

    #[test]
    fn failures_are_reported_not_raised() {
        let notifier = RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        };
        let outcome = notify(&report("50.00"), &settings(Some("7")), Some(&notifier));
        assert!(matches!(outcome, NotifyOutcome::Failed(NotifyError::Rejected { status: 403 })));
    }

    #[test]
    fn github_notifier_needs_token_and_repository() {
        let mut s = settings(Some("7"));
        s.api_url = "https://api.github.com/".into();
        assert!(GithubNotifier::from_settings(&s).is_none());
        s.token = Some("t".into());
        s.repository = Some("me/dorm".into());
        let notifier = GithubNotifier::from_settings(&s).unwrap();
        assert_eq!(
            notifier.comments_url("7"),
            "https://api.github.com/repos/me/dorm/issues/7/comments"
        );
    }
}
