//! Command-line and environment configuration of the exporters.

use clap::{Args, Parser};
use reqwest::Url;

use std::{net::SocketAddr, time::Duration};

use cimetrics::ApplyMode;
use cimetrics_exporter::{GroupingKey, GroupingKeyError, PushGateway};

use crate::{
    fetch::{Credentials, Fetcher},
    source::{CommitSource, QualitySource},
};

/// Options shared by all exporters.
#[derive(Debug, Clone, Args)]
pub struct PollArgs {
    /// Seconds between the end of a poll cycle and the start of the next one.
    #[arg(long, env = "POLL_INTERVAL", default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,
    /// Timeout in seconds for a single upstream request or push.
    #[arg(long, env = "HTTP_TIMEOUT", default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub http_timeout: u64,
}

impl PollArgs {
    /// Returns the poll interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Returns the HTTP timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }
}

/// Exports commit counts from a CI server to a push gateway.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct CommitExporterArgs {
    /// Base URL of the CI server.
    #[arg(long, env = "JENKINS_URL", default_value = "http://jenkins:8080")]
    pub jenkins_url: Url,
    /// CI server username.
    #[arg(long, env = "JENKINS_USER", default_value = "admin")]
    pub jenkins_user: String,
    /// CI server password or API token.
    #[arg(long, env = "JENKINS_PASSWORD", default_value = "admin", hide_env_values = true, hide_default_value = true)]
    pub jenkins_password: String,
    /// Number of most recent builds inspected per job.
    #[arg(long, env = "JENKINS_BUILD_LIMIT", default_value_t = CommitSource::DEFAULT_BUILD_LIMIT, value_parser = clap::value_parser!(u32).range(1..))]
    pub build_limit: u32,
    /// Base URL of the push gateway.
    #[arg(long, env = "PUSHGATEWAY_URL", default_value = "http://pushgateway:9091")]
    pub pushgateway_url: Url,
    /// `job` grouping label for pushed metrics.
    #[arg(long, env = "PUSH_JOB", default_value = "jenkins_commit_exporter")]
    pub push_job: String,
    /// Optional `instance` grouping label for pushed metrics.
    #[arg(long, env = "PUSH_INSTANCE")]
    pub push_instance: Option<String>,
    /// On a failed poll cycle, set `exporter_up` at the gateway to 0 and keep the pushed commit counts.
    #[arg(long, env = "PUSH_DOWN_STATUS")]
    pub push_down_status: bool,
    #[command(flatten)]
    pub poll: PollArgs,
}

impl CommitExporterArgs {
    /// Creates the commit source.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn source(&self) -> Result<CommitSource, reqwest::Error> {
        let credentials = Credentials::Basic {
            username: self.jenkins_user.clone(),
            password: Some(self.jenkins_password.clone()),
        };
        let fetcher = Fetcher::new(self.jenkins_url.clone(), Some(credentials), self.poll.timeout())?;
        Ok(CommitSource::new(fetcher, self.build_limit))
    }

    /// Returns the grouping key for pushed metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if the job or instance label is invalid.
    pub fn grouping_key(&self) -> Result<GroupingKey, GroupingKeyError> {
        let key = GroupingKey::new(self.push_job.as_str())?;
        match &self.push_instance {
            Some(instance) => key.with_instance(instance.as_str()),
            None => Ok(key),
        }
    }

    /// Creates the push gateway client.
    ///
    /// # Errors
    ///
    /// Returns an error if the grouping key or the resulting push endpoint is invalid.
    pub fn gateway(&self) -> Result<PushGateway, GroupingKeyError> {
        let gateway = PushGateway::new(self.pushgateway_url.as_str(), &self.grouping_key()?)?;
        Ok(gateway.with_timeout(self.poll.timeout()))
    }
}

/// Serves per-project code quality metrics for scraping.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct QualityExporterArgs {
    /// Base URL of the code quality server.
    #[arg(long, env = "SONARQUBE_URL", default_value = "http://sonarqube:9000")]
    pub sonarqube_url: Url,
    /// API token. If not set, the exporter serves `exporter_up 0` without polling.
    #[arg(long, env = "SONARQUBE_TOKEN", hide_env_values = true)]
    pub sonarqube_token: Option<String>,
    /// Send the token as a bearer token instead of a basic-auth username.
    #[arg(long, env = "SONARQUBE_BEARER_AUTH")]
    pub bearer_auth: bool,
    /// Comma-separated metric keys to request for each project.
    #[arg(
        long,
        env = "SONARQUBE_METRIC_KEYS",
        value_delimiter = ',',
        default_values = QualitySource::DEFAULT_METRIC_KEYS
    )]
    pub metric_keys: Vec<String>,
    /// Port to serve metrics on.
    #[arg(long, env = "METRICS_PORT", default_value_t = 9101)]
    pub metrics_port: u16,
    /// Remove values of projects and measures that disappear upstream.
    #[arg(long, env = "EXPIRE_STALE")]
    pub expire_stale: bool,
    #[command(flatten)]
    pub poll: PollArgs,
}

impl QualityExporterArgs {
    /// Returns the address to serve metrics on.
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.metrics_port))
    }

    /// Returns how snapshots are applied to the served registry.
    pub fn apply_mode(&self) -> ApplyMode {
        if self.expire_stale {
            ApplyMode::Replace
        } else {
            ApplyMode::Merge
        }
    }

    /// Creates the upstream fetcher, or `None` if the token is not set.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn fetcher(&self) -> Result<Option<Fetcher>, reqwest::Error> {
        let Some(token) = self.sonarqube_token.as_deref().filter(|token| !token.is_empty()) else {
            return Ok(None);
        };
        let credentials = if self.bearer_auth {
            Credentials::Bearer(token.to_owned())
        } else {
            Credentials::Basic {
                username: token.to_owned(),
                password: None,
            }
        };
        let fetcher = Fetcher::new(self.sonarqube_url.clone(), Some(credentials), self.poll.timeout())?;
        Ok(Some(fetcher))
    }
}
