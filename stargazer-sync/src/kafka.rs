//! [`BrokerClient`] backed by the librdkafka admin API.
//!
//! Compiled only with the `kafka` feature. Metadata fetches are blocking calls
//! in librdkafka and run on the blocking pool.
//!
//! IAM credentials authenticate against Amazon MSK through OAUTHBEARER: each
//! token librdkafka asks for is a freshly signed `AWS_MSK_IAM` payload.

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_msk_iam_sasl_signer::generate_auth_token_from_credentials_provider;
use aws_types::region::Region;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::{ClientContext, OAuthToken};
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use tokio::runtime::Handle;
use tracing::{debug, info};

use stargazer_core::{BrokerAuth, BrokerConfig, TopicMetadata};

use crate::broker::{BrokerClient, TOPIC_PARTITIONS, TOPIC_REPLICATION};
use crate::SyncError;

const OPERATION_TIMEOUT: Duration = Duration::from_secs(10);
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
/// Lifetime announced for a static OAuth token; librdkafka asks again when it lapses.
const OAUTH_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
const IAM_SIGN_TIMEOUT: Duration = Duration::from_secs(10);
const IAM_PROVIDER_NAME: &str = "stargazer-config";

/// Where OAUTHBEARER tokens come from.
enum TokenSource {
    None,
    Static(String),
    Iam {
        credentials: SharedCredentialsProvider,
        region: Region,
        runtime: Handle,
    },
}

struct AuthContext {
    source: TokenSource,
}

impl ClientContext for AuthContext {
    const ENABLE_REFRESH_OAUTH_TOKEN: bool = true;

    fn generate_oauth_token(
        &self,
        _oauthbearer_config: Option<&str>,
    ) -> Result<OAuthToken, Box<dyn Error>> {
        match &self.source {
            TokenSource::None => Err("no OAuth token configured for this broker".into()),
            TokenSource::Static(token) => {
                let expires = SystemTime::now().duration_since(UNIX_EPOCH)? + OAUTH_TOKEN_LIFETIME;
                Ok(OAuthToken {
                    token: token.clone(),
                    principal_name: String::new(),
                    lifetime_ms: i64::try_from(expires.as_millis())?,
                })
            }
            TokenSource::Iam {
                credentials,
                region,
                runtime,
            } => {
                let (token, lifetime_ms) =
                    sign_iam_token(credentials.clone(), region.clone(), runtime.clone())?;
                Ok(OAuthToken {
                    token,
                    principal_name: String::new(),
                    lifetime_ms,
                })
            }
        }
    }
}

/// Sign an MSK IAM token on a dedicated thread. librdkafka calls back from its
/// own threads, which may sit inside the runtime where `block_on` is not allowed.
fn sign_iam_token(
    credentials: SharedCredentialsProvider,
    region: Region,
    runtime: Handle,
) -> Result<(String, i64), Box<dyn Error>> {
    let signer = std::thread::spawn(move || {
        runtime.block_on(async move {
            tokio::time::timeout(
                IAM_SIGN_TIMEOUT,
                generate_auth_token_from_credentials_provider(region, credentials),
            )
            .await
            .map_err(|_| "timed out signing MSK IAM token".to_string())?
            .map_err(|e| format!("failed to sign MSK IAM token: {e}"))
        })
    });
    let signed = signer
        .join()
        .map_err(|_| "MSK IAM signer thread panicked")??;
    Ok(signed)
}

/// AWS region of an MSK cluster, read from a bootstrap host such as
/// `b-1.demo.abc123.c2.kafka.eu-west-1.amazonaws.com:9098`.
fn msk_region(servers: &[String]) -> Option<String> {
    servers.iter().find_map(|server| {
        let host = server.split(':').next()?;
        let labels: Vec<&str> = host.split('.').collect();
        labels
            .windows(3)
            .find(|w| w[0].starts_with("kafka") && w[2] == "amazonaws")
            .map(|w| w[1].to_string())
    })
}

fn aws_region(servers: &[String]) -> Option<String> {
    msk_region(servers).or_else(|| {
        ["AWS_REGION", "AWS_DEFAULT_REGION"]
            .into_iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
    })
}

pub struct KafkaBroker {
    admin: Arc<AdminClient<AuthContext>>,
    servers: String,
}

impl KafkaBroker {
    /// Build an admin client for `config`. No network traffic happens here.
    ///
    /// IAM auth needs a tokio runtime to sign tokens on, so it must be called
    /// from within one.
    pub fn connect(config: &BrokerConfig) -> Result<Self, SyncError> {
        let servers = config.bootstrap_servers.join(",");
        let unreachable = |reason: String| SyncError::BrokerUnreachable {
            servers: servers.clone(),
            reason,
        };

        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &servers);

        let source = match &config.auth {
            BrokerAuth::None => TokenSource::None,
            BrokerAuth::Iam { key, secret } => {
                let region = aws_region(&config.bootstrap_servers).ok_or_else(|| {
                    unreachable("cannot determine the AWS region for IAM authentication".into())
                })?;
                let runtime = Handle::try_current()
                    .map_err(|e| unreachable(format!("IAM authentication needs a runtime: {e}")))?;
                client_config
                    .set("security.protocol", "SASL_SSL")
                    .set("sasl.mechanisms", "OAUTHBEARER");
                debug!(region = %region, "using MSK IAM authentication");
                TokenSource::Iam {
                    credentials: SharedCredentialsProvider::new(Credentials::new(
                        key.clone(),
                        secret.clone(),
                        None,
                        None,
                        IAM_PROVIDER_NAME,
                    )),
                    region: Region::new(region),
                    runtime,
                }
            }
            BrokerAuth::Plain { username, password } => {
                client_config
                    .set("security.protocol", "SASL_SSL")
                    .set("sasl.mechanisms", "PLAIN")
                    .set("sasl.username", username)
                    .set("sasl.password", password);
                TokenSource::None
            }
            BrokerAuth::OAuth { token } => {
                client_config
                    .set("security.protocol", "SASL_SSL")
                    .set("sasl.mechanisms", "OAUTHBEARER");
                TokenSource::Static(token.clone())
            }
        };

        let admin = client_config
            .create_with_context(AuthContext { source })
            .map_err(|e| unreachable(e.to_string()))?;

        info!(
            servers = %servers,
            auth = config.auth.mechanism(),
            "kafka admin client created"
        );
        Ok(Self {
            admin: Arc::new(admin),
            servers,
        })
    }

    fn options() -> AdminOptions {
        AdminOptions::new().operation_timeout(Some(OPERATION_TIMEOUT))
    }

    async fn fetch_metadata(&self) -> Result<Vec<TopicMetadata>, SyncError> {
        let admin = Arc::clone(&self.admin);
        tokio::task::spawn_blocking(move || -> Result<Vec<TopicMetadata>, KafkaError> {
            let metadata = admin.inner().fetch_metadata(None, METADATA_TIMEOUT)?;
            Ok(metadata
                .topics()
                .iter()
                .map(|t| {
                    TopicMetadata::new(t.name(), t.partitions().iter().map(|p| p.id()).collect())
                })
                .collect())
        })
        .await
        .map_err(|e| SyncError::BrokerUnavailable(format!("metadata task failed: {e}")))?
        .map_err(|e| unavailable(&self.servers, e))
    }
}

fn unavailable(servers: &str, err: KafkaError) -> SyncError {
    SyncError::BrokerUnavailable(format!("{servers}: {err}"))
}

/// Collect per-topic failures, ignoring the codes that mean "already done".
fn check_results(
    results: Vec<Result<String, (String, RDKafkaErrorCode)>>,
    benign: RDKafkaErrorCode,
) -> Result<(), SyncError> {
    let failed: Vec<String> = results
        .into_iter()
        .filter_map(|r| match r {
            Ok(_) => None,
            Err((_, code)) if code == benign => None,
            Err((name, code)) => Some(format!("{name} ({code})")),
        })
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(SyncError::BrokerUnavailable(format!(
            "topic operation failed for {}",
            failed.join(", ")
        )))
    }
}

#[async_trait]
impl BrokerClient for KafkaBroker {
    async fn list_topics(&self) -> Result<Vec<TopicMetadata>, SyncError> {
        self.fetch_metadata().await
    }

    async fn create_topics(&self, names: &[String]) -> Result<(), SyncError> {
        if names.is_empty() {
            return Ok(());
        }
        let topics: Vec<NewTopic<'_>> = names
            .iter()
            .map(|n| NewTopic::new(n, TOPIC_PARTITIONS, TopicReplication::Fixed(TOPIC_REPLICATION)))
            .collect();
        debug!(count = topics.len(), "creating topics");
        let results = self
            .admin
            .create_topics(&topics, &Self::options())
            .await
            .map_err(|e| unavailable(&self.servers, e))?;
        check_results(results, RDKafkaErrorCode::TopicAlreadyExists)
    }

    async fn delete_topics(&self, names: &[String]) -> Result<(), SyncError> {
        if names.is_empty() {
            return Ok(());
        }
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        debug!(count = refs.len(), "deleting topics");
        let results = self
            .admin
            .delete_topics(&refs, &Self::options())
            .await
            .map_err(|e| unavailable(&self.servers, e))?;
        check_results(results, RDKafkaErrorCode::UnknownTopicOrPartition)
    }

    async fn ping(&self) -> Result<(), SyncError> {
        self.fetch_metadata()
            .await
            .map(|_| ())
            .map_err(|e| SyncError::BrokerUnreachable {
                servers: self.servers.clone(),
                reason: e.to_string(),
            })
    }
}
