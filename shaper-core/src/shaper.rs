//! The shaping planner: converges the kernel queueing state on the target
//! interfaces to a declarative [`ShapingConfig`].

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{
    command::{self, Executor},
    config::{ShapingConfig, ValidationError},
    plan::QueueingPlan,
};

/// Switch for IPv4 forwarding between the shaped interfaces.
const IP_FORWARD_PATH: &str = "/proc/sys/net/ipv4/ip_forward";

#[derive(Debug, thiserror::Error)]
pub enum ShapingError {
    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationError),
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("insufficient privileges to change queueing disciplines")]
    PermissionDenied,
    #[error("kernel rejected `{command}`: {diagnostic}")]
    ApplyRejected { command: String, diagnostic: String },
    #[error("another apply is already in progress")]
    Busy,
}

pub type Result<T> = std::result::Result<T, ShapingError>;

/// Applies and tears down queueing hierarchies through an [`Executor`].
///
/// Applies are serialized: interleaved `tc` operations against the same
/// device would leave an undefined intermediate hierarchy, so a second apply
/// arriving while one is in flight is rejected with [`ShapingError::Busy`].
pub struct ShapingPlanner {
    executor: Arc<dyn Executor>,
    apply_lock: Mutex<()>,
}

impl ShapingPlanner {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor, apply_lock: Mutex::new(()) }
    }

    /// Converges kernel state to `config`.
    ///
    /// Idempotent: any hierarchy previously installed on the target devices
    /// is unconditionally removed before the new plan goes in, so repeated
    /// applies of the same configuration rebuild the same objects and never
    /// accumulate duplicates. With `enabled = false` this degenerates to a
    /// teardown, which is a no-op when nothing is installed.
    ///
    /// If any install step fails, the teardown is re-run and the error
    /// reported: the interfaces end up unshaped, never half-configured.
    pub async fn apply(&self, config: &ShapingConfig, present: &[String]) -> Result<()> {
        config.validate()?;

        if config.enabled {
            for device in config.devices() {
                if !present.iter().any(|name| name == device) {
                    return Err(ShapingError::InterfaceNotFound(device.to_string()));
                }
            }
        }

        let Ok(_guard) = self.apply_lock.try_lock() else {
            return Err(ShapingError::Busy);
        };

        let plan = QueueingPlan::build(config);
        // Disabling without named interfaces clears every known device.
        let targets: Vec<String> = if plan.devices().is_empty() {
            present.to_vec()
        } else {
            plan.devices().to_vec()
        };

        for device in &targets {
            self.clear_device(device).await;
        }

        for cmd in plan.commands() {
            if let Err(err) = self.executor.run(&cmd).await {
                let err = classify(cmd, err);
                tracing::warn!(%err, "install failed, leaving interfaces unshaped");
                for device in &targets {
                    self.clear_device(device).await;
                }
                return Err(err);
            }
        }

        if !plan.is_empty() {
            self.enable_ip_forwarding().await;
            tracing::info!(devices = ?targets, "shaping applied: {}", config.summary());
        } else {
            tracing::info!(devices = ?targets, "shaping removed");
        }

        Ok(())
    }

    /// Removes any existing hierarchy on `device`. Removal of a nonexistent
    /// hierarchy is success, so convergence never depends on knowing prior
    /// state precisely.
    async fn clear_device(&self, device: &str) {
        for cmd in QueueingPlan::teardown_commands(device) {
            match self.executor.run(&cmd).await {
                Ok(_) | Err(command::Error::NonZero(_)) => {}
                Err(err) => tracing::debug!(%cmd, %err, "teardown command failed"),
            }
        }
    }

    async fn enable_ip_forwarding(&self) {
        if let Err(err) = tokio::fs::write(IP_FORWARD_PATH, "1").await {
            tracing::warn!(%err, "failed to enable IP forwarding");
        }
    }
}

/// Maps a failed install command onto the error taxonomy, preserving the raw
/// kernel diagnostic.
fn classify(command: String, err: command::Error) -> ShapingError {
    let command::Error::NonZero(output) = err else {
        return ShapingError::ApplyRejected { command, diagnostic: err.to_string() };
    };

    let diagnostic = if output.stderr.trim().is_empty() {
        output.stdout.trim().to_string()
    } else {
        output.stderr.trim().to_string()
    };

    if diagnostic.contains("Operation not permitted") {
        ShapingError::PermissionDenied
    } else if diagnostic.contains("Cannot find device") {
        ShapingError::InterfaceNotFound(device_of(&command))
    } else {
        ShapingError::ApplyRejected { command, diagnostic }
    }
}

/// The `dev` operand of a `tc` command line.
fn device_of(command: &str) -> String {
    let mut iter = command.split_ascii_whitespace();
    while let Some(token) = iter.next() {
        if token == "dev" {
            return iter.next().unwrap_or_default().to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::command::testing::RecordingExecutor;

    fn present() -> Vec<String> {
        vec!["enp1s0".to_string(), "enp2s0".to_string()]
    }

    fn config() -> ShapingConfig {
        ShapingConfig {
            enabled: true,
            delay_ms: 100,
            bandwidth_mbps: 10.0,
            interface_in: "enp1s0".to_string(),
            interface_out: "enp2s0".to_string(),
        }
    }

    fn planner() -> (Arc<RecordingExecutor>, ShapingPlanner) {
        let executor = Arc::new(RecordingExecutor::new());
        let planner = ShapingPlanner::new(executor.clone());
        (executor, planner)
    }

    #[tokio::test]
    async fn apply_tears_down_before_installing() {
        let (executor, planner) = planner();
        planner.apply(&config(), &present()).await.unwrap();

        let issued = executor.issued();
        assert_eq!(issued[0], "tc qdisc del dev enp1s0 root");
        assert_eq!(issued[1], "tc qdisc del dev enp1s0 ingress");
        assert_eq!(issued[2], "tc qdisc del dev enp2s0 root");
        assert_eq!(issued[3], "tc qdisc del dev enp2s0 ingress");
        assert!(issued[4].starts_with("tc qdisc add dev enp1s0 root handle 1: htb"));
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let (executor, planner) = planner();
        planner.apply(&config(), &present()).await.unwrap();
        let first = executor.issued();

        planner.apply(&config(), &present()).await.unwrap();
        let second = executor.issued();

        // The second apply replays exactly the first sequence: clean teardown
        // followed by the same install, no accumulated objects.
        assert_eq!(second.len(), first.len() * 2);
        assert_eq!(&second[first.len()..], first.as_slice());
    }

    #[tokio::test]
    async fn disable_only_tears_down_and_repeats_cleanly() {
        let (executor, planner) = planner();
        planner.apply(&config(), &present()).await.unwrap();

        let disabled = ShapingConfig { enabled: false, ..config() };
        planner.apply(&disabled, &present()).await.unwrap();
        let issued = executor.issued();
        assert!(issued.iter().rev().take(4).all(|cmd| cmd.starts_with("tc qdisc del")));

        // Disabling again with nothing installed is still a success.
        planner.apply(&disabled, &present()).await.unwrap();
    }

    #[tokio::test]
    async fn disable_without_interfaces_clears_every_known_device() {
        let (executor, planner) = planner();
        planner.apply(&ShapingConfig::default(), &present()).await.unwrap();

        let issued = executor.issued();
        assert_eq!(issued.len(), 4);
        assert!(issued.iter().any(|cmd| cmd.contains("dev enp2s0")));
    }

    #[tokio::test]
    async fn out_of_range_config_never_reaches_the_executor() {
        let (executor, planner) = planner();

        let config = ShapingConfig { delay_ms: 10_001, ..config() };
        let err = planner.apply(&config, &present()).await.unwrap_err();
        assert!(matches!(err, ShapingError::Validation(_)));

        let config = ShapingConfig { bandwidth_mbps: 0.05, ..self::config() };
        let err = planner.apply(&config, &present()).await.unwrap_err();
        assert!(matches!(err, ShapingError::Validation(_)));

        assert!(executor.issued().is_empty());
    }

    #[tokio::test]
    async fn missing_interface_is_rejected_before_any_command() {
        let (executor, planner) = planner();
        let err = planner
            .apply(&config(), &["wlan0".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, ShapingError::InterfaceNotFound(ref dev) if dev == "enp1s0"));
        assert!(executor.issued().is_empty());
    }

    #[tokio::test]
    async fn failed_install_leaves_interfaces_unshaped() {
        let executor = Arc::new(
            RecordingExecutor::new()
                .fail_on("tc class add", "RTNETLINK answers: Invalid argument"),
        );
        let planner = ShapingPlanner::new(executor.clone());

        let err = planner.apply(&config(), &present()).await.unwrap_err();
        assert!(matches!(err, ShapingError::ApplyRejected { .. }));

        // The trailing commands are a fresh teardown of both devices.
        let issued = executor.issued();
        assert!(issued.iter().rev().take(4).all(|cmd| cmd.starts_with("tc qdisc del")));
    }

    #[tokio::test]
    async fn permission_diagnostic_maps_to_permission_denied() {
        let executor = Arc::new(
            RecordingExecutor::new()
                .fail_on("tc qdisc add", "RTNETLINK answers: Operation not permitted"),
        );
        let planner = ShapingPlanner::new(executor);

        let err = planner.apply(&config(), &present()).await.unwrap_err();
        assert!(matches!(err, ShapingError::PermissionDenied));
    }

    #[tokio::test]
    async fn concurrent_apply_is_rejected_as_busy() {
        let executor =
            Arc::new(RecordingExecutor::new().with_delay(Duration::from_millis(20)));
        let planner = Arc::new(ShapingPlanner::new(executor.clone()));

        let first = {
            let planner = planner.clone();
            tokio::spawn(async move { planner.apply(&config(), &present()).await })
        };
        // Give the first apply time to take the lock and start issuing.
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = planner.apply(&config(), &present()).await;

        assert!(matches!(second, Err(ShapingError::Busy)));
        first.await.unwrap().unwrap();

        // The winner's sequence ran to completion without interleaving.
        let issued = executor.issued();
        assert_eq!(issued.len(), 12);
        assert!(issued[..4].iter().all(|cmd| cmd.starts_with("tc qdisc del")));
    }
}
