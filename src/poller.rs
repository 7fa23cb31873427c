use crate::config::PollingConfig;
use crate::error::{OscError, Result};
use crate::executor::CommandExecutor;
use crate::protocol::CommandResult;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Drives an in-progress command to a terminal state by querying the
/// status endpoint at a fixed interval.
#[derive(Clone)]
pub struct StatusPoller {
    executor: CommandExecutor,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(executor: CommandExecutor, config: &PollingConfig) -> Self {
        Self::with_interval(executor, config.interval())
    }

    pub fn with_interval(executor: CommandExecutor, interval: Duration) -> Self {
        Self { executor, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until the command is `done` or `error`.
    ///
    /// A terminal `initial` result is returned without waiting or polling.
    /// Otherwise every interval first reports the last known completion to
    /// `on_progress`, then queries the status endpoint once. Reported
    /// progress never decreases. An `error` state surfaces as
    /// [`OscError::Protocol`] carrying the camera's code and message.
    pub async fn poll_until_terminal<P>(
        &self,
        initial: CommandResult,
        mut on_progress: P,
        cancel: &CancellationToken,
    ) -> Result<CommandResult>
    where
        P: FnMut(f32),
    {
        if initial.is_terminal() {
            trace!("{} finished without polling", initial.name);
            return finish(initial);
        }

        if self.interval.is_zero() {
            return Err(OscError::system(format!(
                "Cannot poll {} with a zero status interval",
                initial.name
            )));
        }

        let name = initial.name.clone();
        let mut current = initial;
        let mut reported: Option<f32> = None;
        let mut ticks = interval_at(Instant::now() + self.interval, self.interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut polls = 0u32;

        loop {
            let id = current.id.clone().ok_or_else(|| {
                OscError::system(format!("{} is in progress without a command id", name))
            })?;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(OscError::Cancelled),
                _ = ticks.tick() => {}
            }

            if let Some(completion) = current.completion() {
                if reported.map_or(true, |last| completion >= last) {
                    on_progress(completion);
                    reported = Some(completion);
                } else {
                    trace!(
                        "Ignoring progress regression for {} ({} < {:?})",
                        name,
                        completion,
                        reported
                    );
                }
            }

            let mut next = self.executor.status(&id, cancel).await?;
            polls += 1;
            if next.id.is_none() {
                next.id = Some(id);
            }
            if next.name.is_empty() {
                next.name = name.clone();
            }

            if next.is_terminal() {
                debug!("{} reached {} after {} status polls", name, next.state, polls);
                return finish(next);
            }
            current = next;
        }
    }
}

fn finish(result: CommandResult) -> Result<CommandResult> {
    let result = result.into_outcome()?;
    info!("{} completed", result.name);
    Ok(result)
}
