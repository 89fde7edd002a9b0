use crate::classifier::ErrorClassifier;
use crate::coordination::{Changer, FailoverWatch, Heartbeat, MasterLease, TickOutcome};
use crate::queue::TaskQueue;
use crate::role::consumer_pipeline::{ConsumerPipeline, PipelineSettings};
use crate::role::error_reporter::{CoordinationError, ErrorReporter};
use crate::role::payload::PayloadGenerator;
use crate::role::role_state::{Role, RoleChangeNotifier, RoleState};
use crate::store::{KeyValueStore, Keyspace, NodeId};
use crate::time::{self, Clock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug)]
pub(crate) struct RoleSettings {
    pub(crate) publish_interval: Duration,
    pub(crate) heartbeat_expiry: Duration,
    pub(crate) master_poll_interval: Duration,
    pub(crate) changer_tick_interval: Duration,
    pub(crate) changer_patience: u32,
    pub(crate) pipeline: PipelineSettings,
}

/// RoleStateMachine runs a node as Generator or Subscriber, moving between the two as the master
/// lease changes hands. Everything a role starts is stopped and joined before the other role
/// starts.
pub(crate) struct RoleStateMachine<S: KeyValueStore, C: Clock> {
    logger: slog::Logger,
    my_id: NodeId,
    clock: C,
    settings: RoleSettings,
    master: MasterLease<S>,
    heartbeat: Heartbeat<S, C>,
    changer: Changer<S>,
    queue: TaskQueue<S, C>,
    classifier: ErrorClassifier<S>,
    payloads: PayloadGenerator,
    errors: ErrorReporter,
    notifier: RoleChangeNotifier,
}

impl<S: KeyValueStore, C: Clock> RoleStateMachine<S, C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        logger: slog::Logger,
        my_id: NodeId,
        store: S,
        clock: C,
        keyspace: &Keyspace,
        settings: RoleSettings,
        queue: TaskQueue<S, C>,
        classifier: ErrorClassifier<S>,
        payloads: PayloadGenerator,
        errors: ErrorReporter,
        notifier: RoleChangeNotifier,
    ) -> Self {
        RoleStateMachine {
            master: MasterLease::new(logger.clone(), store.clone(), keyspace, my_id),
            heartbeat: Heartbeat::new(
                logger.clone(),
                store.clone(),
                clock.clone(),
                keyspace,
                settings.heartbeat_expiry,
            ),
            changer: Changer::new(logger.clone(), store, keyspace, my_id),
            logger,
            my_id,
            clock,
            settings,
            queue,
            classifier,
            payloads,
            errors,
            notifier,
        }
    }

    pub(crate) async fn run(mut self, shutdown: CancellationToken) {
        if let Err(e) = self.master.claim_master().await {
            self.errors.report(CoordinationError::store("claim master lease", e));
        }

        let mut role = match self.master.is_current_master().await {
            Ok(true) => Role::Generator,
            Ok(false) => Role::Subscriber,
            Err(e) => {
                self.errors.report(CoordinationError::store("check master lease", e));
                Role::Subscriber
            }
        };

        loop {
            slog::info!(self.logger, "Running as {}", role);
            self.notifier.notify_new_state(RoleState::Active(role));

            let next = match role {
                Role::Generator => self.run_generator(&shutdown).await,
                Role::Subscriber => self.run_subscriber(&shutdown).await,
            };

            match next {
                Some(next) => role = next,
                None => break,
            }
        }

        slog::info!(self.logger, "Stopped");
        self.notifier.notify_new_state(RoleState::Stopped);
    }

    /// Returns the next role, or None on shutdown.
    async fn run_generator(&mut self, shutdown: &CancellationToken) -> Option<Role> {
        let mut announced = false;

        loop {
            match self.master.is_current_master().await {
                Ok(true) => {}
                Ok(false) => {
                    slog::info!(self.logger, "No longer master");
                    return Some(Role::Subscriber);
                }
                Err(e) => {
                    self.errors.report(CoordinationError::store("check master lease", e));
                    if time::sleep_or_cancelled(&mut self.clock, self.settings.publish_interval, shutdown).await {
                        return None;
                    }
                    continue;
                }
            }

            // Announce right away. Waiting for the first publish could let the heartbeat lapse
            // between a failover and our first item.
            if !announced {
                announced = true;
                if let Err(e) = self.heartbeat.record_heartbeat().await {
                    self.errors.report(CoordinationError::store("record heartbeat", e));
                }
            }

            if time::sleep_or_cancelled(&mut self.clock, self.settings.publish_interval, shutdown).await {
                return None;
            }

            let item = self.payloads.generate();
            match self.queue.publish(&item).await {
                Ok(()) => {
                    slog::debug!(self.logger, "Published {}", item);
                    if let Err(e) = self.heartbeat.record_heartbeat().await {
                        self.errors.report(CoordinationError::store("record heartbeat", e));
                    }
                }
                Err(e) => self.errors.report(CoordinationError::queue("publish work item", e)),
            }
        }
    }

    /// Returns the next role, or None on shutdown.
    async fn run_subscriber(&mut self, shutdown: &CancellationToken) -> Option<Role> {
        let session = shutdown.child_token();
        let watch = FailoverWatch::new(
            self.logger.clone(),
            self.my_id,
            self.master.clone(),
            self.heartbeat.clone(),
            self.changer.clone(),
            self.settings.changer_patience,
        );
        let changer_task = tokio::spawn(run_changer_ticks(
            self.logger.clone(),
            watch,
            self.clock.clone(),
            self.settings.changer_tick_interval,
            session.clone(),
            self.errors.clone(),
        ));

        let mut pipeline = self.start_pipeline().await;

        let next = loop {
            if time::sleep_or_cancelled(&mut self.clock, self.settings.master_poll_interval, shutdown).await {
                break None;
            }

            if pipeline.is_none() {
                pipeline = self.start_pipeline().await;
            }

            match self.master.is_current_master().await {
                Ok(true) => {
                    slog::info!(self.logger, "Became master");
                    break Some(Role::Generator);
                }
                Ok(false) => {}
                Err(e) => self.errors.report(CoordinationError::store("check master lease", e)),
            }
        };

        session.cancel();
        if let Err(e) = changer_task.await {
            slog::error!(self.logger, "Changer task failed: {}", e);
        }

        if let Some(pipeline) = pipeline {
            match pipeline.stop().await {
                Ok(drained) => slog::info!(self.logger, "Stopped consuming, drained {} items", drained.len()),
                Err(e) => self.errors.report(CoordinationError::queue("stop consuming", e)),
            }
        }

        next
    }

    async fn start_pipeline(&self) -> Option<ConsumerPipeline<S>> {
        let started = ConsumerPipeline::start(
            self.logger.clone(),
            &self.queue,
            self.clock.clone(),
            self.settings.pipeline,
            self.classifier.clone(),
            self.errors.clone(),
        )
        .await;

        match started {
            Ok(pipeline) => Some(pipeline),
            Err(e) => {
                self.errors.report(CoordinationError::queue("start consuming", e));
                None
            }
        }
    }
}

async fn run_changer_ticks<S: KeyValueStore, C: Clock>(
    logger: slog::Logger,
    mut watch: FailoverWatch<S, C>,
    mut clock: C,
    interval: Duration,
    cancel: CancellationToken,
    errors: ErrorReporter,
) {
    loop {
        if time::sleep_or_cancelled(&mut clock, interval, &cancel).await {
            return;
        }

        match watch.tick().await {
            Ok(TickOutcome::FailedOver { claimed: true }) => slog::info!(logger, "Failed over, claimed master lease"),
            Ok(TickOutcome::FailedOver { claimed: false }) => {
                slog::info!(logger, "Failed over, but another node claimed the master lease first")
            }
            Ok(outcome) => slog::trace!(logger, "Changer tick: {:?}", outcome),
            Err(e) => errors.report(CoordinationError::store("run changer tick", e)),
        }
    }
}
