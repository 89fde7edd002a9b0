use crate::coordination::changer::Changer;
use crate::coordination::heartbeat::Heartbeat;
use crate::coordination::master_lease::MasterLease;
use crate::store::{KeyValueStore, NodeId, StoreError};
use crate::time::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The master's heartbeat is fresh; nothing to do.
    Healthy,
    /// We were the changer and ran release -> claim -> heartbeat. `claimed` is false if another
    /// node got its claim in between our release and our claim.
    FailedOver { claimed: bool },
    /// The heartbeat is expired and another node is the changer. We've now watched it fail to
    /// clear the expiry for `missed_ticks` consecutive ticks.
    AwaitingChanger { changer: NodeId, missed_ticks: u32 },
}

/// FailoverWatch is one subscriber's view of an expiry episode. Only the changer attempts
/// failover; everybody else counts the ticks the same changer leaves the heartbeat expired and,
/// once `patience` is exhausted, rotates it so another node can take over the job.
pub(crate) struct FailoverWatch<S: KeyValueStore, C: Clock> {
    logger: slog::Logger,
    my_id: NodeId,
    master: MasterLease<S>,
    heartbeat: Heartbeat<S, C>,
    changer: Changer<S>,
    patience: u32,

    // The changer we saw on the previous tick, and how many ticks in a row it has not acted.
    observed_changer: Option<NodeId>,
    missed_ticks: u32,
}

impl<S: KeyValueStore, C: Clock> FailoverWatch<S, C> {
    pub(crate) fn new(
        logger: slog::Logger,
        my_id: NodeId,
        master: MasterLease<S>,
        heartbeat: Heartbeat<S, C>,
        changer: Changer<S>,
        patience: u32,
    ) -> Self {
        FailoverWatch {
            logger,
            my_id,
            master,
            heartbeat,
            changer,
            patience,
            observed_changer: None,
            missed_ticks: 0,
        }
    }

    pub(crate) async fn tick(&mut self) -> Result<TickOutcome, StoreError> {
        if !self.heartbeat.is_heartbeat_expired().await? {
            self.missed_ticks = 0;
            return Ok(TickOutcome::Healthy);
        }

        if self.missed_ticks >= self.patience {
            if let Some(stale) = self.observed_changer {
                // Conditional: a no-op if the changer already changed since we looked.
                self.changer.rotate_changer(stale).await?;
            }
            self.missed_ticks = 0;
        }

        let changer = self.changer.current_changer().await?;
        if self.observed_changer != Some(changer) {
            self.observed_changer = Some(changer);
            self.missed_ticks = 0;
        }

        if changer == self.my_id {
            self.missed_ticks = 0;
            return self.fail_over().await;
        }

        self.missed_ticks += 1;
        slog::info!(
            self.logger,
            "Heartbeat expired, changer {:?} has not responded for {} tick(s)",
            changer,
            self.missed_ticks
        );
        Ok(TickOutcome::AwaitingChanger {
            changer,
            missed_ticks: self.missed_ticks,
        })
    }

    async fn fail_over(&self) -> Result<TickOutcome, StoreError> {
        // Another observer may have rotated us out since the tick read the record.
        if !self.changer.is_self_changer().await? {
            slog::info!(self.logger, "No longer changer, skipping failover");
            return Ok(TickOutcome::FailedOver { claimed: false });
        }

        // A previous changer may have finished failing over (and resigned) after our tick read the
        // expired heartbeat. Releasing now would throw away the lease it just claimed.
        if !self.heartbeat.is_heartbeat_expired().await? {
            slog::info!(self.logger, "Heartbeat refreshed while electing, skipping failover");
            self.resign_changer().await;
            return Ok(TickOutcome::Healthy);
        }

        let removed = self.master.release_stale_master().await?;
        slog::info!(self.logger, "Deleted broken master record ({} removed)", removed);

        let claimed = self.master.claim_master().await?;

        // Refresh right away so a third node doesn't see the expiry and start its own episode.
        self.heartbeat.record_heartbeat().await?;
        self.resign_changer().await;

        Ok(TickOutcome::FailedOver { claimed })
    }

    async fn resign_changer(&self) {
        if let Err(e) = self.changer.resign().await {
            // Harmless: the record is rotated out by the others if it lingers into another episode.
            slog::warn!(self.logger, "Failed to clear changer record: {}", e);
        }
    }
}
