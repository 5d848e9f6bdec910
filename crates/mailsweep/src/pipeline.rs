//! Job dispatch
//!
//! Binds the queue contract to the concrete pipeline stages. A terminal
//! unsubscribe status (including `failed`) completes the job: only
//! infrastructure errors bubble up and trigger the queue's retry.

use std::sync::Arc;

use anyhow::Result;

use crate::enrich::Enricher;
use crate::jobs::{Job, JobHandler};
use crate::sync::SyncEngine;
use crate::unsubscribe::UnsubscribeExecutor;

pub struct Pipeline {
    engine: Arc<SyncEngine>,
    enricher: Arc<Enricher>,
    executor: Arc<UnsubscribeExecutor>,
}

impl Pipeline {
    pub fn new(
        engine: Arc<SyncEngine>,
        enricher: Arc<Enricher>,
        executor: Arc<UnsubscribeExecutor>,
    ) -> Self {
        Self {
            engine,
            enricher,
            executor,
        }
    }
}

impl JobHandler for Pipeline {
    fn handle(&self, job: &Job) -> Result<()> {
        match job {
            Job::SyncHistory {
                account_id,
                history_id,
            } => {
                self.engine.handle_notification(*account_id, history_id)?;
                Ok(())
            }
            Job::ProcessMessage { message_id } => self.enricher.process_message(*message_id),
            Job::Unsubscribe { message_id } => {
                self.executor.run(*message_id)?;
                Ok(())
            }
        }
    }
}
