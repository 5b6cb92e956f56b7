//! Ingress Router (§4.4) — dispatches decoded bus envelopes by topic.
//!
//! Offsets advance regardless of handler outcome (at-least-once delivery is
//! the bus's job, not ours); a handler error sends the original bytes to
//! `<topic>.dlq` rather than blocking the partition.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::domain::models::{
    BusEnvelope, ChallengeUpdatePayload, CommandPayload, PhaseTransitionPayload, TransitionState,
};
use crate::domain::ports::EgressProducer;

use super::adjustment_engine;
use super::job_registry::JobRegistry;

pub const CHALLENGE_UPDATE_TOPIC: &str = "challenge.update";
pub const COMMAND_TOPIC: &str = "command";

/// Routes one already-decoded message to the handler for its topic.
pub struct IngressRouter {
    registry: Arc<JobRegistry>,
    egress: Arc<dyn EgressProducer>,
}

impl IngressRouter {
    pub fn new(registry: Arc<JobRegistry>, egress: Arc<dyn EgressProducer>) -> Self {
        Self { registry, egress }
    }

    /// Handle a single raw message: decode it per `topic`, dispatch, and
    /// dead-letter on any failure. Returns `Ok(())` once the message has been
    /// either handled or dead-lettered — the caller always advances the
    /// consumer offset afterwards.
    pub async fn handle_raw(&self, topic: &str, raw: &[u8]) {
        let outcome = match topic {
            super::job_registry::PHASE_TRANSITION_TOPIC => self.handle_phase_transition(raw).await,
            CHALLENGE_UPDATE_TOPIC => self.handle_challenge_update(raw).await,
            COMMAND_TOPIC => self.handle_command(raw).await,
            other => {
                warn!(topic = other, "ingress message on unrecognized topic, dead-lettering");
                Err(format!("unrecognized topic: {other}"))
            }
        };

        if let Err(reason) = outcome {
            if let Err(err) = self.egress.send_to_dlq(topic, raw, &reason).await {
                error!(topic, error = %err, "failed to dead-letter unprocessable message");
            }
        }
    }

    async fn handle_phase_transition(&self, raw: &[u8]) -> Result<(), String> {
        let envelope: BusEnvelope<PhaseTransitionPayload> =
            serde_json::from_slice(raw).map_err(|e| format!("decode error: {e}"))?;
        let payload = envelope.payload;

        // Only START->END scheduling happens through `challenge.update` or the
        // `schedule_phase_transition` command; an inbound START/END transition
        // event is informational here and is not itself a scheduling trigger.
        info!(
            project_id = payload.project_id,
            phase_id = payload.phase_id,
            state = %payload.state,
            "observed phase transition event"
        );
        Ok(())
    }

    async fn handle_challenge_update(&self, raw: &[u8]) -> Result<(), String> {
        let envelope: BusEnvelope<ChallengeUpdatePayload> =
            serde_json::from_slice(raw).map_err(|e| format!("decode error: {e}"))?;
        let update = envelope.payload;

        if update.status.eq_ignore_ascii_case("cancelled") || update.status.eq_ignore_ascii_case("completed") {
            let cancelled = adjustment_engine::cancel_all_for_project(&self.registry, update.project_id).await;
            info!(project_id = update.project_id, cancelled, status = %update.status, "cancelled all jobs for finished project");
            return Ok(());
        }

        if !update.is_detailed() {
            info!(project_id = update.project_id, "challenge update carried no phase detail, nothing to reconcile");
            return Ok(());
        }

        // §4.4: detailed updates only reconcile when `projectStatus = ACTIVE`;
        // `DRAFT` is a no-op and anything else is logged and ignored.
        match update.project_status.as_deref() {
            Some(status) if status.eq_ignore_ascii_case("active") => {}
            Some(status) if status.eq_ignore_ascii_case("draft") => {
                info!(project_id = update.project_id, "draft project status, nothing to reconcile");
                return Ok(());
            }
            Some(other) => {
                warn!(project_id = update.project_id, project_status = other, "unrecognized projectStatus on detailed challenge update, ignoring");
                return Ok(());
            }
            None => {
                warn!(project_id = update.project_id, "detailed challenge update missing projectStatus, ignoring");
                return Ok(());
            }
        }

        let phases: Vec<_> = update
            .phases
            .unwrap_or_default()
            .into_iter()
            .filter(|p| matches!(p.phase_status.to_ascii_uppercase().as_str(), "ACTIVE" | "SCHEDULED"))
            .map(|p| crate::domain::models::CatalogPhase {
                project_id: update.project_id,
                phase_id: p.phase_id,
                phase_type_name: p.phase_type_name,
                state: TransitionState::End,
                end_time: p.end_time,
                project_status: update.project_status.clone().unwrap_or_default(),
                operator: update.operator.clone(),
                metadata: None,
            })
            .collect();

        let changes = adjustment_engine::detect_changes(&self.registry, update.project_id, &phases, &update.operator).await;
        if changes.is_empty() {
            return Ok(());
        }

        let result = adjustment_engine::apply(&self.registry, changes).await;
        if !result.success {
            return Err(format!("adjustment apply had {} error(s): {:?}", result.errors.len(), result.errors));
        }
        Ok(())
    }

    async fn handle_command(&self, raw: &[u8]) -> Result<(), String> {
        let envelope: BusEnvelope<CommandPayload> =
            serde_json::from_slice(raw).map_err(|e| format!("decode error: {e}"))?;
        let command = envelope.payload;

        // §4.4: "by `command` field (case-insensitive)".
        match command.command.to_ascii_lowercase().as_str() {
            "schedule_phase_transition" => self.handle_schedule_command(command).await,
            "cancel_scheduled_transition" => self.handle_cancel_command(command).await,
            "list_scheduled_transitions" => self.handle_list_command(command).await,
            "cancel_all_for_project" => {
                let Some(project_id) = command.project_id else {
                    return Err("cancel_all_for_project requires project_id".to_string());
                };
                let cancelled = adjustment_engine::cancel_all_for_project(&self.registry, project_id).await;
                info!(project_id, cancelled, operator = %command.operator, "command cancelled project jobs");
                Ok(())
            }
            other => {
                warn!(command = other, "unrecognized command, ignoring");
                Ok(())
            }
        }
    }

    async fn handle_schedule_command(&self, command: CommandPayload) -> Result<(), String> {
        let project_id = command.project_id.ok_or("schedule_phase_transition requires projectId")?;
        let phase_id = command.phase_id.ok_or("schedule_phase_transition requires phaseId")?;
        let phase_type_name = command
            .phase_type_name
            .ok_or("schedule_phase_transition requires phaseTypeName")?;
        let scheduled_time = command
            .scheduled_time
            .ok_or("schedule_phase_transition requires scheduledTime")?;

        let input = crate::domain::models::ScheduleInput {
            project_id,
            phase_id,
            phase_type_name,
            state: command.state.unwrap_or(TransitionState::End),
            scheduled_time,
            operator: command.operator.clone(),
            project_status: command.project_status.unwrap_or_else(|| "ACTIVE".to_string()),
            metadata: Default::default(),
        };

        let job_id = self.registry.schedule(input).await.map_err(|e| e.to_string())?;
        info!(project_id, phase_id, job_id = %job_id, operator = %command.operator, "command scheduled phase transition");
        Ok(())
    }

    async fn handle_cancel_command(&self, command: CommandPayload) -> Result<(), String> {
        let job_id_str = command.job_id.ok_or("cancel_scheduled_transition requires jobId")?;
        let job_id: crate::domain::models::JobId = job_id_str.parse().expect("JobId parsing is infallible");

        let cancelled = self.registry.cancel(&job_id).await;
        info!(job_id = %job_id, cancelled, operator = %command.operator, "command processed cancel request");
        Ok(())
    }

    async fn handle_list_command(&self, command: CommandPayload) -> Result<(), String> {
        let jobs = match command.project_id {
            Some(project_id) => self.registry.jobs_for_project(project_id).await,
            None => self.registry.list_all().await,
        };
        // No reply topic is specified for `command` (spec.md §3); the result
        // is surfaced through structured logging for the operator/log pipeline.
        info!(count = jobs.len(), project_id = command.project_id, operator = %command.operator, "command listed scheduled transitions");
        Ok(())
    }
}
