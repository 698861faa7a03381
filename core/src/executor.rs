use std::time::Instant;

use chrono::Utc;
use deespec_protocol::Decision;
use deespec_protocol::JournalDecision;
use deespec_protocol::JournalRecord;
use deespec_protocol::Sbi;
use deespec_protocol::SbiId;
use deespec_protocol::SbiStatus;
use deespec_protocol::Step;
use deespec_protocol::next_status;
use tracing::info;
use tracing::warn;

use crate::decision::extract_decision;
use crate::engine::Engine;
use crate::gateway::AgentRequest;
use crate::prompts::render_template;

/// Result of one executor invocation for one SBI.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub sbi_id: SbiId,
    pub turn: i64,
    pub prev_status: SbiStatus,
    pub next_status: SbiStatus,
    pub decision: JournalDecision,
    pub artifact_path: Option<String>,
    pub elapsed_ms: i64,
    pub task_completed: bool,
}

impl Engine {
    /// Execute one workflow turn for `sbi_id`. The caller must already hold
    /// the SBI's run lease (the pick path does; parallel-worker callers own
    /// their own).
    ///
    /// Turn numbering: the stored `current_turn` names the turn this
    /// invocation executes and is advanced by one when it completes. The
    /// turn budget is exhausted once the incremented value would exceed
    /// `max_turns`; that invocation transitions straight to DONE with a
    /// `force_terminated` journal record instead of calling the agent.
    pub async fn execute_for_sbi(&self, sbi_id: &SbiId) -> anyhow::Result<TurnOutcome> {
        let started = Instant::now();
        let mut sbi = self
            .store()
            .find_sbi(sbi_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("unknown sbi {sbi_id}"))?;
        let prev_status = sbi.status;
        if prev_status.is_terminal() {
            return Err(anyhow::anyhow!(
                "invalid transition: sbi {sbi_id} is already {}",
                prev_status.as_str()
            ));
        }
        let turn = sbi.current_turn;
        let now = Utc::now();

        // Max-turns guard.
        if turn + 1 > sbi.max_turns {
            sbi.status = SbiStatus::Done;
            sbi.completed_at = Some(now);
            if sbi.started_at.is_none() {
                sbi.started_at = Some(now);
            }
            sbi.current_turn = (turn + 1).min(sbi.max_turns + 1);
            self.store().save_sbi(&sbi).await?;
            let record = JournalRecord::new(
                now,
                sbi_id,
                turn,
                "force_terminated",
                SbiStatus::Done,
                sbi.current_attempt,
                JournalDecision::ForceTerminated,
                elapsed_ms(started),
                None,
                vec![String::new()],
            );
            self.append_journal(&record);
            info!(sbi_id = sbi_id.as_str(), turn, "turn budget exhausted, forced DONE");
            return Ok(TurnOutcome {
                sbi_id: sbi_id.clone(),
                turn,
                prev_status,
                next_status: SbiStatus::Done,
                decision: JournalDecision::ForceTerminated,
                artifact_path: None,
                elapsed_ms: elapsed_ms(started),
                task_completed: true,
            });
        }

        // Status-only fast paths: no agent call.
        match prev_status {
            SbiStatus::Pending => {
                sbi.status = SbiStatus::Picked;
                sbi.started_at = Some(now);
                sbi.current_turn = turn + 1;
                self.store().save_sbi(&sbi).await?;
                let record = JournalRecord::new(
                    now,
                    sbi_id,
                    turn,
                    "pick",
                    SbiStatus::Picked,
                    sbi.current_attempt,
                    JournalDecision::Picked,
                    elapsed_ms(started),
                    None,
                    vec![String::new()],
                );
                self.append_journal(&record);
                return Ok(TurnOutcome {
                    sbi_id: sbi_id.clone(),
                    turn,
                    prev_status,
                    next_status: SbiStatus::Picked,
                    decision: JournalDecision::Picked,
                    artifact_path: None,
                    elapsed_ms: elapsed_ms(started),
                    task_completed: false,
                });
            }
            SbiStatus::Picked => {
                sbi.status = SbiStatus::Implementing;
                sbi.current_turn = turn + 1;
                self.store().save_sbi(&sbi).await?;
                let record = JournalRecord::new(
                    now,
                    sbi_id,
                    turn,
                    "status_init",
                    SbiStatus::Implementing,
                    sbi.current_attempt,
                    JournalDecision::Initialized,
                    elapsed_ms(started),
                    None,
                    vec![String::new()],
                );
                self.append_journal(&record);
                return Ok(TurnOutcome {
                    sbi_id: sbi_id.clone(),
                    turn,
                    prev_status,
                    next_status: SbiStatus::Implementing,
                    decision: JournalDecision::Initialized,
                    artifact_path: None,
                    elapsed_ms: elapsed_ms(started),
                    task_completed: false,
                });
            }
            _ => {}
        }

        // Agent-call path.
        let work_step = Step::for_status(prev_status);
        let artifact_rel = self.workspace().artifact_rel(sbi_id, work_step, turn);
        let artifact_abs = self.workspace().artifact_abs(sbi_id, work_step, turn);
        let prompt = self.build_prompt(&sbi, work_step, turn, artifact_rel.as_str())?;

        let agent_result = self
            .gateway()
            .execute(AgentRequest {
                prompt,
                timeout: self.config().agent_timeout,
            })
            .await;
        let (stdout, agent_error) = match agent_result {
            Ok(response) => (response.output, None),
            Err(err) => {
                warn!(sbi_id = sbi_id.as_str(), turn, "agent invocation failed: {err}");
                (String::new(), Some(err.to_string()))
            }
        };

        // Self-healing: when the agent produced output but no artifact file,
        // the raw output becomes the artifact.
        let mut txn = self.txn().begin()?;
        let mut staged = false;
        if !artifact_abs.exists() && !stdout.is_empty() {
            txn.stage_file(artifact_rel.as_str(), stdout.as_bytes())?;
            staged = true;
        }

        let (next, increment_attempt, journal_decision) = if prev_status == SbiStatus::Reviewing {
            let reloaded = self
                .store()
                .find_sbi(sbi_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("sbi {sbi_id} vanished mid-turn"))?;
            if reloaded.status != prev_status {
                // The review agent mutated the status out-of-band (approve /
                // reject commands write straight to the store). Trust the
                // reload; no decision re-parsing, no attempt increment.
                sbi = reloaded;
                let decision = journal_decision_for_status(sbi.status);
                (sbi.status, false, decision)
            } else {
                let extracted =
                    extract_decision(&self.workspace().artifact_candidates(sbi_id, work_step, turn), &stdout);
                let transition = next_status(
                    prev_status,
                    extracted.decision,
                    sbi.current_attempt,
                    sbi.max_attempts,
                )?;
                (
                    transition.next,
                    transition.increment_attempt,
                    JournalDecision::from(extracted.decision),
                )
            }
        } else {
            let decision = if agent_error.is_some() {
                // Gateway failures synthesise NEEDS_CHANGES; the turn
                // completes normally and the error rides along.
                Decision::NeedsChanges
            } else {
                extract_decision(
                    &self.workspace().artifact_candidates(sbi_id, work_step, turn),
                    &stdout,
                )
                .decision
            };
            let transition = next_status(prev_status, decision, sbi.current_attempt, sbi.max_attempts)?;
            let journal_decision = match (prev_status, transition.next) {
                // Forced-implement results are unconditionally DONE.
                (SbiStatus::ReviewAndWip, _) => JournalDecision::Succeeded,
                (_, SbiStatus::Failed) => JournalDecision::Failed,
                // The implement step's own decision is irrelevant.
                (SbiStatus::Implementing, _) => JournalDecision::Pending,
                _ => JournalDecision::from(decision),
            };
            (transition.next, transition.increment_attempt, journal_decision)
        };

        sbi.status = next;
        if next.is_terminal() {
            sbi.completed_at = Some(now);
        }
        if sbi.started_at.is_none() {
            sbi.started_at = Some(now);
        }
        if increment_attempt {
            sbi.current_attempt += 1;
        }
        sbi.current_turn = turn + 1;
        sbi.last_error = agent_error.clone();
        let have_artifact = staged || artifact_abs.exists();
        if have_artifact && !sbi.artifact_paths.contains(&artifact_rel) {
            sbi.artifact_paths.push(artifact_rel.clone());
        }
        self.store().save_sbi(&sbi).await?;

        let artifact_entry = if have_artifact {
            artifact_rel.clone()
        } else {
            String::new()
        };
        let record = JournalRecord::new(
            now,
            sbi_id,
            turn,
            Step::for_status(next).as_str(),
            next,
            sbi.current_attempt,
            journal_decision,
            elapsed_ms(started),
            agent_error.as_deref(),
            vec![artifact_entry],
        );
        if staged {
            txn.mark_intent(self.workspace().home())?;
            let commit = txn.commit(|| {
                if let Err(err) = self.journal().append(&record) {
                    warn!("journal append failed (continuing): {err}");
                }
                Ok(())
            });
            if let Err(err) = commit {
                // Losing the fallback artifact degrades audit, not progress.
                warn!(sbi_id = sbi_id.as_str(), turn, "artifact commit failed: {err}");
            }
        } else {
            txn.cleanup();
            self.append_journal(&record);
        }

        info!(
            sbi_id = sbi_id.as_str(),
            turn,
            from = prev_status.as_str(),
            to = next.as_str(),
            decision = journal_decision.as_str(),
            "turn complete"
        );
        Ok(TurnOutcome {
            sbi_id: sbi_id.clone(),
            turn,
            prev_status,
            next_status: next,
            decision: journal_decision,
            artifact_path: have_artifact.then_some(artifact_rel),
            elapsed_ms: elapsed_ms(started),
            task_completed: next == SbiStatus::Done,
        })
    }

    fn build_prompt(
        &self,
        sbi: &Sbi,
        step: Step,
        turn: i64,
        artifact_rel: &str,
    ) -> anyhow::Result<String> {
        let template = self.prompts().load(step)?;
        let prior: Vec<String> = self
            .workspace()
            .prior_artifacts(&sbi.id)
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        let artifacts = if prior.is_empty() {
            "(none)".to_string()
        } else {
            prior.join("\n")
        };
        let mut labels = String::new();
        for name in self
            .prompts()
            .load_meta_labels(&sbi.id)?
            .iter()
            .chain(sbi.labels.iter())
        {
            let content = self.prompts().load_label_content(name)?;
            if !content.is_empty() {
                labels.push_str(&content);
                labels.push('\n');
            }
        }
        let turn_str = turn.to_string();
        let attempt_str = sbi.current_attempt.to_string();
        Ok(render_template(
            &template,
            &[
                ("sbi_id", sbi.id.as_str()),
                ("title", sbi.title.as_str()),
                ("description", sbi.description.as_str()),
                ("turn", turn_str.as_str()),
                ("attempt", attempt_str.as_str()),
                ("artifact_path", artifact_rel),
                ("artifacts", artifacts.as_str()),
                ("labels", labels.as_str()),
            ],
        ))
    }
}

fn journal_decision_for_status(status: SbiStatus) -> JournalDecision {
    match status {
        SbiStatus::Done => JournalDecision::Succeeded,
        SbiStatus::Implementing => JournalDecision::NeedsChanges,
        SbiStatus::Failed => JournalDecision::Failed,
        _ => JournalDecision::Pending,
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
