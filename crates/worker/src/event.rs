//! Bus events about production jobs.

use renderwatch_db::models::production_job::ProductionJob;
use renderwatch_events::MonitorEvent;

/// Build a job event whose payload carries the job's identifying fields
/// merged with `details`.
pub fn job_event(event_type: &str, job: &ProductionJob, details: serde_json::Value) -> MonitorEvent {
    let mut payload = serde_json::json!({
        "job_id": job.id,
        "job_type": job.job_type,
        "project_id": job.project_id,
        "character_id": job.character_id,
        "prompt_id": job.comfyui_prompt_id,
        "retry_count": job.retry_count,
        "max_retries": job.max_retries,
    });
    if let (Some(base), serde_json::Value::Object(extra)) = (payload.as_object_mut(), details) {
        base.extend(extra);
    }
    MonitorEvent::for_job(event_type, job.id).with_payload(payload)
}
