use super::StepContext;
use crate::collaborators::OutboundNotification;
use crate::orchestration::merge::StateDelta;
use crate::orchestration::state::WorkflowState;

pub fn execute_notification(state: &WorkflowState, ctx: &StepContext<'_>) -> StateDelta {
    let Some(draft) = state.draft_notification.as_ref() else {
        ctx.events
            .error("Notification: there is no drafted report to send.");
        return StateDelta::default();
    };

    let recipients = ctx.settings.notification.resolved_recipients();
    if recipients.is_empty() {
        ctx.events.warn(
            "Notification recipients are not configured. The report was not sent and is still waiting for approval.",
        );
        return StateDelta {
            email_sent: Some(false),
            ..StateDelta::default()
        };
    }

    ctx.events.system(format!(
        "Sending the report to {} recipient(s)...",
        recipients.len()
    ));
    let message = OutboundNotification {
        recipients,
        subject: draft.subject.clone(),
        body: draft.body.clone(),
        attachment_ref: draft.attachment_ref.clone(),
    };
    match ctx.collaborators.transport.send(&message) {
        Ok(()) => {
            let summary = format!(
                "The report was sent to {}. Forensic cloning starts once it is acknowledged.",
                message.recipients.join(", ")
            );
            ctx.events.system("Email sent successfully.");
            ctx.events.assistant(summary.clone());
            StateDelta {
                awaiting_acknowledgment: Some(false),
                email_sent: Some(true),
                final_summary: Some(summary),
                ..StateDelta::default()
            }
        }
        Err(err) => {
            ctx.events
                .error(format!("Notification: failed to send the report: {err}"));
            StateDelta {
                email_sent: Some(false),
                ..StateDelta::default()
            }
        }
    }
}
