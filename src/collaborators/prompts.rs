use crate::collaborators::SummaryTemplate;
use serde_json::Value;

pub const PLANNER_PROMPT: &str = r####"You turn operator requests for a cloud security assistant into a plan.
Reply with a single JSON object holding exactly these keys:
- "action": one of "list_vms" or "security_scan". Use "invalid" when the request asks for anything else.
- "scanProfile": the scan playbook file to run. For "security_scan" use "openscap_scan.yml". Otherwise null.
- "filters": an object of inventory filters named in the request, such as a project or a VM name. Use {} when none are given.

Examples:
Request: "Which machines are exposed to ransomware or running outdated libraries?"
{"action": "security_scan", "scanProfile": "openscap_scan.yml", "filters": {}}

Request: "Show me the VMs in the production project."
{"action": "list_vms", "scanProfile": null, "filters": {"project_name": "production"}}

Request: "Scan web-server-01 for vulnerabilities."
{"action": "security_scan", "scanProfile": "openscap_scan.yml", "filters": {"name": "web-server-01"}}

Reply with the JSON object only.

Request: "{request}""####;

const STRUCTURED_SUMMARY_PROMPT: &str = r####"You are a security analyst. The JSON below maps each scanned host to the titles of the vulnerabilities found on it.
Reply with a JSON object holding:
- "overall_summary": one or two sentences describing the overall exposure.
- "vulnerability_details": the same host to titles mapping, keeping every host and every title.

Findings:
{payload}"####;

const NOTIFICATION_BODY_PROMPT: &str = r####"Draft a Markdown email for the security operations team from the JSON summary below.
The email must:
1. Open with "Hello Team,".
2. State the overall_summary.
3. Contain a "## Detailed Findings by Host" section with a "### Host: <name>" heading per host and every vulnerability as a bullet.
4. Contain a "### Next Steps" section with this call to action, keeping the link exactly as given:
   To acknowledge this report and create forensic copies of the affected VMs in an isolated network, follow the link below:
   [Acknowledge and Initiate Forensics]({link})
5. Mention that the findings table is attached when an attachment is present.
6. Close with "Regards,\nScanward".

Summary and context:
{payload}"####;

const UI_SUMMARY_PROMPT: &str = r####"Summarize these scan results for an operator reading a chat window, in Markdown.
Start with the overall_summary. Then add a "## Key Findings" section listing each host in bold with its vulnerability count, for example "**kafka-1 (3 vulnerabilities):**", followed by up to three of its most severe-sounding titles as bullets.
Keep it short and actionable.

Summary:
{payload}"####;

const SUBJECT_PROMPT: &str = r####"Write one short email subject line for the security scan summary below.
It must start with "Scanward Scan Report:". Reply with the subject line only.

Summary: {payload}"####;

pub fn planner_prompt(request: &str) -> String {
    PLANNER_PROMPT.replace("{request}", request)
}

pub fn summary_prompt(template: SummaryTemplate, payload: &Value) -> String {
    match template {
        SummaryTemplate::StructuredSummary => {
            STRUCTURED_SUMMARY_PROMPT.replace("{payload}", &pretty(payload))
        }
        SummaryTemplate::NotificationBody => {
            let link = payload
                .get("acknowledgment_link")
                .and_then(Value::as_str)
                .unwrap_or_default();
            NOTIFICATION_BODY_PROMPT
                .replace("{link}", link)
                .replace("{payload}", &pretty(payload))
        }
        SummaryTemplate::UiSummary => UI_SUMMARY_PROMPT.replace("{payload}", &pretty(payload)),
        SummaryTemplate::Subject => {
            let summary = payload
                .get("overall_summary")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| pretty(payload));
            SUBJECT_PROMPT.replace("{payload}", &summary)
        }
    }
}

/// Templates whose reply must be a JSON object.
pub fn expects_json(template: SummaryTemplate) -> bool {
    matches!(template, SummaryTemplate::StructuredSummary)
}

fn pretty(payload: &Value) -> String {
    serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_prompt_carries_link_verbatim() {
        let prompt = summary_prompt(
            SummaryTemplate::NotificationBody,
            &json!({"acknowledgment_link": "http://ack/v1/acknowledge/report-1"}),
        );
        assert!(prompt.contains("[Acknowledge and Initiate Forensics](http://ack/v1/acknowledge/report-1)"));
    }

    #[test]
    fn planner_prompt_embeds_request() {
        assert!(planner_prompt("list my vms").contains("Request: \"list my vms\""));
    }
}
