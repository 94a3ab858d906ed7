use castellan_types::{EventType, SecurityEvent};

/// Renders a [`SecurityEvent`] into a platform payload body. Each channel
/// owns its own render format (Teams adaptive-card JSON, Slack block-kit
/// JSON); this module only decides what text goes into that payload.
pub fn render_summary(event: &SecurityEvent) -> String {
    match template_for(event.response.event_type) {
        Some(template) => fill(template, event),
        None => fallback_format(event),
    }
}

/// Platform-agnostic templates keyed by event-type family. Missing entries
/// fall through to [`fallback_format`].
fn template_for(event_type: EventType) -> Option<&'static str> {
    match event_type {
        EventType::AuthenticationFailure => {
            Some("Authentication failure: {summary} (risk: {risk}, confidence: {confidence}%)")
        }
        EventType::PrivilegeEscalation => {
            Some("Privilege escalation detected: {summary} (risk: {risk}, confidence: {confidence}%)")
        }
        EventType::PowerShellExecution => {
            Some("PowerShell activity: {summary} (risk: {risk}, confidence: {confidence}%)")
        }
        _ => None,
    }
}

fn fill(template: &str, event: &SecurityEvent) -> String {
    template
        .replace("{summary}", &event.response.summary)
        .replace("{risk}", risk_label(event))
        .replace("{confidence}", &event.response.confidence.to_string())
}

fn risk_label(event: &SecurityEvent) -> &'static str {
    use castellan_types::RiskLevel;
    match event.response.risk {
        RiskLevel::Low => "low",
        RiskLevel::Medium => "medium",
        RiskLevel::High => "high",
        RiskLevel::Critical => "critical",
    }
}

/// Built-in formatter used when no template matches the event's type.
fn fallback_format(event: &SecurityEvent) -> String {
    format!(
        "[{}] {} (confidence: {}%, host: {})",
        risk_label(event),
        event.response.summary,
        event.response.confidence,
        event.original_event.host
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_types::{EventLevel, LlmSecurityEventResponse, LogEvent, RiskLevel};
    use chrono::Utc;

    fn event(event_type: EventType) -> SecurityEvent {
        let original = LogEvent::new(
            Utc::now(),
            "H1",
            "Security",
            4625,
            EventLevel::Information,
            "alice",
            "m",
            "",
            None,
        )
        .unwrap();
        let response = LlmSecurityEventResponse {
            risk: RiskLevel::Medium,
            confidence: 80,
            summary: "Repeated failed logons from a single host".to_string(),
            mitre: vec![],
            recommended_actions: vec![],
            event_type,
        };
        SecurityEvent::new(original, response, false, false, 0.0, 0.0, 0.0, None).unwrap()
    }

    #[test]
    fn known_event_type_uses_its_template() {
        let rendered = render_summary(&event(EventType::AuthenticationFailure));
        assert!(rendered.starts_with("Authentication failure:"));
        assert!(rendered.contains("80%"));
    }

    #[test]
    fn unknown_event_type_uses_fallback_formatter() {
        let rendered = render_summary(&event(EventType::Unknown));
        assert!(rendered.starts_with("[medium]"));
        assert!(rendered.contains("H1"));
    }
}
