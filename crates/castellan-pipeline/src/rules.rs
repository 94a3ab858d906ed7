use castellan_types::{EventType, LlmSecurityEventResponse, LogEvent, RiskLevel};

struct Rule {
    channel: &'static str,
    event_id: u32,
    event_type: EventType,
    risk: RiskLevel,
    confidence: u8,
    summary: &'static str,
    mitre: &'static [&'static str],
    actions: &'static [&'static str],
}

/// Closed set of fixed `(channel, eventId)` mappings classified without
/// invoking the LLM. Deliberately small and conservative: anything not
/// listed here falls through to the model-backed path.
const RULES: &[Rule] = &[
    Rule {
        channel: "Security",
        event_id: 4625,
        event_type: EventType::AuthenticationFailure,
        risk: RiskLevel::Medium,
        confidence: 70,
        summary: "Failed account logon.",
        mitre: &["T1110"],
        actions: &["Review authentication source", "Check for repeated failures"],
    },
    Rule {
        channel: "Security",
        event_id: 4720,
        event_type: EventType::AccountManagement,
        risk: RiskLevel::Medium,
        confidence: 65,
        summary: "A new user account was created.",
        mitre: &["T1136"],
        actions: &["Verify account creation was authorized"],
    },
    Rule {
        channel: "Security",
        event_id: 4732,
        event_type: EventType::PrivilegeEscalation,
        risk: RiskLevel::High,
        confidence: 75,
        summary: "A member was added to a privileged local group.",
        mitre: &["T1078.003"],
        actions: &["Verify group membership change was authorized"],
    },
    Rule {
        channel: "System",
        event_id: 7045,
        event_type: EventType::ServiceInstallation,
        risk: RiskLevel::Medium,
        confidence: 65,
        summary: "A new service was installed on the system.",
        mitre: &["T1543.003"],
        actions: &["Verify the installed service binary"],
    },
    Rule {
        channel: "Security",
        event_id: 4698,
        event_type: EventType::ScheduledTask,
        risk: RiskLevel::Medium,
        confidence: 65,
        summary: "A scheduled task was created.",
        mitre: &["T1053.005"],
        actions: &["Review the scheduled task definition"],
    },
    Rule {
        channel: "Security",
        event_id: 4688,
        event_type: EventType::ProcessCreation,
        risk: RiskLevel::Low,
        confidence: 55,
        summary: "A new process was created.",
        mitre: &["T1059"],
        actions: &["Review process command line"],
    },
    Rule {
        channel: "Microsoft-Windows-PowerShell/Operational",
        event_id: 4104,
        event_type: EventType::PowerShellExecution,
        risk: RiskLevel::Medium,
        confidence: 60,
        summary: "A PowerShell script block was executed.",
        mitre: &["T1059.001"],
        actions: &["Review the executed script block"],
    },
];

/// Classify `event` against the closed rule set, returning `None` when no
/// rule matches (the pipeline then falls through to the model-backed path).
pub fn classify_deterministic(event: &LogEvent) -> Option<LlmSecurityEventResponse> {
    let rule = RULES
        .iter()
        .find(|r| r.channel == event.channel && r.event_id == event.event_id)?;

    Some(LlmSecurityEventResponse {
        risk: rule.risk,
        confidence: rule.confidence,
        summary: rule.summary.to_string(),
        mitre: rule.mitre.iter().map(|s| s.to_string()).collect(),
        recommended_actions: rule.actions.iter().map(|s| s.to_string()).collect(),
        event_type: rule.event_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_types::EventLevel;
    use chrono::Utc;

    fn event(channel: &str, event_id: u32) -> LogEvent {
        LogEvent::new(
            Utc::now(),
            "H1",
            channel,
            event_id,
            EventLevel::Information,
            "alice",
            "message",
            "",
            None,
        )
        .unwrap()
    }

    #[test]
    fn known_event_id_classified_without_model() {
        let response = classify_deterministic(&event("Security", 4625)).unwrap();
        assert!(matches!(response.event_type, EventType::AuthenticationFailure));
    }

    #[test]
    fn successful_logon_is_not_in_the_rule_set() {
        assert!(classify_deterministic(&event("Security", 4624)).is_none());
    }

    #[test]
    fn unknown_event_id_falls_through() {
        assert!(classify_deterministic(&event("Security", 9999)).is_none());
    }

    #[test]
    fn rule_response_is_schema_valid() {
        for rule in RULES {
            let response = classify_deterministic(&event(rule.channel, rule.event_id)).unwrap();
            assert!(response.validate().is_ok());
        }
    }
}
