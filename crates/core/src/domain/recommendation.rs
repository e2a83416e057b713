use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::remediation::RemediationAction;

/// One candidate action produced by the upstream analysis pipeline.
///
/// `action` is free text and `estimated_savings` a currency string — both
/// arrive exactly as the analyzer emitted them and must survive mapping into
/// the typed domain before anything destructive can happen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub resource_id: String,
    pub resource_type: String,
    pub provider: String,
    pub region: String,
    pub action: String,
    pub estimated_savings: String,
    pub confidence: f64,
    pub autonomous_ready: bool,
}

/// Parse analyzer currency strings like `"$42.50"`, `"1,200/mo"`, `"$3"`.
pub fn parse_savings(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .trim_end_matches("/mo")
        .trim_end_matches("/month")
        .chars()
        .filter(|ch| !matches!(ch, '$' | ',' | ' '))
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    cleaned.parse::<Decimal>().ok().filter(|value| !value.is_sign_negative())
}

/// Ordered substring rules mapping free-text analyzer actions onto the
/// action enum. First match wins, so specific nouns (snapshot, volume) come
/// before generic verbs (stop). No match means skip — the mapper never
/// guesses a destructive action.
#[derive(Clone, Debug)]
pub struct ActionMapper {
    rules: Vec<(&'static str, RemediationAction)>,
}

impl Default for ActionMapper {
    fn default() -> Self {
        Self {
            rules: vec![
                ("terminate", RemediationAction::TerminateInstance),
                ("release", RemediationAction::ReleaseAddress),
                ("snapshot", RemediationAction::DeleteSnapshot),
                ("volume", RemediationAction::DeleteVolume),
                ("load balancer", RemediationAction::DeleteLoadBalancer),
                ("database", RemediationAction::StopDatabase),
                ("rds", RemediationAction::StopDatabase),
                ("stop", RemediationAction::StopInstance),
                ("shut down", RemediationAction::StopInstance),
            ],
        }
    }
}

impl ActionMapper {
    pub fn map(&self, action_text: &str) -> Option<RemediationAction> {
        let normalized = action_text.trim().to_ascii_lowercase();
        self.rules
            .iter()
            .find(|(needle, _)| normalized.contains(needle))
            .map(|(_, action)| *action)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{parse_savings, ActionMapper};
    use crate::domain::remediation::RemediationAction;

    #[test]
    fn specific_nouns_win_over_generic_verbs() {
        let mapper = ActionMapper::default();

        assert_eq!(
            mapper.map("Delete unattached EBS volume"),
            Some(RemediationAction::DeleteVolume)
        );
        assert_eq!(
            mapper.map("Stop the idle RDS database overnight"),
            Some(RemediationAction::StopDatabase)
        );
        assert_eq!(
            mapper.map("delete stale snapshot copies"),
            Some(RemediationAction::DeleteSnapshot)
        );
        assert_eq!(mapper.map("Stop idle instance"), Some(RemediationAction::StopInstance));
        assert_eq!(
            mapper.map("Terminate the abandoned build runner"),
            Some(RemediationAction::TerminateInstance)
        );
    }

    #[test]
    fn unmatched_action_text_maps_to_none() {
        let mapper = ActionMapper::default();
        assert_eq!(mapper.map("resize to a smaller tier"), None);
        assert_eq!(mapper.map(""), None);
    }

    #[test]
    fn savings_strings_parse_with_currency_noise() {
        assert_eq!(parse_savings("$42.50"), Some(Decimal::new(4250, 2)));
        assert_eq!(parse_savings("1,200/mo"), Some(Decimal::new(1200, 0)));
        assert_eq!(parse_savings(" $3 "), Some(Decimal::new(3, 0)));
        assert_eq!(parse_savings("free"), None);
        assert_eq!(parse_savings(""), None);
        assert_eq!(parse_savings("-$10"), None);
    }
}
