//! Dedupe, cooldown, and channel-routing policy. Pure over an in-memory
//! per-dedupe-key ledger so producers can decide whether to call `Create`
//! at all without round-tripping the store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::Severity;

#[derive(Debug, Clone)]
pub struct ChannelRouting {
    pub default: Vec<String>,
    pub by_severity: HashMap<Severity, Vec<String>>,
}

impl Default for ChannelRouting {
    fn default() -> Self {
        Self { default: Vec::new(), by_severity: HashMap::new() }
    }
}

impl ChannelRouting {
    pub fn resolve(&self, severity: Severity) -> Vec<String> {
        self.by_severity.get(&severity).cloned().unwrap_or_else(|| self.default.clone())
    }
}

#[derive(Debug, Clone)]
pub struct AlertPolicyConfig {
    pub enabled: bool,
    pub actionable_reasons: Option<Vec<String>>,
    pub dedupe_window: chrono::Duration,
    pub cooldown: chrono::Duration,
    pub channels: ChannelRouting,
}

impl Default for AlertPolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            actionable_reasons: None,
            dedupe_window: chrono::Duration::seconds(300),
            cooldown: chrono::Duration::seconds(900),
            channels: ChannelRouting::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendVerdict {
    Suppress(&'static str),
    Authorize { channels: Vec<String>, fingerprint: String },
}

#[derive(Debug, Clone, Default)]
struct DedupeEntry {
    last_fingerprint: Option<String>,
    last_seen: Option<DateTime<Utc>>,
    last_sent: Option<DateTime<Utc>>,
}

/// Fingerprint used for dedupe: reason, severity, and a trimmed summary.
pub fn fingerprint(reason: &str, severity: Severity, summary: &str) -> String {
    format!("{reason}|{}|{}", severity.as_str(), summary.trim())
}

#[derive(Debug, Default)]
pub struct AlertDedupeTracker {
    entries: HashMap<String, DedupeEntry>,
}

impl AlertDedupeTracker {
    pub fn evaluate(
        &self,
        cfg: &AlertPolicyConfig,
        dedupe_key: &str,
        reason: &str,
        severity: Severity,
        summary: &str,
        now: DateTime<Utc>,
    ) -> SendVerdict {
        if !cfg.enabled {
            return SendVerdict::Suppress("disabled");
        }
        if let Some(actionable) = &cfg.actionable_reasons {
            if !actionable.iter().any(|r| r == reason) {
                return SendVerdict::Suppress("non_actionable");
            }
        }
        let channels = cfg.channels.resolve(severity);
        if channels.is_empty() {
            return SendVerdict::Suppress("no_channels");
        }

        let fp = fingerprint(reason, severity, summary);
        if let Some(entry) = self.entries.get(dedupe_key) {
            if entry.last_fingerprint.as_deref() == Some(fp.as_str()) {
                if let Some(seen) = entry.last_seen {
                    if now - seen < cfg.dedupe_window {
                        return SendVerdict::Suppress("dedupe");
                    }
                }
            }
            if let Some(sent) = entry.last_sent {
                if now - sent < cfg.cooldown {
                    return SendVerdict::Suppress("cooldown");
                }
            }
        }

        SendVerdict::Authorize { channels, fingerprint: fp }
    }

    pub fn record_seen(&mut self, dedupe_key: &str, fingerprint: String, now: DateTime<Utc>) {
        let entry = self.entries.entry(dedupe_key.to_string()).or_default();
        entry.last_fingerprint = Some(fingerprint);
        entry.last_seen = Some(now);
    }

    pub fn record_sent(&mut self, dedupe_key: &str, now: DateTime<Utc>) {
        let entry = self.entries.entry(dedupe_key.to_string()).or_default();
        entry.last_sent = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn cfg() -> AlertPolicyConfig {
        AlertPolicyConfig {
            channels: ChannelRouting { default: vec!["slack".into()], by_severity: HashMap::new() },
            ..AlertPolicyConfig::default()
        }
    }

    #[test]
    fn s6_dedupe_then_cooldown_then_fresh_send() {
        let cfg = cfg();
        let mut tracker = AlertDedupeTracker::default();

        // t=0: sends.
        let v0 = tracker.evaluate(&cfg, "k", "r", Severity::High, "s", now(0));
        let SendVerdict::Authorize { fingerprint: fp, .. } = v0 else { panic!("expected authorize") };
        tracker.record_seen("k", fp.clone(), now(0));
        tracker.record_sent("k", now(0));

        // t=60: same fingerprint within dedupe window -> suppressed.
        let v1 = tracker.evaluate(&cfg, "k", "r", Severity::High, "s", now(60));
        assert_eq!(v1, SendVerdict::Suppress("dedupe"));
        tracker.record_seen("k", fp.clone(), now(60));

        // t=800: outside dedupe window but inside cooldown -> suppressed.
        let v2 = tracker.evaluate(&cfg, "k", "r", Severity::High, "s", now(800));
        assert_eq!(v2, SendVerdict::Suppress("cooldown"));
        tracker.record_seen("k", fp, now(800));

        // t=901: outside both windows -> authorized again.
        let v3 = tracker.evaluate(&cfg, "k", "r", Severity::High, "s", now(901));
        assert!(matches!(v3, SendVerdict::Authorize { .. }));
    }

    #[test]
    fn disabled_suppresses_everything() {
        let cfg = AlertPolicyConfig { enabled: false, ..cfg() };
        let tracker = AlertDedupeTracker::default();
        assert_eq!(
            tracker.evaluate(&cfg, "k", "r", Severity::Info, "s", now(0)),
            SendVerdict::Suppress("disabled")
        );
    }

    #[test]
    fn no_channels_suppresses() {
        let cfg = AlertPolicyConfig {
            channels: ChannelRouting::default(),
            ..AlertPolicyConfig::default()
        };
        let tracker = AlertDedupeTracker::default();
        assert_eq!(
            tracker.evaluate(&cfg, "k", "r", Severity::Info, "s", now(0)),
            SendVerdict::Suppress("no_channels")
        );
    }

    #[test]
    fn different_fingerprint_bypasses_dedupe_but_not_cooldown() {
        let cfg = cfg();
        let mut tracker = AlertDedupeTracker::default();
        let v0 = tracker.evaluate(&cfg, "k", "r", Severity::High, "s1", now(0));
        let SendVerdict::Authorize { fingerprint: fp0, .. } = v0 else { panic!() };
        tracker.record_seen("k", fp0, now(0));
        tracker.record_sent("k", now(0));

        // Different summary -> different fingerprint, dedupe doesn't apply,
        // but the cooldown on `last_sent` for this dedupe key still does.
        let v1 = tracker.evaluate(&cfg, "k", "r", Severity::High, "s2", now(1));
        assert_eq!(v1, SendVerdict::Suppress("cooldown"));
    }
}
