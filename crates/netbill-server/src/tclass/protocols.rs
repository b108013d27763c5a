//! Port-based protocol classification
//!
//! A secondary lens on traffic next to the IP-range tree: well-known
//! ports map to protocol buckets for operator tooling. Custom rules from
//! configuration are consulted before the built-in table; within each
//! set, higher priority wins.

use crate::config::ProtocolRuleConfig;

/// One protocol bucket with its ports
#[derive(Debug, Clone)]
pub struct ProtocolRule {
    pub protocol: String,
    pub ports: Vec<u16>,
    pub priority: i32,
}

impl From<&ProtocolRuleConfig> for ProtocolRule {
    fn from(config: &ProtocolRuleConfig) -> Self {
        ProtocolRule {
            protocol: config.protocol.clone(),
            ports: config.ports.clone(),
            priority: config.priority,
        }
    }
}

/// Port-to-protocol classifier
#[derive(Debug)]
pub struct ProtocolClassifier {
    rules: Vec<ProtocolRule>,
}

impl ProtocolClassifier {
    /// Classifier with the built-in well-known-port table
    pub fn with_defaults() -> Self {
        let mut classifier = ProtocolClassifier {
            rules: default_rules(),
        };
        classifier.sort_rules();
        classifier
    }

    /// Built-ins plus the configured custom rules
    pub fn from_config(custom: &[ProtocolRuleConfig]) -> Self {
        let mut classifier = Self::with_defaults();
        classifier
            .rules
            .extend(custom.iter().map(ProtocolRule::from));
        classifier.sort_rules();
        classifier
    }

    fn sort_rules(&mut self) {
        // Stable sort: config rules added later still beat equal-priority
        // built-ins only via higher priority
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Protocol for one port, if any rule covers it
    pub fn classify_port(&self, port: u16) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.ports.contains(&port))
            .map(|rule| rule.protocol.as_str())
    }

    /// Protocol for a flow given both ports. The destination port decides;
    /// the source port covers reply traffic; the port-range buckets catch
    /// the rest.
    pub fn classify_flow(&self, dst_port: u16, src_port: u16) -> String {
        if let Some(protocol) = self.classify_port(dst_port) {
            return protocol.to_string();
        }
        if let Some(protocol) = self.classify_port(src_port) {
            return protocol.to_string();
        }
        match dst_port {
            1024..=5000 => "high_ports".to_string(),
            49152..=65535 => "ephemeral".to_string(),
            _ => "unknown".to_string(),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

fn rule(protocol: &str, ports: &[u16], priority: i32) -> ProtocolRule {
    ProtocolRule {
        protocol: protocol.to_string(),
        ports: ports.to_vec(),
        priority,
    }
}

fn default_rules() -> Vec<ProtocolRule> {
    vec![
        rule("http", &[80, 8080, 8000, 3000], 10),
        rule("https", &[443, 8443], 10),
        rule("ftp", &[20, 21], 8),
        rule("ssh", &[22], 9),
        rule("telnet", &[23], 7),
        rule("smtp", &[25, 587, 465], 8),
        rule("pop3", &[110, 995], 7),
        rule("imap", &[143, 993], 7),
        rule("dns", &[53], 9),
        rule("dhcp", &[67, 68], 8),
        rule("snmp", &[161, 162], 6),
        rule("voip", &[5060, 5061, 1720, 2427], 8),
        rule("gaming", &[27015, 7777, 25565, 19132], 6),
        rule("p2p", &[6881, 6882, 6883, 6884, 6885], 5),
        rule("streaming", &[554, 1935, 8554], 7),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known_ports() {
        let classifier = ProtocolClassifier::with_defaults();
        assert_eq!(classifier.classify_port(443), Some("https"));
        assert_eq!(classifier.classify_port(22), Some("ssh"));
        assert_eq!(classifier.classify_port(53), Some("dns"));
        assert_eq!(classifier.classify_port(12345), None);
    }

    #[test]
    fn test_flow_falls_back_to_source_port() {
        let classifier = ProtocolClassifier::with_defaults();
        // Reply traffic: server port on the source side
        assert_eq!(classifier.classify_flow(55123, 443), "https");
    }

    #[test]
    fn test_port_range_buckets() {
        let classifier = ProtocolClassifier::with_defaults();
        assert_eq!(classifier.classify_flow(2048, 40000), "high_ports");
        assert_eq!(classifier.classify_flow(60000, 40000), "ephemeral");
        assert_eq!(classifier.classify_flow(999, 40000), "unknown");
    }

    #[test]
    fn test_custom_rules_beat_builtins_by_priority() {
        let custom = vec![ProtocolRuleConfig {
            protocol: "corp-vpn".to_string(),
            ports: vec![443],
            priority: 20,
        }];
        let classifier = ProtocolClassifier::from_config(&custom);
        assert_eq!(classifier.classify_port(443), Some("corp-vpn"));
        // Built-ins unaffected elsewhere
        assert_eq!(classifier.classify_port(80), Some("http"));
        assert_eq!(classifier.rule_count(), 16);
    }
}
